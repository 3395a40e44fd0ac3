//! LP11 line printer
//!
//! Writing the data buffer prints one character; completion is delayed
//! through the queue, and the handler sets DONE inside the interrupt
//! eligibility check so guests that sample DONE after the interrupt see
//! both together. Only codes 012 and up are printed, carriage return
//! excepted.
//!
//! ## Registers
//! - 017777514 LPS: printer status
//! - 017777516 LPB: printer buffer

use crate::bus::{Bus, IoEvent};
use crate::iopage::merge;

const LPS: u32 = 0o17777514;
const LPB: u32 = 0o17777516;

pub const LP_VECTOR: u16 = 0o200;
const LP_PRIORITY: u8 = 4;
const LP_DELAY: u32 = 8;

/// LPS bit definitions
const LPS_IE: u16 = 0o100;
const LPS_DONE: u16 = 0o200;

pub struct Lp11 {
    pub lps: u16,
}

impl Lp11 {
    pub fn new() -> Self {
        Lp11 { lps: LPS_DONE }
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        bus.cancel_interrupts(LP_VECTOR);
        self.lps = LPS_DONE;
    }

    pub fn access(&mut self, bus: &mut dyn Bus, addr: u32, data: Option<u16>, byte: bool) -> u16 {
        match addr & !1 {
            LPS => {
                if let Some(data) = data {
                    let merged = merge(self.lps, data, addr, byte);
                    let enabling = merged & LPS_IE != 0 && self.lps & LPS_IE == 0;
                    self.lps = (self.lps & !LPS_IE) | (merged & LPS_IE);
                    if enabling && self.lps & LPS_DONE != 0 {
                        bus.interrupt(LP_DELAY, LP_PRIORITY, LP_VECTOR, None);
                    }
                }
                self.lps
            }
            LPB => {
                if let Some(data) = data {
                    let ch = (data & 0x7F) as u8;
                    if ch >= 0o12 && ch != 0o15 {
                        bus.printer_put(ch);
                    }
                    self.lps &= !LPS_DONE;
                    bus.interrupt(LP_DELAY, LP_PRIORITY, LP_VECTOR, Some(IoEvent::LpDone));
                }
                0
            }
            _ => 0,
        }
    }

    /// Print completion: DONE goes up here, then interrupt eligibility is
    /// reported from the same place.
    pub fn print_done(&mut self) -> bool {
        self.lps |= LPS_DONE;
        self.lps & LPS_IE != 0
    }
}

impl Default for Lp11 {
    fn default() -> Self {
        Lp11::new()
    }
}
