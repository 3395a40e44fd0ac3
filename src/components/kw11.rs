//! KW11 line-time clock
//!
//! A 50 Hz tick: every 20 ms the monitor bit goes up and, with interrupts
//! enabled, vector 0100 fires at priority 6 — unless the CPU is halted.
//! The shell drives the timer by calling [`Kw11::tick`] with the current
//! time and sleeping for the returned delay; the target-timestamp scheme
//! absorbs scheduling jitter, and a gap beyond 30 seconds (a paused tab,
//! a suspended process) resets the phase instead of replaying every
//! missed tick.

use crate::bus::Bus;
use crate::iopage::merge;

const LKS: u32 = 0o17777546;

pub const KW_VECTOR: u16 = 0o100;
const KW_PRIORITY: u8 = 6;

/// Tick interval in milliseconds (50 Hz).
const TICK_MS: u64 = 20;
/// Beyond this gap the tick phase is reset instead of caught up.
const RESYNC_MS: u64 = 30_000;

/// LKS bit definitions
const LKS_IE: u16 = 0o100;
const LKS_DONE: u16 = 0o200;

pub struct Kw11 {
    pub lks: u16,
    target_ms: u64,
}

impl Kw11 {
    pub fn new() -> Self {
        Kw11 {
            lks: LKS_DONE,
            target_ms: 0,
        }
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        bus.cancel_interrupts(KW_VECTOR);
        self.lks = LKS_DONE;
    }

    pub fn access(&mut self, addr: u32, data: Option<u16>, byte: bool) -> u16 {
        if addr & !1 == LKS {
            if let Some(data) = data {
                let merged = merge(self.lks, data, addr, byte);
                self.lks = merged & (LKS_IE | LKS_DONE);
            }
            self.lks
        } else {
            0
        }
    }

    /// One 20 ms tick. Returns the delay in milliseconds until the next
    /// tick is due.
    pub fn tick(&mut self, bus: &mut dyn Bus, now_ms: u64) -> u64 {
        if !bus.halted() {
            self.lks |= LKS_DONE;
            if self.lks & LKS_IE != 0 {
                bus.interrupt(0, KW_PRIORITY, KW_VECTOR, None);
            }
        }
        self.target_ms += TICK_MS;
        let gap = self.target_ms.abs_diff(now_ms);
        if gap > RESYNC_MS {
            self.target_ms = now_ms + TICK_MS;
        }
        self.target_ms.saturating_sub(now_ms).max(1)
    }
}

impl Default for Kw11 {
    fn default() -> Self {
        Kw11::new()
    }
}
