//! DL11 asynchronous serial lines
//!
//! Unit 0 is the console at the standard addresses and vectors 060/064;
//! units 1–4 sit in the 017776500 block with an 8-byte stride. Each unit
//! has a receiver CSR/buffer and transmitter CSR/buffer pair. Input
//! arrives from the shell through [`Dl11::input`] and is refused while the
//! previous character is still unread; transmit output goes to the
//! terminal collaborator for codes in [8, 127).

use crate::bus::{Bus, IoEvent};
use crate::iopage::merge;

const CONSOLE_BASE: u32 = 0o17777560;
const EXTRA_BASE: u32 = 0o17776500;

/// Number of lines (console plus four additional units).
pub const DL_UNITS: usize = 5;

const DL_PRIORITY: u8 = 4;
const DL_TX_DELAY: u32 = 30;
const DL_RX_DELAY: u32 = 10;

/// CSR bit definitions shared by receiver and transmitter
const CSR_IE: u16 = 0o100;
const CSR_DONE: u16 = 0o200; // receiver done / transmitter ready

/// One serial line.
#[derive(Default)]
pub struct DlUnit {
    pub rcsr: u16,
    pub rbuf: u16,
    pub xcsr: u16,
    pub xbuf: u16,
}

pub struct Dl11 {
    pub units: [DlUnit; DL_UNITS],
}

/// Receiver vector for a unit; the transmitter is four above it.
pub fn dl_vector(unit: usize) -> u16 {
    if unit == 0 {
        0o60
    } else {
        0o300 + (unit as u16 - 1) * 0o10
    }
}

impl Dl11 {
    pub fn new() -> Self {
        let mut dl = Dl11 {
            units: Default::default(),
        };
        for unit in &mut dl.units {
            unit.xcsr = CSR_DONE;
        }
        dl
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        for (n, unit) in self.units.iter_mut().enumerate() {
            bus.cancel_interrupts(dl_vector(n));
            bus.cancel_interrupts(dl_vector(n) + 4);
            unit.rcsr = 0;
            unit.rbuf = 0;
            unit.xcsr = CSR_DONE;
            unit.xbuf = 0;
            bus.terminal_reset(n as u8);
        }
    }

    /// Map an I/O page address onto (unit, register 0–3), register order
    /// rcsr, rbuf, xcsr, xbuf.
    pub fn decode(addr: u32) -> Option<(usize, u32)> {
        let addr = addr & !1;
        if (CONSOLE_BASE..CONSOLE_BASE + 8).contains(&addr) {
            return Some((0, (addr >> 1) & 3));
        }
        if (EXTRA_BASE..EXTRA_BASE + 8 * (DL_UNITS as u32 - 1)).contains(&addr) {
            let unit = 1 + ((addr - EXTRA_BASE) >> 3) as usize;
            return Some((unit, (addr >> 1) & 3));
        }
        None
    }

    pub fn access(
        &mut self,
        bus: &mut dyn Bus,
        unit: usize,
        register: u32,
        data: Option<u16>,
        byte: bool,
        addr: u32,
    ) -> u16 {
        let vector = dl_vector(unit);
        let line = &mut self.units[unit];
        match register {
            0 => {
                if let Some(data) = data {
                    let merged = merge(line.rcsr, data, addr, byte);
                    let enabling = merged & CSR_IE != 0 && line.rcsr & CSR_IE == 0;
                    line.rcsr = (line.rcsr & !CSR_IE) | (merged & CSR_IE);
                    if enabling && line.rcsr & CSR_DONE != 0 {
                        bus.interrupt(DL_RX_DELAY, DL_PRIORITY, vector, None);
                    }
                }
                line.rcsr
            }
            1 => {
                line.rcsr &= !CSR_DONE;
                line.rbuf
            }
            2 => {
                if let Some(data) = data {
                    let merged = merge(line.xcsr, data, addr, byte);
                    let enabling = merged & CSR_IE != 0 && line.xcsr & CSR_IE == 0;
                    line.xcsr = (line.xcsr & !CSR_IE) | (merged & CSR_IE);
                    if enabling && line.xcsr & CSR_DONE != 0 {
                        bus.interrupt(DL_TX_DELAY, DL_PRIORITY, vector + 4, None);
                    }
                }
                line.xcsr
            }
            3 => {
                if let Some(data) = data {
                    let ch = (data & 0x7F) as u8;
                    line.xbuf = ch as u16;
                    line.xcsr &= !CSR_DONE;
                    if (8..127).contains(&ch) {
                        bus.terminal_put(unit as u8, ch);
                    }
                    bus.interrupt(
                        DL_TX_DELAY,
                        DL_PRIORITY,
                        vector + 4,
                        Some(IoEvent::DlTxDone { unit: unit as u8 }),
                    );
                }
                line.xbuf
            }
            _ => 0,
        }
    }

    /// Character arrival from the shell. Refused (returns false) while the
    /// receiver still holds an unread character.
    pub fn input(&mut self, bus: &mut dyn Bus, unit: usize, ch: u8) -> bool {
        let line = &mut self.units[unit];
        if line.rcsr & CSR_DONE != 0 {
            return false;
        }
        line.rbuf = ch as u16;
        line.rcsr |= CSR_DONE;
        if line.rcsr & CSR_IE != 0 {
            bus.interrupt(DL_RX_DELAY, DL_PRIORITY, dl_vector(unit), None);
        }
        true
    }

    /// Transmitter completion event.
    pub fn tx_done(&mut self, unit: u8) -> bool {
        let line = &mut self.units[unit as usize];
        line.xcsr |= CSR_DONE;
        line.xcsr & CSR_IE != 0
    }
}

impl Default for Dl11 {
    fn default() -> Self {
        Dl11::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingBus;

    #[test]
    fn decode_covers_console_and_extra_units() {
        assert_eq!(Dl11::decode(0o17777560), Some((0, 0)));
        assert_eq!(Dl11::decode(0o17777566), Some((0, 3)));
        assert_eq!(Dl11::decode(0o17776500), Some((1, 0)));
        assert_eq!(Dl11::decode(0o17776512), Some((2, 1)));
        assert_eq!(Dl11::decode(0o17776526), Some((3, 3)));
        assert_eq!(Dl11::decode(0o17776536), Some((4, 3)));
        assert_eq!(Dl11::decode(0o17776540), None);
    }

    #[test]
    fn input_sets_done_and_is_refused_when_full() {
        let mut bus = RecordingBus::new();
        let mut dl = Dl11::new();
        assert!(dl.input(&mut bus, 0, b'a'));
        assert!(!dl.input(&mut bus, 0, b'b'));
        assert_eq!(dl.units[0].rbuf, b'a' as u16);
    }

    #[test]
    fn reading_the_buffer_releases_the_receiver() {
        let mut bus = RecordingBus::new();
        let mut dl = Dl11::new();
        dl.input(&mut bus, 0, b'a');
        let value = dl.access(&mut bus, 0, 1, None, false, 0o17777562);
        assert_eq!(value, b'a' as u16);
        assert!(dl.input(&mut bus, 0, b'b'));
    }

    #[test]
    fn input_interrupts_when_enabled() {
        let mut bus = RecordingBus::new();
        let mut dl = Dl11::new();
        dl.units[0].rcsr = CSR_IE;
        dl.input(&mut bus, 0, b'a');
        assert_eq!(bus.interrupts.len(), 1);
        assert_eq!(bus.interrupts[0].2, 0o60);
    }

    #[test]
    fn transmit_filters_control_codes() {
        let mut bus = RecordingBus::new();
        let mut dl = Dl11::new();
        dl.access(&mut bus, 0, 3, Some(b'H' as u16), false, 0o17777566);
        dl.access(&mut bus, 0, 3, Some(0o7), false, 0o17777566);
        assert_eq!(bus.terminal, vec![(0, b'H')]);
        assert_eq!(dl.units[0].xcsr & CSR_DONE, 0);
    }

    #[test]
    fn tx_done_restores_ready() {
        let mut dl = Dl11::new();
        dl.units[2].xcsr = CSR_IE;
        assert!(dl.tx_done(2));
        assert_ne!(dl.units[2].xcsr & CSR_DONE, 0);
    }
}
