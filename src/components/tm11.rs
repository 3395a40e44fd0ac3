//! TM11 magnetic tape controller (TU10 transports)
//!
//! Media are SIMH-compatible `.tap` streams: every record is a 32-bit
//! little-endian byte count, the data padded to even length, and the count
//! again; a zero count is a tape mark, a count with the sign bit set (or
//! all ones) is end of medium. Positioning is byte-granular on the stream.
//!
//! A read runs in two phases: the record-length header is accumulated
//! through the transfer engine first, then the completion handler issues
//! the data transfer with the smaller of the record length and the
//! requested count. Spacing walks records the same way, one header per
//! record, until the byte/record counter reaches zero or a mark is hit.
//!
//! ## Registers
//! - 017772520 MTS: status (read-only)
//! - 017772522 MTC: command
//! - 017772524 MTBRC: byte/record count (two's complement)
//! - 017772526 MTCMA: current memory address
//! - 017772530 MTD: data buffer
//! - 017772532 MTRD: read lines

use crate::bus::{Bus, Device, DriveId};
use crate::iopage::merge;
use crate::storage::transfer::{Completion, Transfer, TransferOp, TransferStatus};
use crate::storage::Drive;
use log::trace;

const MTS: u32 = 0o17772520;
const MTC: u32 = 0o17772522;
const MTBRC: u32 = 0o17772524;
const MTCMA: u32 = 0o17772526;
const MTD: u32 = 0o17772530;
const MTRD: u32 = 0o17772532;

pub const TM_VECTOR: u16 = 0o224;
const TM_PRIORITY: u8 = 5;
const TM_DELAY: u32 = 10;

/// MTS bit definitions
const MTS_TUR: u16 = 0o1; // tape unit ready
const MTS_WRL: u16 = 0o4; // write locked
const MTS_BOT: u16 = 0o40; // beginning of tape
const MTS_SELR: u16 = 0o100; // unit selected and online
const MTS_NXM: u16 = 0o200;
const MTS_BTE: u16 = 0o400; // bad tape error
const MTS_RLE: u16 = 0o1000; // record length error
const MTS_EOF: u16 = 0o40000; // tape mark seen
const MTS_ILC: u16 = 0o100000; // illegal command
/// Error bits summarized into MTC bit 15.
const MTS_ERROR_MASK: u16 = 0o177600;
/// Command status bits cleared when a new function starts.
const MTS_CLEAR_MASK: u16 = MTS_NXM | MTS_BTE | MTS_RLE | MTS_EOF | MTS_ILC;

/// MTC bit definitions
const MTC_GO: u16 = 0o1;
const MTC_XBA: u16 = 0o60; // memory address bits 16-17
const MTC_IE: u16 = 0o100;
const MTC_CUR: u16 = 0o200; // control unit ready (done)
const MTC_ERR: u16 = 0o100000;
/// Program-writable MTC bits (ERR, CUR and GO are not stored).
const MTC_WRITE_MASK: u16 = 0x7F7E;

/// Reset values: density bits plus ready / write-locked media at load point.
const MTC_RESET: u16 = 0x6080;
const MTS_RESET: u16 = 0x65;

/// End-of-medium marker in a `.tap` count word.
const TAPE_EOM: u32 = 0x8000_0000;

pub struct Tm11 {
    pub mts: u16,
    pub mtc: u16,
    pub mtbrc: u16,
    pub mtcma: u16,
    pub mtd: u16,
    pub mtrd: u16,
    /// Byte count issued for the in-flight data phase.
    started: u32,
    /// Byte count the program asked for (from MTBRC at go time).
    requested: u32,
}

impl Tm11 {
    pub fn new() -> Self {
        Tm11 {
            mts: MTS_RESET,
            mtc: MTC_RESET,
            mtbrc: 0,
            mtcma: 0,
            mtd: 0,
            mtrd: 0,
            started: 0,
            requested: 0,
        }
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        bus.cancel_interrupts(TM_VECTOR);
        self.mts = MTS_RESET;
        self.mtc = MTC_RESET;
        self.mtbrc = 0;
        self.mtcma = 0;
        self.mtd = 0;
        self.mtrd = 0;
    }

    pub fn selected_unit(&self) -> u8 {
        ((self.mtc >> 8) & 7) as u8
    }

    pub fn drive_id(&self) -> DriveId {
        DriveId::new(Device::Tm11, self.selected_unit())
    }

    /// Register access. `at_bot` reflects whether the selected unit's media
    /// position is zero. Returns `(value, go)`.
    pub fn access(&mut self, addr: u32, data: Option<u16>, byte: bool, at_bot: bool) -> (u16, bool) {
        let mut go = false;
        let value = match addr & !1 {
            MTS => {
                self.sync_bot(at_bot);
                self.mts
            }
            MTC => {
                if let Some(data) = data {
                    let merged = merge(self.mtc, data, addr, byte);
                    self.mtc = (self.mtc & !MTC_WRITE_MASK) | (merged & MTC_WRITE_MASK);
                    if merged & MTC_GO != 0 && self.mtc & MTC_CUR != 0 {
                        self.mtc &= !(MTC_CUR | MTC_ERR);
                        self.mts &= !MTS_CLEAR_MASK;
                        go = true;
                    }
                }
                self.mtc
            }
            MTBRC => {
                if let Some(data) = data {
                    self.mtbrc = merge(self.mtbrc, data, addr, byte);
                }
                self.mtbrc
            }
            MTCMA => {
                if let Some(data) = data {
                    self.mtcma = merge(self.mtcma, data, addr, byte);
                }
                self.mtcma
            }
            MTD => {
                if let Some(data) = data {
                    self.mtd = merge(self.mtd, data, addr, byte);
                }
                self.mtd
            }
            MTRD => {
                if let Some(data) = data {
                    self.mtrd = merge(self.mtrd, data, addr, byte);
                }
                self.mtrd
            }
            _ => 0,
        };
        (value, go)
    }

    /// Begin the function written to MTC against the selected unit's drive.
    pub fn start(&mut self, bus: &mut dyn Bus, drive: &mut Drive) -> Option<Transfer> {
        let function = (self.mtc >> 1) & 7;
        trace!(
            "tm11: function {} unit {} position {}",
            function,
            self.selected_unit(),
            drive.position
        );
        drive.command = function;
        match function {
            0 => {
                // Off-line
                self.done(bus, drive.position == 0);
                None
            }
            1 => {
                self.requested = 0x10000 - self.mtbrc as u32;
                Some(Transfer::new(TransferOp::ReadLength, drive.position, 0, 4))
            }
            2 | 3 | 6 => {
                // Write, write-EOF, write-IRG: media are write-locked
                // range-backed images.
                self.mts |= MTS_ILC;
                self.done(bus, drive.position == 0);
                None
            }
            4 => Some(Transfer::new(TransferOp::ReadLength, drive.position, 0, 4)),
            5 => {
                if drive.position < 4 {
                    self.done(bus, drive.position == 0);
                    return None;
                }
                Some(Transfer::new(
                    TransferOp::ReadLength,
                    drive.position - 4,
                    0,
                    4,
                ))
            }
            7 => {
                // Rewind
                drive.position = 0;
                self.done(bus, true);
                None
            }
            _ => unreachable!("tm11 function field is three bits"),
        }
    }

    /// Completion routing for both phases of every tape function. May
    /// return a follow-up transfer (read data phase, next spaced record).
    pub fn end(&mut self, bus: &mut dyn Bus, drive: &mut Drive, c: &Completion) -> Option<Transfer> {
        if c.status != TransferStatus::Done {
            match c.status {
                TransferStatus::Nxm => self.mts |= MTS_NXM,
                _ => self.mts |= MTS_BTE,
            }
            self.done(bus, drive.position == 0);
            return None;
        }
        match (drive.command, c.op) {
            (1, TransferOp::ReadLength) => {
                let length = c.address;
                if length == 0 || length & TAPE_EOM != 0 {
                    // Tape mark: rest one word past its start.
                    self.mts |= MTS_EOF;
                    drive.position = c.position - 2;
                    self.done(bus, drive.position == 0);
                    return None;
                }
                if length > self.requested {
                    self.mts |= MTS_RLE;
                }
                let count = length.min(self.requested);
                drive.position = (c.position + 4 + length as u64 + 1) & !1;
                let address = self.mtcma as u32 | (((self.mtc & MTC_XBA) as u32) << 12);
                self.started = count;
                Some(Transfer::new(TransferOp::Read, c.position, address, count))
            }
            (1, TransferOp::Read) => {
                let transferred = self.started - c.count;
                self.mtbrc = self.mtbrc.wrapping_add(transferred as u16);
                self.mtcma = (c.address & 0xFFFF) as u16;
                self.mtc = (self.mtc & !MTC_XBA) | (((c.address >> 12) as u16) & MTC_XBA);
                self.done(bus, drive.position == 0);
                None
            }
            (4, TransferOp::ReadLength) => {
                let length = c.address;
                if length == 0 || length & TAPE_EOM != 0 {
                    self.mts |= MTS_EOF;
                    drive.position = c.position - 2;
                    self.done(bus, drive.position == 0);
                    return None;
                }
                drive.position = (c.position + 4 + length as u64 + 1) & !1;
                self.mtbrc = self.mtbrc.wrapping_add(1);
                if self.mtbrc != 0 {
                    return Some(Transfer::new(TransferOp::ReadLength, drive.position, 0, 4));
                }
                self.done(bus, drive.position == 0);
                None
            }
            (5, TransferOp::ReadLength) => {
                // The header just read is the record's trailing count; the
                // record (with both counts) ends where the read began.
                let length = c.address;
                if length == 0 || length & TAPE_EOM != 0 {
                    // Rest at the start of the mark.
                    self.mts |= MTS_EOF;
                    drive.position = c.position - 4;
                    self.done(bus, drive.position == 0);
                    return None;
                }
                let span = 4 + ((length as u64 + 1) & !1) + 4;
                drive.position = c.position.saturating_sub(span);
                self.mtbrc = self.mtbrc.wrapping_add(1);
                if self.mtbrc != 0 && drive.position >= 4 {
                    return Some(Transfer::new(
                        TransferOp::ReadLength,
                        drive.position - 4,
                        0,
                        4,
                    ));
                }
                self.done(bus, drive.position == 0);
                None
            }
            _ => {
                self.done(bus, drive.position == 0);
                None
            }
        }
    }

    fn sync_bot(&mut self, at_bot: bool) {
        if at_bot {
            self.mts |= MTS_BOT;
        } else {
            self.mts &= !MTS_BOT;
        }
        self.mts |= MTS_TUR | MTS_SELR | MTS_WRL;
    }

    fn done(&mut self, bus: &mut dyn Bus, at_bot: bool) {
        self.sync_bot(at_bot);
        self.mtc |= MTC_CUR;
        if self.mts & MTS_ERROR_MASK != 0 {
            self.mtc |= MTC_ERR;
        }
        if self.mtc & MTC_IE != 0 {
            bus.interrupt(TM_DELAY, TM_PRIORITY, TM_VECTOR, None);
        }
    }
}

impl Default for Tm11 {
    fn default() -> Self {
        Tm11::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_values() {
        let tm = Tm11::new();
        assert_eq!(tm.mtc, 0x6080);
        assert_eq!(tm.mts, 0x65);
    }

    #[test]
    fn go_gate_requires_ready() {
        let mut tm = Tm11::new();
        tm.mtc &= !MTC_CUR;
        let (_, go) = tm.access(MTC, Some(0o3), false, true);
        assert!(!go);
    }

    #[test]
    fn go_clears_ready_and_command_status() {
        let mut tm = Tm11::new();
        tm.mts |= MTS_EOF;
        let (_, go) = tm.access(MTC, Some(0o11), false, true); // space forward
        assert!(go);
        assert_eq!(tm.mtc & MTC_CUR, 0);
        assert_eq!(tm.mts & MTS_EOF, 0);
    }

    #[test]
    fn bot_tracks_position() {
        let mut tm = Tm11::new();
        let (mts, _) = tm.access(MTS, None, false, false);
        assert_eq!(mts & MTS_BOT, 0);
        let (mts, _) = tm.access(MTS, None, false, true);
        assert_ne!(mts & MTS_BOT, 0);
    }
}
