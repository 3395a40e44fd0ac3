//! RK11 moving-head disk controller (RK05 drives)
//!
//! Eight units of 12 sectors × 406 tracks × 512-byte sectors. The guest
//! programs a function into the control/status register; a write with GO
//! set while DONE is set kicks new work through a zero-delay queue entry,
//! so the initiating instruction always retires before any I/O starts
//! (DOS-11 mis-sequences otherwise).
//!
//! ## Registers
//! - 017777400 RKDS: drive status (read-only)
//! - 017777402 RKER: error register (read-only)
//! - 017777404 RKCS: control/status
//! - 017777406 RKWC: word count (two's complement)
//! - 017777410 RKBA: bus address (low 16 bits; bits 16–17 in RKCS 4–5)
//! - 017777412 RKDA: disk address (drive | track | sector)
//! - 017777416 RKDB: data buffer (read-only)

use crate::bus::{Bus, Device, DriveId, IoEvent};
use crate::iopage::merge;
use crate::storage::transfer::{Completion, Transfer, TransferOp, TransferStatus};
use log::trace;

/// Register addresses
const RKDS: u32 = 0o17777400;
const RKER: u32 = 0o17777402;
const RKCS: u32 = 0o17777404;
const RKWC: u32 = 0o17777406;
const RKBA: u32 = 0o17777410;
const RKDA: u32 = 0o17777412;
const RKDB: u32 = 0o17777416;

pub const RK_VECTOR: u16 = 0o220;
const RK_PRIORITY: u8 = 5;
/// Queue ticks before the command-end interrupt is delivered.
const RK_DELAY: u32 = 10;
/// Queue ticks before a seek reports search-complete.
const RK_SEEK_DELAY: u32 = 32;

/// RKCS bit definitions
const RKCS_GO: u16 = 0o1;
const RKCS_MEX: u16 = 0o60; // bus address bits 16-17
const RKCS_IE: u16 = 0o100;
const RKCS_DONE: u16 = 0o200;
const RKCS_SCP: u16 = 0o20000; // search complete
const RKCS_HE: u16 = 0o40000; // hard error
const RKCS_ERR: u16 = 0o100000;
/// Program-writable RKCS bits (DONE and the error summaries are not).
const RKCS_WRITE_MASK: u16 = 0o7577;

/// RKER bit definitions
const RKER_WCE: u16 = 0o1; // write check (soft)
const RKER_NXS: u16 = 0o40;
const RKER_NXC: u16 = 0o100;
const RKER_NXD: u16 = 0o200;
const RKER_TE: u16 = 0o400;
const RKER_NXM: u16 = 0o2000;
const RKER_WLO: u16 = 0o20000;

/// RKDS pattern for a ready RK05: R/W/S ready, drive ready, sector
/// counter OK, RK05 identification.
const RKDS_READY: u16 = 0o4700;
const RKDS_WPS: u16 = 0o40;

const SECTOR_BYTES: u64 = 512;

/// Work decided by a queued [`IoEvent::RkStart`].
pub enum RkAction {
    None,
    /// Controller reset: the caller aborts in-flight drive work.
    Reset,
    /// Start a data transfer.
    Transfer(DriveId, Transfer),
}

pub struct Rk11 {
    pub rkds: u16,
    pub rker: u16,
    pub rkcs: u16,
    pub rkwc: u16,
    pub rkba: u16,
    pub rkda: u16,
    pub rkdb: u16,
    /// Tracks per unit; zero marks a non-existent drive.
    pub tracks: [u16; 8],
    /// Sectors per track per unit.
    pub sectors: [u16; 8],
    write_locked: [bool; 8],
}

impl Rk11 {
    pub fn new() -> Self {
        Rk11 {
            rkds: RKDS_READY,
            rker: 0,
            rkcs: RKCS_DONE,
            rkwc: 0,
            rkba: 0,
            rkda: 0,
            rkdb: 0,
            tracks: [406, 406, 406, 406, 0, 0, 0, 0],
            sectors: [12; 8],
            write_locked: [false; 8],
        }
    }

    /// Controller reset: registers to power-up values, pending interrupts
    /// dequeued. Cached blocks survive (the caller aborts drive fetches).
    pub fn reset(&mut self, bus: &mut dyn Bus) {
        bus.cancel_interrupts(RK_VECTOR);
        self.rkds = RKDS_READY;
        self.rker = 0;
        self.rkcs = RKCS_DONE;
        self.rkwc = 0;
        self.rkba = 0;
        self.rkda = 0;
        self.rkdb = 0;
    }

    fn selected_unit(&self) -> usize {
        ((self.rkda >> 13) & 7) as usize
    }

    /// Register read/write. Byte merging follows the I/O page rules; the
    /// dispatcher has already rejected odd word accesses.
    pub fn access(&mut self, bus: &mut dyn Bus, addr: u32, data: Option<u16>, byte: bool) -> u16 {
        match addr & !1 {
            RKDS => {
                let unit = self.selected_unit();
                let mut rkds = ((unit as u16) << 13) | RKDS_READY;
                if self.write_locked[unit] {
                    rkds |= RKDS_WPS;
                }
                self.rkds = rkds;
                self.rkds
            }
            RKER => self.rker,
            RKCS => {
                if let Some(data) = data {
                    let merged = merge(self.rkcs, data, addr, byte);
                    self.rkcs =
                        (self.rkcs & !RKCS_WRITE_MASK) | (merged & RKCS_WRITE_MASK & !RKCS_GO);
                    if merged & RKCS_GO != 0 && self.rkcs & RKCS_DONE != 0 {
                        // Accepting a function clears DONE at once so a
                        // second GO is ignored until completion.
                        self.rkcs &= !RKCS_DONE;
                        bus.interrupt(0, 0, RK_VECTOR, Some(IoEvent::RkStart));
                    }
                }
                self.rkcs
            }
            RKWC => {
                if let Some(data) = data {
                    self.rkwc = merge(self.rkwc, data, addr, byte);
                }
                self.rkwc
            }
            RKBA => {
                if let Some(data) = data {
                    self.rkba = merge(self.rkba, data, addr, byte) & !1;
                }
                self.rkba
            }
            RKDA => {
                if let Some(data) = data {
                    self.rkda = merge(self.rkda, data, addr, byte);
                }
                self.rkda
            }
            RKDB => self.rkdb,
            _ => 0,
        }
    }

    /// Run the function accepted by the last CSR write (the queued
    /// `RkStart` entry has matured).
    pub fn start(&mut self, bus: &mut dyn Bus) -> RkAction {
        let function = (self.rkcs >> 1) & 7;
        let unit = self.selected_unit();
        trace!("rk11: function {} unit {}", function, unit);
        self.rker = 0;
        self.rkcs &= !(RKCS_ERR | RKCS_HE | RKCS_SCP);
        match function {
            0 => {
                self.reset(bus);
                return RkAction::Reset;
            }
            7 => {
                // Write lock
                self.write_locked[unit] = true;
                self.command_done(bus);
                return RkAction::None;
            }
            _ => {}
        }

        if self.tracks[unit] == 0 {
            self.hard_error(bus, RKER_NXD);
            return RkAction::None;
        }
        let track = (self.rkda >> 4) & 0o777;
        let sector = self.rkda & 0o17;
        if track >= self.tracks[unit] {
            self.hard_error(bus, RKER_NXC);
            return RkAction::None;
        }
        if sector >= self.sectors[unit] {
            self.hard_error(bus, RKER_NXS);
            return RkAction::None;
        }

        match function {
            4 | 6 => {
                // Seek (drive reset falls through to seek): done now, a
                // delayed seek-end entry sets search-complete later.
                self.command_done(bus);
                bus.interrupt(
                    RK_SEEK_DELAY,
                    RK_PRIORITY,
                    RK_VECTOR,
                    Some(IoEvent::RkSeekEnd { unit: unit as u8 }),
                );
                RkAction::None
            }
            5 => {
                // Read check touches no memory; nothing can miscompare.
                self.rkwc = 0;
                self.command_done(bus);
                RkAction::None
            }
            op @ (1 | 2 | 3) => {
                if op == 1 && self.write_locked[unit] {
                    self.hard_error(bus, RKER_WLO);
                    return RkAction::None;
                }
                let op = match op {
                    1 => TransferOp::Write,
                    2 => TransferOp::Read,
                    _ => TransferOp::Check,
                };
                let position =
                    (track as u64 * self.sectors[unit] as u64 + sector as u64) * SECTOR_BYTES;
                let address = self.rkba as u32 | (((self.rkcs & RKCS_MEX) as u32) << 12);
                let bytes = (0x10000 - self.rkwc as u32) * 2;
                let id = DriveId::new(Device::Rk11, unit as u8);
                RkAction::Transfer(id, Transfer::new(op, position, address, bytes))
            }
            _ => RkAction::None,
        }
    }

    /// Transfer completion: write back the advanced disk address, bus
    /// address and word count, raise error bits, set done, interrupt.
    pub fn end(&mut self, bus: &mut dyn Bus, c: &Completion) {
        let unit = c.drive.unit as usize;
        let sectors = self.sectors[unit].max(1) as u64;
        let block = c.position / SECTOR_BYTES;
        self.rkda = (self.rkda & 0xE000)
            | ((((block / sectors) as u16) << 4) & 0o17760)
            | ((block % sectors) as u16);
        self.rkba = (c.address & 0xFFFF) as u16;
        self.rkcs = (self.rkcs & !RKCS_MEX) | (((c.address >> 12) as u16) & RKCS_MEX);
        self.rkwc = (0x10000u32.wrapping_sub(c.count >> 1) & 0xFFFF) as u16;
        match c.status {
            TransferStatus::Done => {}
            TransferStatus::ReadError => {
                self.rker |= RKER_TE;
                self.rkcs |= RKCS_HE | RKCS_ERR;
            }
            TransferStatus::Nxm => {
                self.rker |= RKER_NXM;
                self.rkcs |= RKCS_HE | RKCS_ERR;
            }
            TransferStatus::CompareError => {
                self.rker |= RKER_WCE;
                self.rkcs |= RKCS_ERR;
            }
        }
        self.command_done(bus);
    }

    /// Delayed seek completion for `unit`; reports whether the interrupt
    /// should be delivered.
    pub fn seek_end(&mut self, unit: u8) -> bool {
        self.rkds = ((unit as u16) << 13) | RKDS_READY;
        self.rkcs |= RKCS_SCP;
        self.rkcs & RKCS_IE != 0
    }

    fn command_done(&mut self, bus: &mut dyn Bus) {
        self.rkcs |= RKCS_DONE | RKCS_SCP;
        if self.rkcs & RKCS_IE != 0 {
            bus.interrupt(RK_DELAY, RK_PRIORITY, RK_VECTOR, None);
        }
    }

    fn hard_error(&mut self, bus: &mut dyn Bus, bit: u16) {
        self.rker |= bit;
        self.rkcs |= RKCS_HE | RKCS_ERR;
        self.command_done(bus);
    }
}

impl Default for Rk11 {
    fn default() -> Self {
        Rk11::new()
    }
}
