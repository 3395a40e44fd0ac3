//! RL11 disk controller (RL01/RL02 cartridge drives)
//!
//! Four units, 40 sectors per track, 256-byte sectors; RL02 cartridges
//! carry 1024 tracks (512 cylinders × 2 heads), RL01 half that. A function
//! starts when the CSR is written with controller-ready clear. The drive
//! keeps an internal head position (`DAR`) distinct from the
//! programmer-visible disk address register: seeks apply a cylinder
//! difference to it, read-header reports it.
//!
//! ## Registers
//! - 017774400 RLCS: control/status
//! - 017774402 RLBA: bus address
//! - 017774404 RLDA: disk address (function-dependent layout)
//! - 017774406 RLMP: multi-purpose (word count / status / header)

use crate::bus::{Bus, Device, DriveId};
use crate::iopage::merge;
use crate::storage::transfer::{Completion, Transfer, TransferOp, TransferStatus};
use log::trace;

const RLCS: u32 = 0o17774400;
const RLBA: u32 = 0o17774402;
const RLDA: u32 = 0o17774404;
const RLMP: u32 = 0o17774406;

pub const RL_VECTOR: u16 = 0o160;
const RL_PRIORITY: u8 = 5;
const RL_DELAY: u32 = 10;

/// CSR bit definitions
const CSR_DRDY: u16 = 0o1; // drive ready (read-only)
const CSR_MEX: u16 = 0o60; // bus address bits 16-17
const CSR_IE: u16 = 0o100;
const CSR_CRDY: u16 = 0o200; // controller ready; cleared by software to start
const CSR_DS: u16 = 0o1400; // drive select
/// Error code field (bits 10-13) values
const CSR_ERR_OPI: u16 = 1 << 10; // operation incomplete
const CSR_ERR_CRC: u16 = 2 << 10; // data CRC / write-check mismatch
const CSR_ERR_HNF: u16 = 5 << 10; // header not found
const CSR_ERR_NXM: u16 = 8 << 10;
/// The whole error-code field.
const CSR_ERR_FIELD: u16 = 0o36000;
const CSR_ERR: u16 = 0o100000;
/// Software-writable CSR bits: function, address extension, IE, CRDY,
/// drive select.
const CSR_WRITE_MASK: u16 = 0o1776;

/// Drive status word reported by get-status: lock-on, brush home, heads
/// out; RL02 adds the drive-type bit.
const STATUS_RL01: u16 = 0o35;
const STATUS_RL02: u16 = 0o235;

const SECTORS: u16 = 40;
const SECTOR_BYTES: u64 = 256;

pub struct Rl11 {
    pub csr: u16,
    pub bar: u16,
    pub dar: u16,
    pub mpr: u16,
    /// Internal head position: cylinder/head in DAR layout (bits 6-15).
    pub head_dar: u16,
    /// Tracks (cylinder × head) per unit; RL02 = 1024, RL01 = 512.
    pub tracks: [u16; 4],
}

impl Rl11 {
    pub fn new() -> Self {
        Rl11 {
            csr: CSR_CRDY,
            bar: 0,
            dar: 0,
            mpr: 0,
            head_dar: 0,
            tracks: [1024, 1024, 512, 512],
        }
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        bus.cancel_interrupts(RL_VECTOR);
        self.csr = CSR_CRDY;
        self.bar = 0;
        self.dar = 0;
        self.mpr = 0;
    }

    fn selected_unit(&self) -> usize {
        ((self.csr & CSR_DS) >> 8) as usize
    }

    /// True when the CSR write should start a function: controller-ready
    /// written from set to clear.
    pub fn access(&mut self, addr: u32, data: Option<u16>, byte: bool) -> (u16, bool) {
        let mut go = false;
        let value = match addr & !1 {
            RLCS => {
                if let Some(data) = data {
                    let merged = merge(self.csr, data, addr, byte);
                    if merged & CSR_CRDY == 0 && self.csr & CSR_CRDY != 0 {
                        // New function: latch control bits; error bits
                        // persist until get-status resets them.
                        self.csr = (self.csr & (CSR_ERR | CSR_ERR_FIELD))
                            | (merged & CSR_WRITE_MASK & !CSR_CRDY);
                        go = true;
                    } else {
                        self.csr = (self.csr & !CSR_WRITE_MASK) | (merged & CSR_WRITE_MASK);
                    }
                }
                let unit = self.selected_unit();
                let mut csr = self.csr & !CSR_DRDY;
                if self.tracks[unit] != 0 {
                    csr |= CSR_DRDY;
                }
                self.csr = csr;
                self.csr
            }
            RLBA => {
                if let Some(data) = data {
                    self.bar = merge(self.bar, data, addr, byte) & !1;
                }
                self.bar
            }
            RLDA => {
                if let Some(data) = data {
                    self.dar = merge(self.dar, data, addr, byte);
                }
                self.dar
            }
            RLMP => {
                if let Some(data) = data {
                    self.mpr = merge(self.mpr, data, addr, byte);
                }
                self.mpr
            }
            _ => 0,
        };
        (value, go)
    }

    /// Execute the function latched by the CSR write.
    pub fn start(&mut self, bus: &mut dyn Bus) -> Option<(DriveId, Transfer)> {
        let function = (self.csr >> 1) & 7;
        let unit = self.selected_unit();
        trace!("rl11: function {} unit {}", function, unit);
        match function {
            0 => {
                // No-op
                self.function_done(bus);
                None
            }
            2 => {
                // Get status; bit 3 of the parameter word also resets
                // controller errors.
                if self.mpr & 0o10 != 0 {
                    self.csr &= !(CSR_ERR | CSR_ERR_FIELD);
                }
                let status = if self.tracks[unit] > 512 {
                    STATUS_RL02
                } else {
                    STATUS_RL01
                };
                self.mpr = status | (self.head_dar & 0o100);
                self.function_done(bus);
                None
            }
            3 => {
                // Seek: apply the cylinder difference in DAR to the head
                // position, direction from bit 2, head select from bit 4.
                if self.dar & 3 == 1 {
                    let difference = self.dar & 0o177600;
                    let head = (self.dar << 2) & 0o100;
                    let cylinder = if self.dar & 4 != 0 {
                        (self.head_dar & 0o177600).wrapping_add(difference)
                    } else {
                        (self.head_dar & 0o177600).wrapping_sub(difference)
                    };
                    self.head_dar = (cylinder & 0o177600) | head;
                    self.dar = self.head_dar;
                }
                self.function_done(bus);
                None
            }
            4 => {
                // Read header: current head position, then two filler
                // words the guest may drain.
                self.mpr = self.head_dar;
                self.function_done(bus);
                None
            }
            op @ (1 | 5 | 6 | 7) => {
                let track = self.dar >> 6;
                let sector = self.dar & 0o77;
                if self.tracks[unit] == 0 || track >= self.tracks[unit] || sector >= SECTORS {
                    self.error(bus, CSR_ERR_HNF);
                    return None;
                }
                self.head_dar = self.dar;
                let op = match op {
                    1 => TransferOp::Check,
                    5 => TransferOp::Write,
                    _ => TransferOp::Read, // read, and read without header check
                };
                let position = (track as u64 * SECTORS as u64 + sector as u64) * SECTOR_BYTES;
                let address = self.bar as u32 | (((self.csr & CSR_MEX) as u32) << 12);
                let bytes = (0x10000 - self.mpr as u32) * 2;
                let id = DriveId::new(Device::Rl11, unit as u8);
                Some((id, Transfer::new(op, position, address, bytes)))
            }
            _ => unreachable!("rl11 function field is three bits"),
        }
    }

    pub fn end(&mut self, bus: &mut dyn Bus, c: &Completion) {
        self.bar = (c.address & 0xFFFF) as u16 & !1;
        self.csr = (self.csr & !CSR_MEX) | (((c.address >> 12) as u16) & CSR_MEX);
        let block = c.position / SECTOR_BYTES;
        self.dar = ((block / SECTORS as u64) as u16) << 6 | (block % SECTORS as u64) as u16;
        self.head_dar = self.dar;
        self.mpr = (0x10000u32.wrapping_sub(c.count >> 1) & 0xFFFF) as u16;
        match c.status {
            TransferStatus::Done => {}
            TransferStatus::ReadError => self.csr |= CSR_ERR | CSR_ERR_OPI,
            TransferStatus::Nxm => self.csr |= CSR_ERR | CSR_ERR_NXM,
            TransferStatus::CompareError => self.csr |= CSR_ERR | CSR_ERR_CRC,
        }
        self.function_done(bus);
    }

    fn function_done(&mut self, bus: &mut dyn Bus) {
        self.csr |= CSR_CRDY;
        if self.csr & CSR_IE != 0 {
            bus.interrupt(RL_DELAY, RL_PRIORITY, RL_VECTOR, None);
        }
    }

    fn error(&mut self, bus: &mut dyn Bus, code: u16) {
        self.csr |= CSR_ERR | code;
        self.function_done(bus);
    }
}

impl Default for Rl11 {
    fn default() -> Self {
        Rl11::new()
    }
}
