//! PC11 paper-tape reader
//!
//! One data byte per operation: GO starts a single-byte read from the
//! user-named tape image at the current media position; DONE (and ERROR on
//! a failed or past-end read) report completion. Reading the buffer
//! register clears DONE.
//!
//! ## Registers
//! - 017777550 PRS: reader status
//! - 017777552 PRB: reader buffer

use crate::bus::{Bus, Device, DriveId};
use crate::iopage::merge;
use crate::storage::transfer::{Completion, Transfer, TransferOp, TransferStatus};
use crate::storage::Drive;

const PRS: u32 = 0o17777550;
const PRB: u32 = 0o17777552;

pub const PTR_VECTOR: u16 = 0o70;
const PTR_PRIORITY: u8 = 4;
const PTR_DELAY: u32 = 10;

/// PRS bit definitions
const PRS_GO: u16 = 0o1;
const PRS_IE: u16 = 0o100;
const PRS_DONE: u16 = 0o200;
const PRS_BUSY: u16 = 0o4000;
const PRS_ERROR: u16 = 0o100000;

pub struct Ptr11 {
    pub prs: u16,
    pub prb: u16,
    /// Image name supplied by the user; empty means no tape loaded.
    pub filename: String,
}

impl Ptr11 {
    pub fn new() -> Self {
        Ptr11 {
            prs: 0,
            prb: 0,
            filename: String::new(),
        }
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        bus.cancel_interrupts(PTR_VECTOR);
        self.prs = 0;
        self.prb = 0;
    }

    pub fn drive_id(&self) -> DriveId {
        DriveId::new(Device::Ptr, 0)
    }

    /// Register access; `go` asks the caller to start a one-byte read.
    pub fn access(&mut self, addr: u32, data: Option<u16>, byte: bool) -> (u16, bool) {
        let mut go = false;
        let value = match addr & !1 {
            PRS => {
                if let Some(data) = data {
                    let merged = merge(self.prs, data, addr, byte);
                    self.prs = (self.prs & !PRS_IE) | (merged & PRS_IE);
                    if merged & PRS_GO != 0 && self.prs & (PRS_ERROR | PRS_BUSY) == 0 {
                        self.prs = (self.prs & !PRS_DONE) | PRS_BUSY;
                        go = true;
                    }
                }
                self.prs
            }
            PRB => {
                self.prs &= !PRS_DONE;
                self.prb
            }
            _ => 0,
        };
        (value, go)
    }

    /// The one-byte read started by GO.
    pub fn start(&mut self, drive: &Drive) -> Transfer {
        Transfer::new(TransferOp::ReadByte, drive.position, 0, 1)
    }

    /// GO with no tape image loaded.
    pub fn fail(&mut self, bus: &mut dyn Bus) {
        self.prs = (self.prs & !PRS_BUSY) | PRS_ERROR | PRS_DONE;
        self.request_interrupt(bus);
    }

    pub fn end(&mut self, bus: &mut dyn Bus, drive: &mut Drive, c: &Completion) {
        self.prs &= !PRS_BUSY;
        let past_end = drive.size.is_some_and(|size| c.position >= size);
        if c.status != TransferStatus::Done || past_end {
            self.prs |= PRS_ERROR;
        } else {
            self.prb = (c.address & 0xFF) as u16;
            drive.position = c.position + 1;
        }
        self.prs |= PRS_DONE;
        self.request_interrupt(bus);
    }

    fn request_interrupt(&self, bus: &mut dyn Bus) {
        if self.prs & PRS_IE != 0 {
            bus.interrupt(PTR_DELAY, PTR_PRIORITY, PTR_VECTOR, None);
        }
    }
}

impl Default for Ptr11 {
    fn default() -> Self {
        Ptr11::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_sets_busy_and_clears_done() {
        let mut ptr = Ptr11::new();
        ptr.prs = PRS_DONE;
        let (_, go) = ptr.access(PRS, Some(PRS_GO), false);
        assert!(go);
        assert_eq!(ptr.prs & PRS_DONE, 0);
        assert_ne!(ptr.prs & PRS_BUSY, 0);
    }

    #[test]
    fn go_refused_while_error_or_busy() {
        let mut ptr = Ptr11::new();
        ptr.prs = PRS_ERROR;
        assert!(!ptr.access(PRS, Some(PRS_GO), false).1);
        ptr.prs = PRS_BUSY;
        assert!(!ptr.access(PRS, Some(PRS_GO), false).1);
    }

    #[test]
    fn reading_buffer_clears_done() {
        let mut ptr = Ptr11::new();
        ptr.prs = PRS_DONE;
        ptr.prb = 0o123;
        let (value, _) = ptr.access(PRB, None, false);
        assert_eq!(value, 0o123);
        assert_eq!(ptr.prs & PRS_DONE, 0);
    }
}
