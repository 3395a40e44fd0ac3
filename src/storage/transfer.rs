//! Transfer engine vocabulary
//!
//! A transfer moves bytes between emulated physical memory and the block
//! cache of one drive. The engine loop itself lives in
//! [`DiskSubsystem`](super::DiskSubsystem); these are the shared types. A
//! suspended transfer is a plain saved-state value parked on the drive
//! record until its block fetch completes — no closures are captured.

/// Operation code of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    /// Memory word to cache bytes (low byte first).
    Write,
    /// Cache word to memory; a final odd byte is written as a byte.
    Read,
    /// Compare memory words against cache words.
    Check,
    /// Shift cache words into the high half of `address`, accumulating a
    /// little-endian 32-bit value (tape record-length headers).
    ReadLength,
    /// Read a single cache byte into the low 8 bits of `address` and end
    /// immediately (paper tape).
    ReadByte,
}

/// In-flight (or about to start) transfer state.
#[derive(Debug, Clone, Copy)]
pub struct Transfer {
    pub op: TransferOp,
    /// Byte offset within the image.
    pub position: u64,
    /// DMA target: an 18-bit Unibus address for mapped drives, a 22-bit
    /// physical address otherwise. Ops 4 and 5 use it as an accumulator.
    pub address: u32,
    /// Remaining byte count.
    pub count: u32,
}

impl Transfer {
    pub fn new(op: TransferOp, position: u64, address: u32, count: u32) -> Self {
        Transfer {
            op,
            position,
            address,
            count,
        }
    }
}

/// Completion status handed to a controller's end routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Done,
    /// The backing fetch failed (read/timing error).
    ReadError,
    /// A memory access faulted.
    Nxm,
    /// Write-check comparison mismatch.
    CompareError,
}

/// Final state of a finished transfer, routed back to the owning
/// controller. `position`, `address` and `count` carry the values at the
/// point the transfer ended so controllers can reconstruct their
/// disk-address and word-count registers.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub drive: crate::bus::DriveId,
    pub op: TransferOp,
    pub status: TransferStatus,
    pub position: u64,
    pub address: u32,
    pub count: u32,
}
