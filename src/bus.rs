//! Collaborator contracts between the I/O subsystem and the CPU core
//!
//! The I/O page owns the peripheral controllers; everything else — physical
//! memory, the interrupt queue, the CPU register file, terminals, and the
//! backing object store for disk images — belongs to the emulator shell and
//! is reached through the [`Bus`] trait. All entry points into the I/O
//! subsystem take `&mut dyn Bus` alongside `&mut self`; the scheduling model
//! is cooperative and single-threaded, so no locking is involved.

/// 22-bit physical address of the start of the I/O page (top 8 KiB).
pub const IOPAGE_BASE: u32 = 0o17760000;

/// Nonexistent-memory fault from a physical memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nxm;

/// A bus-error trap to be taken by the CPU.
///
/// `code` is the CPU-error style reason code (e.g. `0o212` for a word access
/// to an odd I/O address); the CPU maps it onto the CPU error register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trap {
    pub vector: u16,
    pub code: u16,
}

/// Which controller a drive belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Device {
    Rk11,
    Rl11,
    Rp11,
    Tm11,
    Ptr,
}

/// Identifies one drive: owning controller plus unit number.
///
/// Drive records are created lazily on first reference and live for the
/// process lifetime; this id is also the handle for in-flight range fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriveId {
    pub device: Device,
    pub unit: u8,
}

impl DriveId {
    pub fn new(device: Device, unit: u8) -> Self {
        DriveId { device, unit }
    }
}

/// Deferred device work carried on the interrupt queue.
///
/// A queue entry tagged with an `IoEvent` is a callback, not (only) an
/// interrupt request: when it matures the shell calls
/// [`IoBus::io_event`](crate::iopage::IoBus::io_event), and the returned
/// flag decides whether the entry's interrupt is actually delivered. The
/// tags stay first-order — no closures cross the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    /// RK11 function kickoff, deferred so the initiating CSR write retires
    /// before any I/O starts (DOS-11 mis-sequences otherwise).
    RkStart,
    /// RK11 delayed seek completion for one unit; sets search-complete.
    RkSeekEnd { unit: u8 },
    /// LP11 print completion; sets DONE inside the interrupt check.
    LpDone,
    /// DL11 transmitter completion for one unit; sets ready.
    DlTxDone { unit: u8 },
}

/// Outcome of a positioned byte-range read against the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// 200: the response body is the whole image, starting at byte 0.
    Full,
    /// 206 or a local response with no status: body starts at the
    /// requested offset.
    Partial,
    /// 416: the requested range lies entirely past the end of the image.
    OutOfRange,
    /// Transport failure of any other kind.
    Failed,
}

/// Services the emulator shell provides to the I/O subsystem.
pub trait Bus {
    // --- physical memory (22-bit addresses) ---

    fn read_word(&mut self, addr: u32) -> Result<u16, Nxm>;
    fn write_word(&mut self, addr: u32, value: u16) -> Result<(), Nxm>;
    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), Nxm>;

    // --- interrupt queue ---

    /// Enqueue an interrupt request (and/or deferred work, see [`IoEvent`]).
    ///
    /// `delay` is in queue ticks drained between instructions; `priority` is
    /// the bus request level (4–6, or 0 for pure work entries). Delivery
    /// order is priority level first, insertion order within a level.
    fn interrupt(&mut self, delay: u32, priority: u8, vector: u16, event: Option<IoEvent>);

    /// Dequeue every pending entry at `vector`.
    fn cancel_interrupts(&mut self, vector: u16);

    /// Empty the queue entirely (RESET path).
    fn clear_interrupts(&mut self);

    // --- CPU state visible through the I/O page ---

    /// General register R0–R5 of register set 0 or 1.
    fn register(&self, set: u8, index: u8) -> u16;
    fn set_register(&mut self, set: u8, index: u8, value: u16);

    /// Stack pointer for mode 0 (kernel), 1 (supervisor) or 3 (user). The
    /// CPU keeps the saved per-mode SPs coherent with live R6, so this is
    /// always the current value for that mode.
    fn stack_pointer(&self, mode: u8) -> u16;
    fn set_stack_pointer(&mut self, mode: u8, value: u16);

    fn pc(&self) -> u16;
    fn set_pc(&mut self, value: u16);

    fn psw(&self) -> u16;
    fn set_psw(&mut self, value: u16);

    /// Called after a write to an MMU control register may have changed
    /// translation state; `mode` is the current PSW mode.
    fn set_mmu_mode(&mut self, mode: u8);

    /// True while the CPU is halted; the line clock does not tick then.
    fn halted(&self) -> bool {
        false
    }

    // --- terminals and printer ---

    fn terminal_put(&mut self, unit: u8, ch: u8);
    fn terminal_reset(&mut self, unit: u8);
    fn printer_put(&mut self, ch: u8);

    // --- backing object store ---

    /// Start an asynchronous positioned read of `[start, end]` (closed
    /// interval) from the image named by `url`. Completion is reported by
    /// the shell calling
    /// [`IoBus::fetch_complete`](crate::iopage::IoBus::fetch_complete) with
    /// the same drive id. At most one fetch is in flight per drive.
    fn fetch_range(&mut self, drive: DriveId, url: &str, start: u64, end: u64);

    /// Abort the in-flight fetch for `drive`, if any. No completion call
    /// follows a cancel.
    fn cancel_fetch(&mut self, drive: DriveId);
}
