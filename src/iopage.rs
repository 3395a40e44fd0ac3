//! The Unibus I/O page: address-decoded access to every device register
//!
//! The top 8 KiB of the 22-bit physical address space is decoded here. The
//! CPU calls [`IoBus::access`] with a physical address, either a value to
//! write or `None` for a read, and a byte-access flag. Reads return the
//! register's current word; writes are merged into the existing word by
//! byte position, then applied through each register's own writable /
//! read-only / write-1-to-clear masks. A word access to an odd address is
//! a bus error before any register is touched.
//!
//! [`IoBus`] owns every controller, the disk subsystem, the MMU register
//! files and the CPU-adjacent housekeeping registers, and routes transfer
//! completions and deferred queue events back to their devices.

use crate::bus::{Bus, Device, DriveId, FetchStatus, IoEvent, Trap};
use crate::components::dl11::Dl11;
use crate::components::kw11::Kw11;
use crate::components::lp11::Lp11;
use crate::components::ptr11::Ptr11;
use crate::components::rk11::{Rk11, RkAction};
use crate::components::rl11::Rl11;
use crate::components::rp11::Rp11;
use crate::components::tm11::Tm11;
use crate::mmu::Mmu;
use crate::storage::transfer::{Completion, Transfer};
use crate::storage::DiskSubsystem;

/// CPU-error reason code for a word access to an odd I/O address.
const CODE_ODD_ADDRESS: u16 = 0o212;
/// CPU-error reason code for an unmapped I/O page address.
const CODE_UNMAPPED: u16 = 0o204;

/// Program interrupt request vector.
const PIRQ_VECTOR: u16 = 0o240;

/// Default memory size: the full 22-bit space below the I/O page.
const DEFAULT_MEMORY_SIZE: u32 = 0o17760000;

/// Cache blocks needed to hold `bytes` of media.
fn block_ceiling(bytes: u64) -> u32 {
    bytes.div_ceil(crate::storage::cache::BLOCK_SIZE) as u32
}

/// Merge a write into the current register word by byte position: byte
/// writes to an even address replace the low byte, to an odd address the
/// high byte (the value arrives in the low 8 bits); word writes replace
/// the whole register.
pub(crate) fn merge(old: u16, data: u16, addr: u32, byte: bool) -> u16 {
    if !byte {
        data
    } else if addr & 1 != 0 {
        ((data & 0xFF) << 8) | (old & 0x00FF)
    } else {
        (old & 0xFF00) | (data & 0xFF)
    }
}

/// The I/O page and everything behind it.
pub struct IoBus {
    pub rk11: Rk11,
    pub rl11: Rl11,
    pub rp11: Rp11,
    pub tm11: Tm11,
    pub ptr: Ptr11,
    pub lp11: Lp11,
    pub dl11: Dl11,
    pub kw11: Kw11,
    pub mmu: Mmu,
    pub disks: DiskSubsystem,
    /// Program interrupt request register.
    pub pir: u16,
    pub stack_limit: u16,
    pub cpu_error: u16,
    pub micro_break: u16,
    /// Console switch register (read side); writes land in the display.
    pub switch_register: u16,
    pub display_register: u16,
    /// Memory system error/cache registers (017777740–017777752).
    pub memory_system: [u16; 6],
    /// Installed memory in bytes, reported by the size registers.
    pub memory_size: u32,
}

impl IoBus {
    pub fn new() -> Self {
        IoBus {
            rk11: Rk11::new(),
            rl11: Rl11::new(),
            rp11: Rp11::new(),
            tm11: Tm11::new(),
            ptr: Ptr11::new(),
            lp11: Lp11::new(),
            dl11: Dl11::new(),
            kw11: Kw11::new(),
            mmu: Mmu::new(),
            disks: DiskSubsystem::new(),
            pir: 0,
            stack_limit: 0,
            cpu_error: 0,
            micro_break: 0,
            switch_register: 0,
            display_register: 0,
            memory_system: [0; 6],
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }

    // --- shell-facing configuration and entry points ---

    /// Name the paper-tape image for the reader.
    pub fn set_ptr_file(&mut self, name: &str) {
        self.ptr.filename = name.to_string();
    }

    pub fn set_switch_register(&mut self, value: u16) {
        self.switch_register = value;
    }

    /// Record a trap cause in the CPU error register (CPU collaborator).
    pub fn set_cpu_error(&mut self, bits: u16) {
        self.cpu_error |= bits;
    }

    /// Translate an 18-bit Unibus address (DMA and CPU alike).
    pub fn map_unibus(&self, addr: u32) -> u32 {
        self.mmu.map_unibus(addr)
    }

    /// Character arrival for a serial line. Refused while the previous
    /// character is unread.
    pub fn dl11_input(&mut self, bus: &mut dyn Bus, unit: usize, ch: u8) -> bool {
        self.dl11.input(bus, unit, ch)
    }

    /// Line-clock tick; returns the delay in ms until the next one.
    pub fn clock_tick(&mut self, bus: &mut dyn Bus, now_ms: u64) -> u64 {
        self.kw11.tick(bus, now_ms)
    }

    /// A queue entry carrying deferred device work has matured; returns
    /// whether its interrupt should be delivered.
    pub fn io_event(&mut self, bus: &mut dyn Bus, event: IoEvent) -> bool {
        match event {
            IoEvent::RkStart => {
                match self.rk11.start(bus) {
                    RkAction::Reset => self.disks.abort(bus, Device::Rk11),
                    RkAction::Transfer(id, t) => self.start_io(bus, id, t),
                    RkAction::None => {}
                }
                false
            }
            IoEvent::RkSeekEnd { unit } => self.rk11.seek_end(unit),
            IoEvent::LpDone => self.lp11.print_done(),
            IoEvent::DlTxDone { unit } => self.dl11.tx_done(unit),
        }
    }

    /// A range fetch finished; install it and resume the suspended
    /// transfer.
    pub fn fetch_complete(
        &mut self,
        bus: &mut dyn Bus,
        drive: DriveId,
        status: FetchStatus,
        body: &[u8],
    ) {
        if let Some(c) = self.disks.fetch_complete(bus, &self.mmu, drive, status, body) {
            self.finish(bus, c);
        }
    }

    /// The CPU's RESET instruction: CPU-adjacent registers, the interrupt
    /// queue, MMU state and every device. Cached disk blocks survive.
    pub fn reset(&mut self, bus: &mut dyn Bus) {
        self.pir = 0;
        self.stack_limit = 0;
        self.cpu_error = 0;
        self.micro_break = 0;
        bus.clear_interrupts();
        self.mmu.reset();
        bus.set_mmu_mode(((bus.psw() >> 14) & 3) as u8);
        self.dl11.reset(bus);
        self.ptr.reset(bus);
        self.lp11.reset(bus);
        self.kw11.reset(bus);
        self.rk11.reset(bus);
        self.rl11.reset(bus);
        self.rp11.reset(bus);
        self.tm11.reset(bus);
        for device in [Device::Rk11, Device::Rl11, Device::Rp11, Device::Tm11, Device::Ptr] {
            self.disks.abort(bus, device);
        }
    }

    // --- the dispatcher ---

    /// Decoded I/O page access. `data` is `None` for a read; byte writes
    /// carry the value in the low 8 bits. Returns the register word read
    /// (0 for writes), or the bus-error trap to take.
    pub fn access(
        &mut self,
        bus: &mut dyn Bus,
        physical: u32,
        data: Option<u16>,
        byte: bool,
    ) -> Result<u16, Trap> {
        let addr = physical & 0o17777777;

        // The console register block maps one register per byte address
        // and bypasses the byte-merge machinery entirely.
        if (0o17777700..=0o17777717).contains(&addr) {
            return Ok(self.console_register(bus, addr, data));
        }

        if addr & 1 != 0 && !byte {
            return Err(Trap {
                vector: 4,
                code: CODE_ODD_ADDRESS,
            });
        }

        match addr & !1 {
            // CPU control block
            0o17777776 => {
                if let Some(data) = data {
                    let merged = merge(bus.psw(), data, addr, byte);
                    bus.set_psw(merged);
                }
                Ok(bus.psw())
            }
            0o17777774 => {
                if let Some(data) = data {
                    self.stack_limit = merge(self.stack_limit, data, addr, byte) & 0xFF00;
                }
                Ok(self.stack_limit)
            }
            0o17777772 => {
                if let Some(data) = data {
                    let merged = merge(self.pir, data, addr, byte);
                    self.write_pir(bus, merged);
                }
                Ok(self.pir)
            }
            0o17777770 => {
                if let Some(data) = data {
                    self.micro_break = merge(self.micro_break, data, addr, byte);
                }
                Ok(self.micro_break)
            }
            0o17777766 => {
                if data.is_some() {
                    self.cpu_error = 0;
                }
                Ok(self.cpu_error)
            }
            0o17777764 => Ok(1), // system ID
            0o17777762 => Ok(0), // upper size
            0o17777760 => Ok(((self.memory_size >> 6) - 1) as u16),

            // Memory system block: error address/status and cache control.
            // Stored so boot-time probes read back what they wrote.
            0o17777740..=0o17777752 => {
                let index = (((addr & !1) - 0o17777740) >> 1) as usize;
                if let Some(data) = data {
                    self.memory_system[index] =
                        merge(self.memory_system[index], data, addr, byte);
                }
                Ok(self.memory_system[index])
            }

            // User-mode segmentation
            0o17777600..=0o17777676 => Ok(self.page_register(3, 0o17777600, addr, data, byte)),

            // Memory management status block and console switches
            0o17777576 => Ok(self.mmu.mmr2),
            0o17777574 => Ok(self.mmu.mmr1),
            0o17777572 => {
                if let Some(data) = data {
                    let merged = merge(self.mmu.mmr0, data, addr, byte);
                    self.mmu.write_mmr0(merged);
                    bus.set_mmu_mode(((bus.psw() >> 14) & 3) as u8);
                }
                Ok(self.mmu.mmr0)
            }
            0o17777570 => {
                if let Some(data) = data {
                    self.display_register = merge(self.display_register, data, addr, byte);
                }
                Ok(self.switch_register)
            }

            // Console terminal
            0o17777560..=0o17777566 => {
                let (unit, register) = Dl11::decode(addr).expect("console address");
                Ok(self.dl11.access(bus, unit, register, data, byte, addr))
            }

            // Paper-tape reader
            0o17777550..=0o17777552 => {
                let (value, go) = self.ptr.access(addr, data, byte);
                if go {
                    self.ptr_go(bus);
                }
                Ok(value)
            }

            0o17777546 => Ok(self.kw11.access(addr, data, byte)),

            0o17777514..=0o17777516 => Ok(self.lp11.access(bus, addr, data, byte)),

            // RK11 (kickoff rides the queue, not this call)
            0o17777400..=0o17777416 => Ok(self.rk11.access(bus, addr, data, byte)),

            // RP11
            0o17776700..=0o17776752 => {
                let (value, go) = self.rp11.access(bus, addr, data, byte);
                if go {
                    if let Some((id, t)) = self.rp11.start(bus) {
                        self.start_io(bus, id, t);
                    }
                }
                Ok(value)
            }

            // Additional terminals
            0o17776500..=0o17776536 => {
                let (unit, register) = Dl11::decode(addr).expect("dl11 address");
                Ok(self.dl11.access(bus, unit, register, data, byte, addr))
            }

            // RL11
            0o17774400..=0o17774406 => {
                let (value, go) = self.rl11.access(addr, data, byte);
                if go {
                    if let Some((id, t)) = self.rl11.start(bus) {
                        self.start_io(bus, id, t);
                    }
                }
                Ok(value)
            }

            // MMR3 and the tape controller
            0o17772516 => {
                if let Some(data) = data {
                    let merged = merge(self.mmu.mmr3, data, addr, byte);
                    self.mmu.write_mmr3(merged);
                    bus.set_mmu_mode(((bus.psw() >> 14) & 3) as u8);
                }
                Ok(self.mmu.mmr3)
            }
            0o17772520..=0o17772532 => {
                let id = self.tm11.drive_id();
                let at_bot = self.disks.get(id).map_or(true, |d| d.position == 0);
                let (value, go) = self.tm11.access(addr, data, byte, at_bot);
                if go {
                    self.tm11_go(bus);
                }
                Ok(value)
            }

            // Kernel and supervisor segmentation
            0o17772300..=0o17772376 => Ok(self.page_register(0, 0o17772300, addr, data, byte)),
            0o17772200..=0o17772276 => Ok(self.page_register(1, 0o17772200, addr, data, byte)),

            // Unibus map
            0o17770200..=0o17770376 => {
                let offset = (addr & !1) - 0o17770200;
                let index = (offset >> 2) as usize;
                let high = offset & 2 != 0;
                if let Some(data) = data {
                    let merged = merge(self.mmu.map_half(index, high), data, addr, byte);
                    self.mmu.set_map_half(index, high, merged);
                }
                Ok(self.mmu.map_half(index, high))
            }

            _ => Err(Trap {
                vector: 4,
                code: CODE_UNMAPPED,
            }),
        }
    }

    /// 017777700–017777717: the general registers, per-mode stack
    /// pointers and PC, one logical register per byte address, whole-word
    /// semantics for reads and writes alike.
    fn console_register(&mut self, bus: &mut dyn Bus, addr: u32, data: Option<u16>) -> u16 {
        let which = addr & 0o17;
        let current = ((bus.psw() >> 11) & 1) as u8;
        match which {
            0..=5 => {
                if let Some(data) = data {
                    bus.set_register(current, which as u8, data);
                }
                bus.register(current, which as u8)
            }
            6 => {
                if let Some(data) = data {
                    bus.set_stack_pointer(0, data);
                }
                bus.stack_pointer(0)
            }
            7 => {
                if let Some(data) = data {
                    bus.set_pc(data);
                }
                bus.pc()
            }
            0o10..=0o15 => {
                let other = 1 - current;
                let index = (which - 0o10) as u8;
                if let Some(data) = data {
                    bus.set_register(other, index, data);
                }
                bus.register(other, index)
            }
            0o16 => {
                if let Some(data) = data {
                    bus.set_stack_pointer(1, data);
                }
                bus.stack_pointer(1)
            }
            _ => {
                if let Some(data) = data {
                    bus.set_stack_pointer(3, data);
                }
                bus.stack_pointer(3)
            }
        }
    }

    /// PDR/PAR window for one mode: sixteen descriptors, then sixteen
    /// address registers.
    fn page_register(
        &mut self,
        mode: u8,
        base: u32,
        addr: u32,
        data: Option<u16>,
        byte: bool,
    ) -> u16 {
        let offset = (addr & !1) - base;
        let index = ((offset & 0o37) >> 1) as usize;
        let is_par = offset & 0o40 != 0;
        if let Some(data) = data {
            if is_par {
                let merged = merge(self.mmu.par(mode, index), data, addr, byte);
                self.mmu.set_par(mode, index, merged);
            } else {
                let merged = merge(self.mmu.pdr(mode, index), data, addr, byte);
                self.mmu.set_pdr(mode, index, merged);
            }
        }
        if is_par {
            self.mmu.par(mode, index)
        } else {
            self.mmu.pdr(mode, index)
        }
    }

    fn write_pir(&mut self, bus: &mut dyn Bus, value: u16) {
        let mut pir = value & 0xFE00;
        let mut level = 0u16;
        for l in 1..=7 {
            if pir & (0o400 << l) != 0 {
                level = l;
            }
        }
        pir |= (level << 5) | (level << 1);
        self.pir = pir;
        bus.cancel_interrupts(PIRQ_VECTOR);
        if level > 0 {
            bus.interrupt(0, level as u8, PIRQ_VECTOR, None);
        }
    }

    // --- transfer plumbing ---

    fn ptr_go(&mut self, bus: &mut dyn Bus) {
        if self.ptr.filename.is_empty() {
            self.ptr.fail(bus);
            return;
        }
        let id = self.ptr.drive_id();
        let url = self.ptr.filename.clone();
        let transfer = {
            let drive = self.disks.attach(id, &url, false, 0);
            self.ptr.start(drive)
        };
        self.start_io(bus, id, transfer);
    }

    fn tm11_go(&mut self, bus: &mut dyn Bus) {
        let id = self.tm11.drive_id();
        let url = format!("tm{}.tap", id.unit);
        let transfer = {
            let drive = self.disks.attach(id, &url, true, 0);
            self.tm11.start(bus, drive)
        };
        if let Some(t) = transfer {
            self.start_io(bus, id, t);
        }
    }

    /// Hand a transfer to the engine, creating the drive record on first
    /// touch, and route a synchronous completion straight back.
    fn start_io(&mut self, bus: &mut dyn Bus, id: DriveId, transfer: Transfer) {
        self.ensure_drive(id);
        if let Some(c) = self.disks.start(bus, &self.mmu, id, transfer) {
            self.finish(bus, c);
        }
    }

    fn ensure_drive(&mut self, id: DriveId) {
        let unit = id.unit as usize;
        match id.device {
            Device::Rk11 => {
                let bytes =
                    self.rk11.tracks[unit] as u64 * self.rk11.sectors[unit] as u64 * 512;
                self.disks
                    .attach(id, &format!("rk{}.dsk", id.unit), true, block_ceiling(bytes));
            }
            Device::Rl11 => {
                let bytes = self.rl11.tracks[unit] as u64 * 40 * 256;
                self.disks
                    .attach(id, &format!("rl{}.dsk", id.unit), true, block_ceiling(bytes));
            }
            Device::Rp11 => {
                let drive = &self.rp11.drives[unit];
                let bytes = drive.cylinders as u64
                    * drive.surfaces as u64
                    * drive.sectors as u64
                    * 512;
                self.disks
                    .attach(id, &format!("rp{}.dsk", id.unit), false, block_ceiling(bytes));
            }
            Device::Tm11 => {
                self.disks.attach(id, &format!("tm{}.tap", id.unit), true, 0);
            }
            Device::Ptr => {
                let url = self.ptr.filename.clone();
                self.disks.attach(id, &url, false, 0);
            }
        }
    }

    /// Route a transfer completion to its controller, then keep running
    /// any follow-up transfers (tape data phases, spacing) until the chain
    /// completes or suspends on a fetch.
    fn finish(&mut self, bus: &mut dyn Bus, mut c: Completion) {
        loop {
            let followup = match c.drive.device {
                Device::Rk11 => {
                    self.rk11.end(bus, &c);
                    None
                }
                Device::Rl11 => {
                    self.rl11.end(bus, &c);
                    None
                }
                Device::Rp11 => {
                    self.rp11.end(bus, &c);
                    None
                }
                Device::Tm11 => {
                    let drive = self.disks.get_mut(c.drive).expect("tape drive attached");
                    self.tm11.end(bus, drive, &c)
                }
                Device::Ptr => {
                    let drive = self.disks.get_mut(c.drive).expect("reader drive attached");
                    self.ptr.end(bus, drive, &c);
                    None
                }
            };
            let Some(next) = followup else { break };
            match self.disks.start(bus, &self.mmu, c.drive, next) {
                Some(done) => c = done,
                None => break,
            }
        }
    }
}

impl Default for IoBus {
    fn default() -> Self {
        IoBus::new()
    }
}
