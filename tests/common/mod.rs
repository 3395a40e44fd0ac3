//! Shared test harness: a recording shell around the I/O subsystem
//!
//! `TestBus` implements the collaborator side of the `Bus` contract over a
//! flat memory, an interrupt queue drained in priority-then-insertion
//! order, and a scripted image store that answers range fetches with
//! 200/206/416/failure responses. `run` plays the shell's event loop until
//! the subsystem goes idle, so tests observe the same suspend/resume
//! sequencing the emulator would.

// Not every suite uses every helper or register constant.
#![allow(dead_code)]

use pdp1170::bus::{Bus, DriveId, FetchStatus, IoEvent, Nxm};
use pdp1170::IoBus;
use std::collections::{HashMap, VecDeque};

// Register addresses shared across suites.
pub const RKCS: u32 = 0o17777404;
pub const RKWC: u32 = 0o17777406;
pub const RKBA: u32 = 0o17777410;
pub const RKDA: u32 = 0o17777412;

pub const RLCS: u32 = 0o17774400;
pub const RLBA: u32 = 0o17774402;
pub const RLDA: u32 = 0o17774404;
pub const RLMP: u32 = 0o17774406;

pub const RPCS1: u32 = 0o17776700;
pub const RPWC: u32 = 0o17776702;
pub const RPBA: u32 = 0o17776704;
pub const RPDA: u32 = 0o17776706;
pub const RPCS2: u32 = 0o17776710;
pub const RPDC: u32 = 0o17776734;

pub const MTS: u32 = 0o17772520;
pub const MTC: u32 = 0o17772522;
pub const MTBRC: u32 = 0o17772524;
pub const MTCMA: u32 = 0o17772526;

pub const PRS: u32 = 0o17777550;
pub const PRB: u32 = 0o17777552;

/// How the scripted store answers range requests for one image.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Serve {
    /// 206 with the requested byte range (or 416 past the end).
    Ranges,
    /// 200 with the whole image regardless of the requested range.
    WholeImage,
    /// Transport failure on every request.
    Broken,
}

struct Image {
    data: Vec<u8>,
    serve: Serve,
}

pub struct FetchRequest {
    pub drive: DriveId,
    pub url: String,
    pub start: u64,
    pub end: u64,
}

struct QueueEntry {
    delay: u32,
    priority: u8,
    vector: u16,
    event: Option<IoEvent>,
    seq: u64,
}

#[derive(Default)]
pub struct TestBus {
    pub memory: Vec<u8>,
    pub registers: [[u16; 6]; 2],
    pub stack_pointers: [u16; 4],
    pub pc: u16,
    pub psw: u16,
    pub halted: bool,
    pub mmu_mode_calls: Vec<u8>,
    pub terminal: Vec<(u8, u8)>,
    pub terminal_resets: Vec<u8>,
    pub printed: Vec<u8>,
    /// Interrupts actually delivered, as (vector, priority).
    pub delivered: Vec<(u16, u8)>,
    pub fetches: VecDeque<FetchRequest>,
    pub fetch_cancels: Vec<DriveId>,
    images: HashMap<String, Image>,
    queue: Vec<QueueEntry>,
    seq: u64,
    cleared: u32,
}

impl TestBus {
    pub fn new() -> Self {
        TestBus {
            memory: vec![0; 0o1000000],
            ..Default::default()
        }
    }

    pub fn with_memory(bytes: usize) -> Self {
        TestBus {
            memory: vec![0; bytes],
            ..Default::default()
        }
    }

    pub fn serve_image(&mut self, url: &str, data: Vec<u8>, serve: Serve) {
        self.images.insert(url.to_string(), Image { data, serve });
    }

    pub fn pending_interrupts(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_count(&self) -> u32 {
        self.cleared
    }

    pub fn read_memory_word(&self, addr: u32) -> u16 {
        let a = addr as usize;
        self.memory[a] as u16 | ((self.memory[a + 1] as u16) << 8)
    }

    pub fn load_memory(&mut self, addr: u32, data: &[u8]) {
        let a = addr as usize;
        self.memory[a..a + data.len()].copy_from_slice(data);
    }

    fn pop_event(&mut self) -> Option<QueueEntry> {
        if self.queue.is_empty() {
            return None;
        }
        let mut best = 0;
        for i in 1..self.queue.len() {
            let (a, b) = (&self.queue[i], &self.queue[best]);
            if (a.delay, std::cmp::Reverse(a.priority), a.seq)
                < (b.delay, std::cmp::Reverse(b.priority), b.seq)
            {
                best = i;
            }
        }
        Some(self.queue.remove(best))
    }

    fn respond(&self, request: &FetchRequest) -> (FetchStatus, Vec<u8>) {
        let Some(image) = self.images.get(&request.url) else {
            return (FetchStatus::Failed, Vec::new());
        };
        match image.serve {
            Serve::Broken => (FetchStatus::Failed, Vec::new()),
            Serve::WholeImage => (FetchStatus::Full, image.data.clone()),
            Serve::Ranges => {
                let len = image.data.len() as u64;
                if request.start >= len {
                    return (FetchStatus::OutOfRange, Vec::new());
                }
                let end = (request.end + 1).min(len);
                (
                    FetchStatus::Partial,
                    image.data[request.start as usize..end as usize].to_vec(),
                )
            }
        }
    }
}

impl Bus for TestBus {
    fn read_word(&mut self, addr: u32) -> Result<u16, Nxm> {
        let a = addr as usize;
        if a + 1 >= self.memory.len() {
            return Err(Nxm);
        }
        Ok(self.memory[a] as u16 | ((self.memory[a + 1] as u16) << 8))
    }

    fn write_word(&mut self, addr: u32, value: u16) -> Result<(), Nxm> {
        let a = addr as usize;
        if a + 1 >= self.memory.len() {
            return Err(Nxm);
        }
        self.memory[a] = value as u8;
        self.memory[a + 1] = (value >> 8) as u8;
        Ok(())
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), Nxm> {
        let a = addr as usize;
        if a >= self.memory.len() {
            return Err(Nxm);
        }
        self.memory[a] = value;
        Ok(())
    }

    fn interrupt(&mut self, delay: u32, priority: u8, vector: u16, event: Option<IoEvent>) {
        self.seq += 1;
        self.queue.push(QueueEntry {
            delay,
            priority,
            vector,
            event,
            seq: self.seq,
        });
    }

    fn cancel_interrupts(&mut self, vector: u16) {
        self.queue.retain(|e| e.vector != vector);
    }

    fn clear_interrupts(&mut self) {
        self.queue.clear();
        self.cleared += 1;
    }

    fn register(&self, set: u8, index: u8) -> u16 {
        self.registers[set as usize][index as usize]
    }

    fn set_register(&mut self, set: u8, index: u8, value: u16) {
        self.registers[set as usize][index as usize] = value;
    }

    fn stack_pointer(&self, mode: u8) -> u16 {
        self.stack_pointers[mode as usize]
    }

    fn set_stack_pointer(&mut self, mode: u8, value: u16) {
        self.stack_pointers[mode as usize] = value;
    }

    fn pc(&self) -> u16 {
        self.pc
    }

    fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    fn psw(&self) -> u16 {
        self.psw
    }

    fn set_psw(&mut self, value: u16) {
        self.psw = value;
    }

    fn set_mmu_mode(&mut self, mode: u8) {
        self.mmu_mode_calls.push(mode);
    }

    fn halted(&self) -> bool {
        self.halted
    }

    fn terminal_put(&mut self, unit: u8, ch: u8) {
        self.terminal.push((unit, ch));
    }

    fn terminal_reset(&mut self, unit: u8) {
        self.terminal_resets.push(unit);
    }

    fn printer_put(&mut self, ch: u8) {
        self.printed.push(ch);
    }

    fn fetch_range(&mut self, drive: DriveId, url: &str, start: u64, end: u64) {
        self.fetches.push_back(FetchRequest {
            drive,
            url: url.to_string(),
            start,
            end,
        });
    }

    fn cancel_fetch(&mut self, drive: DriveId) {
        self.fetch_cancels.push(drive);
    }
}

/// Service fetches and drain the queue until the subsystem is idle.
pub fn run(io: &mut IoBus, bus: &mut TestBus) {
    loop {
        if let Some(request) = bus.fetches.pop_front() {
            let (status, body) = bus.respond(&request);
            io.fetch_complete(bus, request.drive, status, &body);
            continue;
        }
        if let Some(entry) = bus.pop_event() {
            match entry.event {
                Some(event) => {
                    if io.io_event(bus, event) {
                        bus.delivered.push((entry.vector, entry.priority));
                    }
                }
                None => bus.delivered.push((entry.vector, entry.priority)),
            }
            continue;
        }
        break;
    }
}

/// Drain exactly one queue entry, leaving pending fetches alone.
pub fn step_event(io: &mut IoBus, bus: &mut TestBus) -> bool {
    let Some(entry) = bus.pop_event() else {
        return false;
    };
    match entry.event {
        Some(event) => {
            if io.io_event(bus, event) {
                bus.delivered.push((entry.vector, entry.priority));
            }
        }
        None => bus.delivered.push((entry.vector, entry.priority)),
    }
    true
}

/// Service exactly one pending fetch, leaving queued events alone.
pub fn service_one_fetch(io: &mut IoBus, bus: &mut TestBus) -> bool {
    if let Some(request) = bus.fetches.pop_front() {
        let (status, body) = bus.respond(&request);
        io.fetch_complete(bus, request.drive, status, &body);
        true
    } else {
        false
    }
}

/// Convenience word write through the dispatcher.
pub fn poke(io: &mut IoBus, bus: &mut TestBus, addr: u32, value: u16) {
    io.access(bus, addr, Some(value), false).expect("io write");
}

/// Convenience word read through the dispatcher.
pub fn peek(io: &mut IoBus, bus: &mut TestBus, addr: u32) -> u16 {
    io.access(bus, addr, None, false).expect("io read")
}
