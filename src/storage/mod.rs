//! Drive records, block fetching, and the transfer engine
//!
//! Each (controller, unit) pair gets a lazily created [`Drive`] record
//! holding its sparse [`ImageCache`], backing-store locator, and any
//! suspended transfer. The engine moves words between emulated memory and
//! cache blocks; when it touches an absent block it parks the transfer on
//! the drive, asks the shell for a 1 MiB byte range, and resumes from the
//! saved state when [`DiskSubsystem::fetch_complete`] installs the bytes.
//!
//! The engine never returns with a transfer half-alive: every call path
//! ends in either a [`Completion`] for the owning controller or a parked
//! transfer with a fetch in flight.

pub mod cache;
pub mod transfer;

use crate::bus::{Bus, Device, DriveId, FetchStatus};
use crate::mmu::Mmu;
use cache::{ImageCache, BLOCK_SIZE};
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use thiserror::Error;
use transfer::{Completion, Transfer, TransferOp, TransferStatus};

/// Failure talking to the backing object store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("range fetch failed for {url} block {block}")]
    Transport { url: String, block: u32 },
}

/// Per-drive state: cache, locator, and transfer/fetch bookkeeping.
pub struct Drive {
    pub cache: ImageCache,
    pub url: String,
    /// DMA addresses go through the Unibus map when set.
    pub mapped: bool,
    /// Advisory cache-block ceiling from the controller's geometry; zero
    /// means unbounded. Blocks past it are zero-filled without a fetch.
    pub max_block: u32,
    pub unit: u8,
    /// Media byte position (tape and paper tape).
    pub position: u64,
    /// In-flight function code (tape).
    pub command: u16,
    /// Total image length, once a response has revealed it.
    pub size: Option<u64>,
    pending: Option<Transfer>,
    fetching: Option<u32>,
}

impl Drive {
    fn new(unit: u8, url: String, mapped: bool, max_block: u32) -> Self {
        Drive {
            cache: ImageCache::new(),
            url,
            mapped,
            max_block,
            unit,
            position: 0,
            command: 0,
            size: None,
            pending: None,
            fetching: None,
        }
    }

    pub fn busy(&self) -> bool {
        self.pending.is_some() || self.fetching.is_some()
    }

    fn learn_size(&mut self, bound: u64) {
        self.size = Some(match self.size {
            Some(s) => s.min(bound),
            None => bound,
        });
    }
}

/// All drives of all controllers, plus the transfer engine.
#[derive(Default)]
pub struct DiskSubsystem {
    drives: BTreeMap<DriveId, Drive>,
}

impl DiskSubsystem {
    pub fn new() -> Self {
        DiskSubsystem::default()
    }

    /// Look up a drive, creating it on first reference. Creation never
    /// drops cache contents of an existing record.
    pub fn attach(&mut self, id: DriveId, url: &str, mapped: bool, max_block: u32) -> &mut Drive {
        self.drives
            .entry(id)
            .or_insert_with(|| Drive::new(id.unit, url.to_string(), mapped, max_block))
    }

    pub fn get(&self, id: DriveId) -> Option<&Drive> {
        self.drives.get(&id)
    }

    pub fn get_mut(&mut self, id: DriveId) -> Option<&mut Drive> {
        self.drives.get_mut(&id)
    }

    /// Start a transfer on an attached drive. Returns the completion if it
    /// ran to the end synchronously (all blocks resident), `None` if it
    /// suspended on a block fetch.
    pub fn start(
        &mut self,
        bus: &mut dyn Bus,
        mmu: &Mmu,
        id: DriveId,
        transfer: Transfer,
    ) -> Option<Completion> {
        debug_assert!(!self.drives[&id].busy(), "one transfer per unit");
        self.run(bus, mmu, id, transfer)
    }

    /// Install the outcome of a range fetch and resume the parked transfer.
    pub fn fetch_complete(
        &mut self,
        bus: &mut dyn Bus,
        mmu: &Mmu,
        id: DriveId,
        status: FetchStatus,
        body: &[u8],
    ) -> Option<Completion> {
        let drive = self.drives.get_mut(&id)?;
        let block = drive.fetching.take()?;
        match status {
            FetchStatus::Full => {
                debug!("{:?}: full image response, {} bytes", id, body.len());
                drive.cache.install(0, body);
                drive.learn_size(body.len() as u64);
            }
            FetchStatus::Partial => {
                trace!("{:?}: partial response for block {}", id, block);
                drive.cache.install(block, body);
                if (body.len() as u64) < BLOCK_SIZE {
                    drive.learn_size(block as u64 * BLOCK_SIZE + body.len() as u64);
                }
            }
            FetchStatus::OutOfRange => {
                // Past end of image: the block reads as zeros.
                drive.cache.install_zero(block);
                drive.learn_size(block as u64 * BLOCK_SIZE);
            }
            FetchStatus::Failed => {
                let err = FetchError::Transport {
                    url: drive.url.clone(),
                    block,
                };
                warn!("{err}");
                let t = drive.pending.take()?;
                return Some(Completion {
                    drive: id,
                    op: t.op,
                    status: TransferStatus::ReadError,
                    position: t.position,
                    address: t.address,
                    count: t.count,
                });
            }
        }
        // Whatever the response covered, the requested block must now
        // exist or the resume below would re-issue the same fetch.
        drive.cache.install_zero(block);
        let t = drive.pending.take()?;
        self.run(bus, mmu, id, t)
    }

    /// Abort in-flight work on every drive of one controller: cancel the
    /// fetch, drop the parked transfer, keep the cache.
    pub fn abort(&mut self, bus: &mut dyn Bus, device: Device) {
        for (id, drive) in self.drives.iter_mut() {
            if id.device != device {
                continue;
            }
            if drive.fetching.take().is_some() {
                bus.cancel_fetch(*id);
            }
            drive.pending = None;
        }
    }

    fn run(
        &mut self,
        bus: &mut dyn Bus,
        mmu: &Mmu,
        id: DriveId,
        mut t: Transfer,
    ) -> Option<Completion> {
        let drive = self.drives.get_mut(&id).expect("drive attached");
        while t.count > 0 {
            let block = (t.position / BLOCK_SIZE) as u32;
            if !drive.cache.contains(block) {
                if drive.max_block > 0 && block >= drive.max_block {
                    // Past the configured geometry nothing is backed.
                    drive.cache.install_zero(block);
                } else {
                    let start = block as u64 * BLOCK_SIZE;
                    trace!("{:?}: block {} miss, fetching", id, block);
                    drive.pending = Some(t);
                    drive.fetching = Some(block);
                    bus.fetch_range(id, &drive.url, start, start + BLOCK_SIZE - 1);
                    return None;
                }
            }
            let mut offset = (t.position % BLOCK_SIZE) as usize;
            while t.count > 0 {
                match t.op {
                    TransferOp::Write => {
                        let phys = target(mmu, drive.mapped, t.address);
                        let word = match bus.read_word(phys) {
                            Ok(word) => word,
                            Err(_) => return Some(complete(id, &t, TransferStatus::Nxm)),
                        };
                        drive.cache.set_word(block, offset, word);
                        t.address = t.address.wrapping_add(2);
                        t.count = t.count.saturating_sub(2);
                        t.position += 2;
                        offset += 2;
                    }
                    TransferOp::Read => {
                        let word = drive.cache.word(block, offset);
                        let phys = target(mmu, drive.mapped, t.address);
                        if t.count > 1 {
                            if bus.write_word(phys, word).is_err() {
                                return Some(complete(id, &t, TransferStatus::Nxm));
                            }
                            t.address = t.address.wrapping_add(2);
                            t.count -= 2;
                            t.position += 2;
                            offset += 2;
                        } else {
                            if bus.write_byte(phys, word as u8).is_err() {
                                return Some(complete(id, &t, TransferStatus::Nxm));
                            }
                            t.address = t.address.wrapping_add(1);
                            t.count = 0;
                            t.position += 1;
                            offset += 1;
                        }
                    }
                    TransferOp::Check => {
                        let phys = target(mmu, drive.mapped, t.address);
                        let word = match bus.read_word(phys) {
                            Ok(word) => word,
                            Err(_) => return Some(complete(id, &t, TransferStatus::Nxm)),
                        };
                        if word != drive.cache.word(block, offset) {
                            return Some(complete(id, &t, TransferStatus::CompareError));
                        }
                        t.address = t.address.wrapping_add(2);
                        t.count = t.count.saturating_sub(2);
                        t.position += 2;
                        offset += 2;
                    }
                    TransferOp::ReadLength => {
                        let word = drive.cache.word(block, offset);
                        t.address = (t.address >> 16) | ((word as u32) << 16);
                        t.count = t.count.saturating_sub(2);
                        t.position += 2;
                        offset += 2;
                    }
                    TransferOp::ReadByte => {
                        t.address = drive.cache.byte(block, offset) as u32;
                        t.count = 0;
                    }
                }
                if offset >= BLOCK_SIZE as usize {
                    break;
                }
            }
        }
        Some(complete(id, &t, TransferStatus::Done))
    }
}

fn complete(id: DriveId, t: &Transfer, status: TransferStatus) -> Completion {
    Completion {
        drive: id,
        op: t.op,
        status,
        position: t.position,
        address: t.address,
        count: t.count,
    }
}

/// Resolve a transfer's DMA target to a 22-bit physical address.
fn target(mmu: &Mmu, mapped: bool, address: u32) -> u32 {
    if mapped {
        mmu.map_unibus(address & 0o777777)
    } else {
        address & 0o17777777
    }
}
