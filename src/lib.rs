//! PDP-11/70 Unibus I/O page and disk subsystem
//!
//! The register-decoded device zoo a PDP-11/70 operating system talks to:
//! disk and tape controllers backed by a demand-fetched block cache, the
//! console and serial lines, the line clock, the memory-management
//! register files and the Unibus map. The CPU core, interrupt queue and
//! backing object store are collaborators behind the [`bus::Bus`] trait.

pub mod bus;
pub mod components;
pub mod iopage;
pub mod mmu;
pub mod storage;

pub use bus::{Bus, Device, DriveId, FetchStatus, IoEvent, Nxm, Trap};
pub use iopage::IoBus;
