//! RP11/RH70 Massbus disk controller (RP04/RP06/RM03 drives)
//!
//! Eight drives with per-drive register files behind one set of controller
//! registers. DMA addresses are 22-bit, composed from the bus address
//! register and the bus address extension — transfers do not pass through
//! the Unibus map. Positioning functions complete by raising the drive's
//! attention bit; data transfers run through the transfer engine.
//!
//! Register window 017776700–017776752. Controller registers (CS1, WC, BA,
//! CS2, DB, AS, BAE, CS3) are always accessible; drive registers belong to
//! the unit selected in CS2 and read as zero when that unit is absent.

use crate::bus::{Bus, Device, DriveId};
use crate::iopage::merge;
use crate::storage::transfer::{Completion, Transfer, TransferOp, TransferStatus};
use log::trace;

// =============================================================================
// Constants
// =============================================================================

const BASE: u32 = 0o17776700;

pub const RP_VECTOR: u16 = 0o254;
const RP_PRIORITY: u8 = 5;
const RP_DELAY: u32 = 10;
const RP_SEEK_DELAY: u32 = 16;

/// CS1 bit definitions
const CS1_GO: u16 = 0o1;
const CS1_FUNC: u16 = 0o76;
const CS1_IE: u16 = 0o100;
const CS1_RDY: u16 = 0o200;
const CS1_A16_17: u16 = 0o1400; // mirrors BAE bits 0-1
const CS1_DVA: u16 = 0o4000; // selected drive available (read-only)
const CS1_TRE: u16 = 0o40000; // transfer error (write 1 to clear)
const CS1_SC: u16 = 0o100000; // special condition

/// CS2 bit definitions
const CS2_UNIT: u16 = 0o7;
const CS2_CLR: u16 = 0o40; // subsystem clear
const CS2_NEM: u16 = 0o4000; // nonexistent memory
const CS2_NED: u16 = 0o10000; // nonexistent drive
const CS2_WCE: u16 = 0o40000; // write check error

/// Drive status (DS) bit definitions
const DS_VV: u16 = 0o100; // volume valid
const DS_DRY: u16 = 0o200; // drive ready
const DS_DPR: u16 = 0o400; // drive present
const DS_MOL: u16 = 0o10000; // medium online
const DS_ERR: u16 = 0o40000;
const DS_ATA: u16 = 0o100000; // attention active

/// Error register 1 (ER1) bit definitions
const ER1_ILF: u16 = 0o1; // illegal function
const ER1_IAE: u16 = 0o2000; // invalid address
const ER1_DCK: u16 = 0o100000; // data check

const SECTOR_BYTES: u64 = 512;

/// Function codes (including the GO bit)
const FN_NOP: u16 = 0o1;
const FN_UNLOAD: u16 = 0o3;
const FN_SEEK: u16 = 0o5;
const FN_RECAL: u16 = 0o7;
const FN_DRIVE_CLEAR: u16 = 0o11;
const FN_RELEASE: u16 = 0o13;
const FN_OFFSET: u16 = 0o15;
const FN_CENTER: u16 = 0o17;
const FN_PRESET: u16 = 0o21;
const FN_PACK_ACK: u16 = 0o23;
const FN_SEARCH: u16 = 0o31;
const FN_WRITE: u16 = 0o61;
const FN_READ: u16 = 0o71;

// =============================================================================
// Drives
// =============================================================================

/// Massbus drive personality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpType {
    Rp04,
    Rp06,
    Rm03,
}

impl RpType {
    /// (cylinders, surfaces, sectors, drive-type register value)
    fn geometry(self) -> (u16, u16, u16, u16) {
        match self {
            RpType::Rp04 => (411, 19, 22, 0o20020),
            RpType::Rp06 => (815, 19, 22, 0o20022),
            RpType::Rm03 => (823, 5, 32, 0o20024),
        }
    }
}

/// Per-drive register file and geometry.
pub struct RpDrive {
    pub da: u16,
    pub ds: u16,
    pub er1: u16,
    pub mr: u16,
    pub of: u16,
    pub dc: u16,
    pub cc: u16,
    pub er2: u16,
    pub er3: u16,
    pub sn: u16,
    pub dt: u16,
    pub cylinders: u16,
    pub surfaces: u16,
    pub sectors: u16,
    pub present: bool,
}

impl RpDrive {
    fn absent() -> Self {
        RpDrive {
            da: 0,
            ds: 0,
            er1: 0,
            mr: 0,
            of: 0,
            dc: 0,
            cc: 0,
            er2: 0,
            er3: 0,
            sn: 0,
            dt: 0,
            cylinders: 0,
            surfaces: 0,
            sectors: 0,
            present: false,
        }
    }

    fn online(unit: u8, kind: RpType) -> Self {
        let (cylinders, surfaces, sectors, dt) = kind.geometry();
        RpDrive {
            ds: DS_MOL | DS_DPR | DS_DRY,
            sn: 0o10000 + unit as u16,
            dt,
            cylinders,
            surfaces,
            sectors,
            present: true,
            ..RpDrive::absent()
        }
    }

    fn reset_status(&mut self) {
        if self.present {
            self.ds = (self.ds & DS_VV) | DS_MOL | DS_DPR | DS_DRY;
        } else {
            self.ds = 0;
        }
        self.er1 = 0;
        self.er2 = 0;
        self.er3 = 0;
    }
}

// =============================================================================
// Controller
// =============================================================================

pub struct Rp11 {
    pub cs1: u16,
    pub wc: u16,
    pub ba: u16,
    pub cs2: u16,
    pub bae: u16,
    pub cs3: u16,
    pub db: u16,
    pub drives: [RpDrive; 8],
}

impl Rp11 {
    pub fn new() -> Self {
        let drives = std::array::from_fn(|unit| {
            if unit < 4 {
                RpDrive::online(unit as u8, RpType::Rp06)
            } else {
                RpDrive::absent()
            }
        });
        Rp11 {
            cs1: CS1_RDY,
            wc: 0,
            ba: 0,
            cs2: 0,
            bae: 0,
            cs3: 0,
            db: 0,
            drives,
        }
    }

    /// Replace one unit's personality (None detaches it).
    pub fn set_drive(&mut self, unit: u8, kind: Option<RpType>) {
        self.drives[unit as usize] = match kind {
            Some(kind) => RpDrive::online(unit, kind),
            None => RpDrive::absent(),
        };
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        bus.cancel_interrupts(RP_VECTOR);
        self.cs1 = CS1_RDY;
        self.wc = 0;
        self.ba = 0;
        self.cs2 = 0;
        self.bae = 0;
        self.cs3 = 0;
        self.db = 0;
        for drive in &mut self.drives {
            drive.reset_status();
        }
    }

    fn unit(&self) -> usize {
        (self.cs2 & CS2_UNIT) as usize
    }

    fn attention_mask(&self) -> u16 {
        let mut mask = 0;
        for (i, drive) in self.drives.iter().enumerate() {
            if drive.ds & DS_ATA != 0 {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Register access. Returns `(value, go)`; `go` means a data-transfer
    /// or positioning function was written and should be dispatched.
    pub fn access(
        &mut self,
        bus: &mut dyn Bus,
        addr: u32,
        data: Option<u16>,
        byte: bool,
    ) -> (u16, bool) {
        let mut go = false;
        let offset = (addr & !1) - BASE;
        let unit = self.unit();
        let value = match offset {
            0o00 => {
                // CS1
                if let Some(data) = data {
                    let merged = merge(self.read_cs1(), data, addr, byte);
                    if merged & CS1_TRE != 0 {
                        self.cs1 &= !CS1_TRE;
                        self.cs2 &= !(CS2_NEM | CS2_NED | CS2_WCE);
                    }
                    self.bae = (self.bae & !3) | ((merged >> 8) & 3);
                    self.cs1 = (self.cs1 & !(CS1_FUNC | CS1_IE | CS1_A16_17))
                        | (merged & (CS1_FUNC | CS1_IE | CS1_A16_17));
                    if merged & CS1_GO != 0 && self.cs1 & CS1_RDY != 0 {
                        go = true;
                    }
                }
                self.read_cs1()
            }
            0o02 => {
                if let Some(data) = data {
                    self.wc = merge(self.wc, data, addr, byte);
                }
                self.wc
            }
            0o04 => {
                if let Some(data) = data {
                    self.ba = merge(self.ba, data, addr, byte) & !1;
                }
                self.ba
            }
            0o10 => {
                // CS2
                if let Some(data) = data {
                    let merged = merge(self.cs2, data, addr, byte);
                    if merged & CS2_CLR != 0 {
                        self.reset(bus);
                    } else {
                        self.cs2 = (self.cs2 & !CS2_UNIT) | (merged & CS2_UNIT);
                        if !self.drives[self.unit()].present {
                            self.cs2 |= CS2_NED;
                            self.cs1 |= CS1_TRE | CS1_SC;
                        }
                    }
                }
                self.cs2
            }
            0o16 => {
                // Attention summary: write 1 to clear per-drive ATA bits.
                if let Some(data) = data {
                    let merged = merge(self.attention_mask(), data, addr, byte);
                    if merged > 0 {
                        for (i, drive) in self.drives.iter_mut().enumerate() {
                            if merged & (1 << i) != 0 {
                                drive.ds &= !DS_ATA;
                            }
                        }
                        self.cs1 &= !CS1_SC;
                    }
                }
                self.attention_mask()
            }
            0o22 => {
                if let Some(data) = data {
                    self.db = merge(self.db, data, addr, byte);
                }
                self.db
            }
            0o50 => {
                if let Some(data) = data {
                    self.bae = merge(self.bae, data, addr, byte) & 0o77;
                }
                self.bae
            }
            0o52 => {
                if let Some(data) = data {
                    self.cs3 = merge(self.cs3, data, addr, byte);
                }
                self.cs3
            }
            // Drive registers: zero when the selected unit is absent.
            _ if !self.drives[unit].present => 0,
            0o06 => {
                let drive = &mut self.drives[unit];
                if let Some(data) = data {
                    drive.da = merge(drive.da, data, addr, byte);
                }
                drive.da
            }
            0o12 => self.drives[unit].ds,
            0o14 => {
                let drive = &mut self.drives[unit];
                if let Some(data) = data {
                    drive.er1 = merge(drive.er1, data, addr, byte);
                }
                drive.er1
            }
            0o20 => 0, // lookahead
            0o24 => {
                let drive = &mut self.drives[unit];
                if let Some(data) = data {
                    drive.mr = merge(drive.mr, data, addr, byte);
                }
                drive.mr
            }
            0o26 => self.drives[unit].dt,
            0o30 => self.drives[unit].sn,
            0o32 => {
                let drive = &mut self.drives[unit];
                if let Some(data) = data {
                    drive.of = merge(drive.of, data, addr, byte);
                }
                drive.of
            }
            0o34 => {
                let drive = &mut self.drives[unit];
                if let Some(data) = data {
                    drive.dc = merge(drive.dc, data, addr, byte);
                }
                drive.dc
            }
            0o36 => self.drives[unit].cc,
            0o40 => self.drives[unit].er2,
            0o42 => self.drives[unit].er3,
            0o44 | 0o46 => 0, // ECC registers
            _ => 0,
        };
        (value, go)
    }

    fn read_cs1(&self) -> u16 {
        let mut cs1 = (self.cs1 & !(CS1_DVA | CS1_A16_17)) | (((self.bae & 3) as u16) << 8);
        if self.drives[self.unit()].present {
            cs1 |= CS1_DVA;
        }
        cs1
    }

    /// Dispatch the function written to CS1.
    pub fn start(&mut self, bus: &mut dyn Bus) -> Option<(DriveId, Transfer)> {
        let function = (self.cs1 & (CS1_FUNC | CS1_GO)) | CS1_GO;
        let unit = self.unit();
        trace!("rp11: function {:o} unit {}", function, unit);
        if !self.drives[unit].present {
            self.cs2 |= CS2_NED;
            self.cs1 |= CS1_TRE | CS1_SC;
            self.function_done(bus);
            return None;
        }
        match function {
            FN_NOP | FN_RELEASE => {
                self.function_done(bus);
                None
            }
            FN_DRIVE_CLEAR => {
                self.drives[unit].reset_status();
                self.function_done(bus);
                None
            }
            FN_PRESET => {
                let drive = &mut self.drives[unit];
                drive.ds |= DS_VV;
                drive.da = 0;
                drive.dc = 0;
                drive.of = 0;
                self.function_done(bus);
                None
            }
            FN_PACK_ACK => {
                self.drives[unit].ds |= DS_VV;
                self.function_done(bus);
                None
            }
            FN_UNLOAD | FN_RECAL | FN_OFFSET | FN_CENTER => {
                if function == FN_RECAL {
                    self.drives[unit].dc = 0;
                    self.drives[unit].cc = 0;
                }
                self.attention(bus, unit);
                None
            }
            FN_SEEK | FN_SEARCH => {
                if !self.address_valid(unit) {
                    self.drive_error(bus, unit, ER1_IAE);
                    return None;
                }
                self.drives[unit].cc = self.drives[unit].dc;
                self.attention(bus, unit);
                None
            }
            FN_WRITE | FN_READ => {
                if !self.address_valid(unit) {
                    self.drive_error(bus, unit, ER1_IAE);
                    return None;
                }
                let (cylinder, surface, sector, surfaces, sectors) = {
                    let drive = &self.drives[unit];
                    (drive.dc, drive.da >> 8, drive.da & 0xFF, drive.surfaces, drive.sectors)
                };
                self.cs1 &= !CS1_RDY;
                let position = ((cylinder as u64 * surfaces as u64 + surface as u64)
                    * sectors as u64
                    + sector as u64)
                    * SECTOR_BYTES;
                let address = self.ba as u32 | ((self.bae as u32) << 16);
                let bytes = (0x10000 - self.wc as u32) * 2;
                let op = if function == FN_WRITE {
                    TransferOp::Write
                } else {
                    TransferOp::Read
                };
                let id = DriveId::new(Device::Rp11, unit as u8);
                Some((id, Transfer::new(op, position, address, bytes)))
            }
            _ => {
                self.drive_error(bus, unit, ER1_ILF);
                None
            }
        }
    }

    pub fn end(&mut self, bus: &mut dyn Bus, c: &Completion) {
        let unit = c.drive.unit as usize;
        self.ba = (c.address & 0xFFFF) as u16 & !1;
        self.bae = ((c.address >> 16) & 0o77) as u16;
        self.wc = (0x10000u32.wrapping_sub(c.count >> 1) & 0xFFFF) as u16;
        {
            let drive = &mut self.drives[unit];
            let per_cylinder = (drive.surfaces as u64) * (drive.sectors as u64);
            if per_cylinder > 0 {
                let block = c.position / SECTOR_BYTES;
                let cylinder = (block / per_cylinder) as u16;
                let remainder = block % per_cylinder;
                drive.dc = cylinder;
                drive.cc = cylinder;
                drive.da = (((remainder / drive.sectors as u64) as u16) << 8)
                    | (remainder % drive.sectors as u64) as u16;
            }
        }
        match c.status {
            TransferStatus::Done => {}
            TransferStatus::ReadError => {
                self.drives[unit].er1 |= ER1_DCK;
                self.drives[unit].ds |= DS_ERR;
                self.cs1 |= CS1_TRE | CS1_SC;
            }
            TransferStatus::Nxm => {
                self.cs2 |= CS2_NEM;
                self.cs1 |= CS1_TRE | CS1_SC;
            }
            TransferStatus::CompareError => {
                self.cs2 |= CS2_WCE;
                self.cs1 |= CS1_TRE | CS1_SC;
            }
        }
        self.function_done(bus);
    }

    fn address_valid(&self, unit: usize) -> bool {
        let drive = &self.drives[unit];
        drive.dc < drive.cylinders
            && (drive.da >> 8) < drive.surfaces
            && (drive.da & 0xFF) < drive.sectors
    }

    fn function_done(&mut self, bus: &mut dyn Bus) {
        self.cs1 |= CS1_RDY;
        if self.cs1 & CS1_IE != 0 {
            bus.interrupt(RP_DELAY, RP_PRIORITY, RP_VECTOR, None);
        }
    }

    /// Positioning completion: raise the unit's attention bit.
    fn attention(&mut self, bus: &mut dyn Bus, unit: usize) {
        self.drives[unit].ds |= DS_ATA;
        self.cs1 |= CS1_SC;
        self.cs1 |= CS1_RDY;
        if self.cs1 & CS1_IE != 0 {
            bus.interrupt(RP_SEEK_DELAY, RP_PRIORITY, RP_VECTOR, None);
        }
    }

    fn drive_error(&mut self, bus: &mut dyn Bus, unit: usize, bit: u16) {
        self.drives[unit].er1 |= bit;
        self.drives[unit].ds |= DS_ERR | DS_ATA;
        self.cs1 |= CS1_SC;
        self.function_done(bus);
    }
}

impl Default for Rp11 {
    fn default() -> Self {
        Rp11::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingBus;

    const CS1: u32 = BASE;
    const CS2: u32 = BASE + 0o10;
    const AS: u32 = BASE + 0o16;
    const DS: u32 = BASE + 0o12;
    const DC: u32 = BASE + 0o34;

    #[test]
    fn present_drive_shows_dva() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        let (cs1, _) = rp.access(&mut bus, CS1, None, false);
        assert_ne!(cs1 & CS1_DVA, 0);
    }

    #[test]
    fn selecting_missing_drive_sets_ned() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.access(&mut bus, CS2, Some(6), false);
        assert_ne!(rp.cs2 & CS2_NED, 0);
        assert_ne!(rp.cs1 & (CS1_TRE | CS1_SC), 0);
        let (cs1, _) = rp.access(&mut bus, CS1, None, false);
        assert_eq!(cs1 & CS1_DVA, 0);
        // Drive registers of the missing unit read as zero.
        let (ds, _) = rp.access(&mut bus, DS, None, false);
        assert_eq!(ds, 0);
    }

    #[test]
    fn seek_raises_attention() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.access(&mut bus, DC, Some(100), false);
        let (_, go) = rp.access(&mut bus, CS1, Some(FN_SEEK), false);
        assert!(go);
        assert!(rp.start(&mut bus).is_none());
        assert_ne!(rp.drives[0].ds & DS_ATA, 0);
        assert_eq!(rp.drives[0].cc, 100);
        assert_ne!(rp.cs1 & CS1_SC, 0);
    }

    #[test]
    fn attention_summary_is_write_one_to_clear() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.drives[0].ds |= DS_ATA;
        rp.drives[2].ds |= DS_ATA;
        rp.cs1 |= CS1_SC;
        let (mask, _) = rp.access(&mut bus, AS, None, false);
        assert_eq!(mask, 0b101);
        rp.access(&mut bus, AS, Some(0b001), false);
        assert_eq!(rp.attention_mask(), 0b100);
        assert_eq!(rp.cs1 & CS1_SC, 0);
    }

    #[test]
    fn zero_write_to_attention_summary_is_a_noop() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.drives[1].ds |= DS_ATA;
        rp.cs1 |= CS1_SC;
        rp.access(&mut bus, AS, Some(0), false);
        assert_eq!(rp.attention_mask(), 0b10);
        assert_ne!(rp.cs1 & CS1_SC, 0);
    }

    #[test]
    fn read_function_produces_transfer() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.wc = 0xFF00;
        rp.ba = 0x1000;
        rp.bae = 0o4;
        rp.drives[0].dc = 1;
        rp.drives[0].da = (2 << 8) | 3;
        let (_, go) = rp.access(&mut bus, CS1, Some(FN_READ), false);
        assert!(go);
        let (id, t) = rp.start(&mut bus).expect("transfer");
        assert_eq!(id, DriveId::new(Device::Rp11, 0));
        assert_eq!(t.position, ((19 + 2) as u64 * 22 + 3) * 512);
        assert_eq!(t.address, 0x1000 | (0o4 << 16));
        assert_eq!(t.count, 512);
        assert_eq!(rp.cs1 & CS1_RDY, 0);
    }

    #[test]
    fn invalid_address_sets_iae() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.drives[0].dc = 4000;
        rp.access(&mut bus, CS1, Some(FN_READ), false);
        assert!(rp.start(&mut bus).is_none());
        assert_ne!(rp.drives[0].er1 & ER1_IAE, 0);
        assert_ne!(rp.cs1 & CS1_SC, 0);
    }

    #[test]
    fn illegal_function_sets_ilf() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.access(&mut bus, CS1, Some(0o51), false);
        rp.start(&mut bus);
        assert_ne!(rp.drives[0].er1 & ER1_ILF, 0);
    }

    #[test]
    fn tre_is_write_one_to_clear() {
        let mut bus = RecordingBus::new();
        let mut rp = Rp11::new();
        rp.cs1 |= CS1_TRE;
        rp.cs2 |= CS2_NEM;
        rp.access(&mut bus, CS1, Some(CS1_TRE), false);
        assert_eq!(rp.cs1 & CS1_TRE, 0);
        assert_eq!(rp.cs2 & CS2_NEM, 0);
    }
}
