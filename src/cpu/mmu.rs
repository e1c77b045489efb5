//! Memory management: paging, permit and ring checks, and the shadow
//! window onto the page tables.
//!
//! Faults are returned to the caller as [`FaultInfo`]; the CPU turns them
//! into level-14 interrupts and the access reads as zero.

use log::debug;

use super::memory::{pte, ByteSelect, PageTables, PhysicalMemory};
use super::registers::{pcr, sts, RegisterFile, SystemRegisters, STS};

/// Shadow window bounds. The upper bound is above the 16-bit range, so
/// only physical accesses can reach the top part of it.
const SHADOW_START_EXTENDED: u32 = 0o177000;
const SHADOW_START_NORMAL: u32 = 0o177400;
const SHADOW_END: u32 = 0o1000000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Fetch,
}

impl Access {
    fn permit(self) -> u32 {
        match self {
            Access::Read => pte::RPM,
            Access::Write => pte::WPM,
            Access::Fetch => pte::FPM,
        }
    }

    fn used_bits(self) -> u32 {
        match self {
            Access::Write => pte::WIP | pte::PGU,
            _ => pte::PGU,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Entry has no permit bits at all.
    PageFault,
    /// Entry is present but lacks the permit for this access.
    ProtectionViolation,
    /// Entry ring is above the accessing level's ring.
    RingViolation,
}

impl Fault {
    /// Level-14 IID bit for this fault.
    pub fn subcode(self) -> u16 {
        match self {
            Fault::PageFault => 1 << 3,
            Fault::ProtectionViolation | Fault::RingViolation => 1 << 2,
        }
    }
}

/// A failed translation and the syndrome to latch into PGS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultInfo {
    pub fault: Fault,
    pub pgs: u16,
}

/// Machine state the MMU needs for one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessContext {
    /// Page control register of the current level.
    pub pcr: u16,
    pub paging: bool,
    pub sexi: bool,
    pub ptm: bool,
}

impl AccessContext {
    pub fn current(regs: &RegisterFile, sys: &SystemRegisters) -> Self {
        let s = regs.get(STS);
        Self {
            pcr: sys.pcr[regs.level()],
            paging: s & sts::PONI != 0,
            sexi: s & sts::SEXI != 0,
            ptm: s & sts::PTM != 0,
        }
    }

    pub fn ring(&self) -> u16 {
        pcr::ring(self.pcr)
    }

    /// Page table used for an access, honouring the alternate-table request
    /// only when PTM is set.
    pub fn page_table(&self, use_apt: bool) -> u16 {
        if self.ptm && use_apt { pcr::apt(self.pcr) } else { pcr::pt(self.pcr) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mmu {
    pub memory: PhysicalMemory,
    pub tables: PageTables,
}

impl Mmu {
    pub fn new(memory: PhysicalMemory) -> Self {
        Self { memory, tables: PageTables::new() }
    }

    /// True when `addr` hits the page-table window. The window is open on
    /// ring 3 or with paging off.
    pub fn is_shadow(addr: u32, ctx: &AccessContext) -> bool {
        if ctx.ring() != 3 && ctx.paging {
            return false;
        }
        let start = if ctx.sexi { SHADOW_START_EXTENDED } else { SHADOW_START_NORMAL };
        (start..SHADOW_END).contains(&addr)
    }

    /// Translate a virtual address and check permissions. Marks the entry
    /// used (and written) on success.
    pub fn translate(&mut self, addr: u16, access: Access, use_apt: bool, ctx: &AccessContext) -> Result<u32, FaultInfo> {
        if !ctx.paging {
            return Ok(addr as u32);
        }
        let table = ctx.page_table(use_apt);
        let vpn = addr >> 10;
        let entry = self.tables.entry(table, vpn);
        let syndrome = (table << 6) | vpn;

        if entry & access.permit() == 0 {
            let fault = if entry & pte::PERMITS == 0 { Fault::PageFault } else { Fault::ProtectionViolation };
            let pgs = match access {
                Access::Fetch => (3 << 14) | syndrome,
                _ => (1 << 14) | syndrome,
            };
            debug!("mmu: {:?} on {:?} pt={} vpn={} pgs={:06o}", fault, access, table, vpn, pgs);
            return Err(FaultInfo { fault, pgs });
        }
        if pte::ring(entry) > ctx.ring() {
            let pgs = match access {
                Access::Fetch => (1 << 15) | syndrome,
                _ => syndrome,
            };
            debug!("mmu: ring violation on {:?} pt={} vpn={} ring={}", access, table, vpn, pte::ring(entry));
            return Err(FaultInfo { fault: Fault::RingViolation, pgs });
        }

        self.tables.mark(table, vpn, access.used_bits());
        Ok(PhysicalMemory::page_address(pte::ppn(entry, ctx.sexi), addr))
    }

    pub fn read(&mut self, addr: u16, use_apt: bool, ctx: &AccessContext) -> Result<u16, FaultInfo> {
        self.load(addr, Access::Read, use_apt, ctx)
    }

    pub fn fetch(&mut self, addr: u16, use_apt: bool, ctx: &AccessContext) -> Result<u16, FaultInfo> {
        self.load(addr, Access::Fetch, use_apt, ctx)
    }

    fn load(&mut self, addr: u16, access: Access, use_apt: bool, ctx: &AccessContext) -> Result<u16, FaultInfo> {
        if Self::is_shadow(addr as u32, ctx) {
            return Ok(self.tables.shadow_read(addr, ctx.sexi));
        }
        let phys = self.translate(addr, access, use_apt, ctx)?;
        Ok(self.memory.read(phys))
    }

    pub fn write(
        &mut self,
        addr: u16,
        value: u16,
        select: ByteSelect,
        use_apt: bool,
        ctx: &AccessContext,
    ) -> Result<(), FaultInfo> {
        if Self::is_shadow(addr as u32, ctx) {
            self.tables.shadow_write(addr, value, select, ctx.sexi);
            return Ok(());
        }
        let phys = self.translate(addr, Access::Write, use_apt, ctx)?;
        self.memory.write(phys, value, select);
        Ok(())
    }

    /// Untranslated read. The shadow window still applies.
    pub fn physical_read(&self, addr: u32, ctx: &AccessContext) -> u16 {
        if Self::is_shadow(addr, ctx) {
            return self.tables.shadow_read(addr as u16, ctx.sexi);
        }
        self.memory.read(addr)
    }

    pub fn physical_write(&mut self, addr: u32, value: u16, ctx: &AccessContext) {
        if Self::is_shadow(addr, ctx) {
            self.tables.shadow_write(addr as u16, value, ByteSelect::Word, ctx.sexi);
            return;
        }
        self.memory.write(addr, value, ByteSelect::Word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmu() -> Mmu {
        Mmu::new(PhysicalMemory::with_pages(64))
    }

    fn paged(ring: u16, pt: u16) -> AccessContext {
        AccessContext { pcr: (pt << 9) | ring, paging: true, sexi: false, ptm: false }
    }

    #[test]
    fn test_paging_off_is_flat() {
        let mut m = mmu();
        let ctx = AccessContext::default();
        m.write(0o1234, 0o4321, ByteSelect::Word, false, &ctx).unwrap();
        assert_eq!(m.read(0o1234, false, &ctx).unwrap(), 0o4321);
        assert_eq!(m.memory.read(0o1234), 0o4321);
    }

    #[test]
    fn test_translation_and_used_bits() {
        let mut m = mmu();
        m.tables.set_entry(1, 2, pte::RPM | pte::WPM | 7);
        let ctx = paged(0, 1);
        m.write(0o4005, 0o777, ByteSelect::Word, false, &ctx).unwrap();
        assert_eq!(m.memory.read(7 * 1024 + 5), 0o777);
        assert_eq!(m.read(0o4005, false, &ctx).unwrap(), 0o777);
        assert_eq!(m.tables.entry(1, 2) & (pte::WIP | pte::PGU), pte::WIP | pte::PGU);
    }

    #[test]
    fn test_page_fault_when_no_permits() {
        let mut m = mmu();
        let ctx = paged(0, 2);
        let err = m.read(0o6000, false, &ctx).unwrap_err();
        assert_eq!(err.fault, Fault::PageFault);
        assert_eq!(err.pgs, (1 << 14) | (2 << 6) | 3);
        assert_eq!(err.fault.subcode(), 1 << 3);
    }

    #[test]
    fn test_protection_violation_when_permit_missing() {
        let mut m = mmu();
        m.tables.set_entry(0, 0, pte::RPM | 1);
        let ctx = paged(0, 0);
        let err = m.write(0o10, 1, ByteSelect::Word, false, &ctx).unwrap_err();
        assert_eq!(err.fault, Fault::ProtectionViolation);
        assert_eq!(err.fault.subcode(), 1 << 2);
        // a failed access leaves the entry untouched
        assert_eq!(m.tables.entry(0, 0), pte::RPM | 1);

        let err = m.fetch(0o10, false, &ctx).unwrap_err();
        assert_eq!(err.pgs, 3 << 14);
    }

    #[test]
    fn test_ring_violation() {
        let mut m = mmu();
        m.tables.set_entry(0, 1, pte::PERMITS | (2 << pte::RING_SHIFT) | 3);
        let low = paged(1, 0);
        let err = m.read(0o2000, false, &low).unwrap_err();
        assert_eq!(err.fault, Fault::RingViolation);
        assert_eq!(err.pgs, 1);
        let err = m.fetch(0o2000, false, &low).unwrap_err();
        assert_eq!(err.pgs, (1 << 15) | 1);

        assert!(m.read(0o2000, false, &paged(2, 0)).is_ok());
    }

    #[test]
    fn test_alternate_table_needs_ptm() {
        let mut m = mmu();
        m.tables.set_entry(3, 0, pte::RPM | 9);
        m.memory.write(9 * 1024, 0o55, ByteSelect::Word);
        let mut ctx = AccessContext { pcr: 3 << 7, paging: true, sexi: false, ptm: false };
        assert!(m.read(0, true, &ctx).is_err());
        ctx.ptm = true;
        assert_eq!(m.read(0, true, &ctx).unwrap(), 0o55);
        assert!(m.read(0, false, &ctx).is_err());
    }

    #[test]
    fn test_shadow_window_rules() {
        let off = AccessContext::default();
        assert!(Mmu::is_shadow(0o177400, &off));
        assert!(!Mmu::is_shadow(0o177377, &off));
        assert!(Mmu::is_shadow(0o177000, &AccessContext { sexi: true, ..off }));
        assert!(!Mmu::is_shadow(0o177400, &paged(2, 0)));
        assert!(Mmu::is_shadow(0o177400, &paged(3, 0)));
        assert!(!Mmu::is_shadow(0o1000000, &off));
    }

    #[test]
    fn test_shadow_write_reaches_tables() {
        let mut m = mmu();
        let ctx = AccessContext::default();
        m.write(0o177400 + 0o100, 0xc005, ByteSelect::Word, false, &ctx).unwrap();
        // slot 64 is table 1, entry 0
        assert_eq!(m.tables.entry(1, 0), 0xc000_0005);
        m.physical_write(0o177400 + 1, 0x4001, &ctx);
        assert_eq!(m.physical_read(0o177400 + 1, &ctx), 0x4001);
    }
}
