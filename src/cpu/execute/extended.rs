//! Extended instructions: byte access, T:X physical access, byte block
//! moves, the stack frame instructions and CLEPT.

use log::{trace, warn};

use crate::cpu::dispatch::Handler;
use crate::cpu::memory::ByteSelect;
use crate::cpu::registers::sts;

use super::{Cpu, CpuError, Step};

/// Select for byte number `n` of a field: even bytes are the high half.
#[inline]
fn byte_select(n: u32) -> ByteSelect {
    if n & 1 == 1 { ByteSelect::Low } else { ByteSelect::High }
}

/// Word offset of byte `n` of a field.
#[inline]
fn byte_word(n: u32) -> u16 {
    (n >> 1) as u16
}

/// A byte field descriptor held in a length register (D or T): bit 15
/// starts the field on the low byte, bit 14 requests the alternate page
/// table, bits 0-11 are the length.
#[derive(Debug, Clone, Copy)]
struct ByteField {
    start: u16,
    right: u32,
    apt: bool,
    len: u16,
}

impl ByteField {
    fn new(start: u16, descriptor: u16) -> Self {
        Self {
            start,
            right: (descriptor >> 15) as u32,
            apt: descriptor & 0x4000 != 0,
            len: descriptor & 0x0fff,
        }
    }

    /// Word address and select of byte `i`.
    fn byte(&self, i: u16) -> (u16, ByteSelect) {
        let n = i as u32 + self.right;
        (self.start.wrapping_add(byte_word(n)), byte_select(n))
    }

    /// First word after `count` bytes and the new bit-15 value.
    fn end(&self, count: u16) -> (u16, u16) {
        let n = count as u32 + self.right;
        (self.start.wrapping_add(byte_word(n)), ((n & 1) as u16) << 15)
    }
}

impl Cpu {
    /// LBYT: byte X of the string at T into A.
    pub(super) fn load_byte(&mut self) -> Step {
        let x = self.regs.x();
        let addr = self.regs.t().wrapping_add(x >> 1);
        let word = self.memory_read(addr, false)?;
        let byte = if x & 1 == 1 { word & 0xff } else { word >> 8 };
        self.regs.set_a(byte);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// SBYT: low byte of A to byte X of the string at T.
    pub(super) fn store_byte(&mut self) -> Step {
        let x = self.regs.x();
        let addr = self.regs.t().wrapping_add(x >> 1);
        let a = self.regs.a() & 0xff;
        self.memory_write_select(addr, a, byte_select(x as u32), false)?;
        self.regs.advance_p(1);
        Ok(None)
    }

    /// MIX3: X = (A - 1) * 3.
    pub(super) fn mix3(&mut self) -> Step {
        let x = self.regs.a().wrapping_sub(1).wrapping_mul(3);
        self.regs.set_x(x);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// Physical loads and stores at T:(X + disp).
    pub(super) fn tx_access(&mut self, handler: Handler, ir: u16) -> Step {
        let disp = (ir >> 3) & 7;
        let addr = (self.regs.t() as u32) << 16 | self.regs.x().wrapping_add(disp) as u32;
        match handler {
            Handler::Ldatx => {
                let v = self.physical_read(addr);
                self.regs.set_a(v);
            }
            Handler::Ldxtx => {
                let v = self.physical_read(addr);
                self.regs.set_x(v);
            }
            Handler::Lddtx => {
                let a = self.physical_read(addr);
                let d = self.physical_read(addr.wrapping_add(1));
                self.regs.set_a(a);
                self.regs.set_d(d);
            }
            Handler::Ldbtx => {
                let b = self.segment_base(addr);
                self.regs.set_b(b);
            }
            Handler::Statx => {
                let a = self.regs.a();
                self.physical_write(addr, a);
            }
            Handler::Stztx => self.physical_write(addr, 0),
            _ => {
                let (a, d) = (self.regs.a(), self.regs.d());
                self.physical_write(addr, a);
                self.physical_write(addr.wrapping_add(1), d);
            }
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// `0o177000 | (2 * EL)` where EL is the word at `addr`.
    fn segment_base(&self, addr: u32) -> u16 {
        let el = self.physical_read(addr) as u32;
        0o177000 | self.physical_read(el * 2)
    }

    /// BFILL: fill the byte field X/T with the low byte of A. Skip return.
    pub(super) fn byte_fill(&mut self) -> Step {
        let t = self.regs.t();
        let field = ByteField::new(self.regs.x(), t);
        let byte = self.regs.a() & 0xff;
        for i in 0..field.len {
            let (addr, select) = field.byte(i);
            self.memory_write_select(addr, byte, select, field.apt)?;
        }
        let (x, right) = field.end(field.len);
        self.regs.set_x(x);
        self.regs.set_t((t & 0x7000) | right);
        self.regs.advance_p(2);
        Ok(None)
    }

    fn copy_byte(&mut self, src: &ByteField, dst: &ByteField, i: u16) -> Result<(), CpuError> {
        let (saddr, ssel) = src.byte(i);
        let word = self.memory_read(saddr, src.apt)?;
        let byte = if ssel == ByteSelect::Low { word & 0xff } else { word >> 8 };
        let (daddr, dsel) = dst.byte(i);
        self.memory_write_select(daddr, byte, dsel, dst.apt)
    }

    /// MOVB: copy bytes from the field A/D to the field X/T, choosing the
    /// direction so overlapping fields copy correctly. Skip return.
    pub(super) fn move_bytes(&mut self) -> Step {
        let (d, t) = (self.regs.d(), self.regs.t());
        let src = ByteField::new(self.regs.a(), d);
        let dst = ByteField::new(self.regs.x(), t);
        let len = src.len.min(dst.len);
        if src.start < dst.start {
            for i in (0..len).rev() {
                self.copy_byte(&src, &dst, i)?;
            }
        } else {
            for i in 0..len {
                self.copy_byte(&src, &dst, i)?;
            }
        }
        let (a, s_right) = src.end(len);
        let (x, d_right) = dst.end(len);
        self.regs.set_a(a);
        self.regs.set_x(x);
        self.regs.set_d((d & 0x7000) | s_right);
        self.regs.set_t((t & 0x7000) | d_right | len);
        trace!("MOVB {} bytes", len);
        self.regs.advance_p(2);
        Ok(None)
    }

    /// MOVBF: forward-only byte move. Leaves the remaining counts in D and
    /// T; takes the skip return only when the fields do not overlap.
    pub(super) fn move_bytes_forward(&mut self) -> Step {
        let (d, t) = (self.regs.d(), self.regs.t());
        let src = ByteField::new(self.regs.a(), d);
        let dst = ByteField::new(self.regs.x(), t);
        let len = src.len.min(dst.len);
        let overlap =
            src.start <= dst.start && (len / 2).wrapping_add(src.start).wrapping_sub(1) > dst.start;
        for i in 0..len {
            self.copy_byte(&src, &dst, i)?;
        }
        let (a, s_right) = src.end(len);
        let (x, d_right) = dst.end(len);
        self.regs.set_a(a);
        self.regs.set_x(x);
        self.regs.set_d((d & 0x6000) | s_right | (src.len - len));
        self.regs.set_t((t & 0x4000) | d_right | (dst.len - len));
        self.regs.advance_p(if overlap { 1 } else { 2 });
        Ok(None)
    }

    // ==================== Stack frames ====================

    /// INIT: set up the first frame of a stack.
    ///
    /// Parameters follow the instruction: stack demand, stack start,
    /// maximum size and flag. Error return at P+6, normal return at P+7.
    pub(super) fn stack_init(&mut self) -> Step {
        let p = self.regs.p();
        let demand = self.memory_read(p.wrapping_add(1), false)?;
        let start = self.memory_read(p.wrapping_add(2), false)?;
        let maxsize = self.memory_read(p.wrapping_add(3), false)?;
        let flag = self.memory_read(p.wrapping_add(4), false)?;

        let top = start as i32 + 128 + demand as i32 - 122;
        let ptm = self.regs.flag(sts::PTM) as u16;
        if top > start as i32 + maxsize as i32 || flag & 1 != ptm {
            self.regs.advance_p(6);
            return Ok(None);
        }
        let link = self.regs.l().wrapping_add(1);
        let b = self.regs.b();
        self.memory_write(start, link, false)?;
        self.memory_write(start.wrapping_add(1), b, false)?;
        self.memory_write(start.wrapping_add(3), start.wrapping_add(maxsize), false)?;
        let b = start.wrapping_add(128);
        self.regs.set_b(b);
        self.memory_write(start.wrapping_add(2), b.wrapping_add(demand).wrapping_sub(122), false)?;
        self.regs.advance_p(7);
        Ok(None)
    }

    /// ENTR: push a new frame. Error return at P+2, normal return at P+3.
    pub(super) fn stack_enter(&mut self) -> Step {
        let p = self.regs.p();
        let b = self.regs.b();
        let demand = self.memory_read(p.wrapping_add(1), false)?;
        let smax = self.memory_read(b.wrapping_sub(125), false)?;
        if b as i32 + demand as i32 - 122 > smax as i32 {
            self.regs.advance_p(2);
            return Ok(None);
        }
        let stp = self.memory_read(b.wrapping_sub(126), false)?;
        let nb = stp.wrapping_add(128);
        self.regs.set_b(nb);
        let link = self.regs.l().wrapping_add(1);
        self.memory_write(nb.wrapping_sub(128), link, false)?;
        self.memory_write(nb.wrapping_sub(127), b, false)?;
        self.memory_write(nb.wrapping_sub(125), smax, false)?;
        self.memory_write(nb.wrapping_sub(126), nb.wrapping_add(demand).wrapping_sub(122), false)?;
        self.regs.advance_p(3);
        Ok(None)
    }

    /// LEAVE pops the frame; ELEAV also takes the error return and leaves
    /// A in the frame's error code word.
    pub(super) fn stack_leave(&mut self, error: bool) -> Step {
        let b = self.regs.b();
        if error {
            let link = self.memory_read(b.wrapping_sub(128), false)?;
            self.memory_write(b.wrapping_sub(128), link.wrapping_sub(1), false)?;
            let a = self.regs.a();
            self.memory_write(b.wrapping_sub(123), a, false)?;
        }
        let p = self.memory_read(b.wrapping_sub(128), false)?;
        let prev = self.memory_read(b.wrapping_sub(127), false)?;
        self.regs.set_p(p);
        self.regs.set_b(prev);
        Ok(None)
    }

    /// CLEPT: walk the segment list at T:X and move every in-use page table
    /// entry back to its segment, clearing the entry.
    ///
    /// The whole walk is one instruction, so the run gate is not consulted
    /// inside it. X is 16 bits wide, so a list longer than 0x10000 records
    /// must revisit one; the walk gives up there and leaves X on the cycle.
    pub(super) fn clear_page_tables(&mut self) -> Step {
        let t = (self.regs.t() as u32) << 16;
        let mut visited = 0u32;
        while self.regs.x() != 0 {
            if visited > u16::MAX as u32 {
                warn!(
                    "CLEPT at {:06o}: segment list at {:06o} is cyclic",
                    self.regs.p(),
                    self.regs.x()
                );
                break;
            }
            visited += 1;
            let x = self.regs.x();
            let b = self.segment_base(t | x.wrapping_add(1) as u32);
            self.regs.set_b(b);
            let entry = self.memory_read(b, true)?;
            self.regs.set_a(entry);
            if entry != 0 {
                self.physical_write(t | x.wrapping_add(2) as u32, entry);
                self.memory_write(b, 0, true)?;
            }
            let next = self.physical_read(t | x as u32);
            self.regs.set_x(next);
        }
        self.regs.advance_p(1);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{machine, steps};
    use crate::cpu::memory::ByteSelect;
    use crate::cpu::registers::sts;
    use crate::cpu::Cpu;

    #[test]
    fn test_lbyt_sbyt() {
        // SBYT; LBYT
        let mut cpu = machine(&[0o142600, 0o142200]);
        cpu.mmu.memory.load(0o1000, &[0x4142, 0x4344]);
        cpu.regs.set_t(0o1000);
        cpu.regs.set_x(3);
        cpu.regs.set_a(0x17f);
        steps(&mut cpu, 1);
        assert_eq!(cpu.mmu.memory.read(0o1001), 0x437f);
        cpu.regs.set_x(2);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0x43);
    }

    #[test]
    fn test_mix3() {
        let mut cpu = machine(&[0o143200]);
        cpu.regs.set_a(5);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.x(), 12);
    }

    #[test]
    fn test_tx_loads_and_stores() {
        // STATX 1; LDXTX 1; STDTX 2; LDDTX 2
        let mut cpu = machine(&[0o143314, 0o143311, 0o143326, 0o143322]);
        cpu.regs.set_t(0);
        cpu.regs.set_x(0o2000);
        cpu.regs.set_a(0o4321);
        steps(&mut cpu, 1);
        assert_eq!(cpu.mmu.memory.read(0o2001), 0o4321);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.x(), 0o4321);
        cpu.regs.set_x(0o2000);
        cpu.regs.set_a(7);
        cpu.regs.set_d(8);
        steps(&mut cpu, 1);
        assert_eq!(cpu.mmu.memory.dump(0o2002, 2), vec![(0o2002, 7), (0o2003, 8)]);
        cpu.regs.set_a(0);
        cpu.regs.set_d(0);
        steps(&mut cpu, 1);
        assert_eq!((cpu.regs.a(), cpu.regs.d()), (7, 8));
    }

    #[test]
    fn test_ldbtx_segment_base() {
        // LDBTX 0
        let mut cpu = machine(&[0o143303]);
        cpu.regs.set_x(0o3000);
        cpu.mmu.memory.write(0o3000, 0o200, ByteSelect::Word);
        cpu.mmu.memory.write(0o400, 0o25, ByteSelect::Word);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.b(), 0o177025);
    }

    #[test]
    fn test_bfill_from_right_byte() {
        let mut cpu = machine(&[0o140130, 0, 0]);
        cpu.regs.set_x(0o1000);
        cpu.regs.set_t(0o100000 | 3);
        cpu.regs.set_a(0o52);
        steps(&mut cpu, 1);
        assert_eq!(cpu.mmu.memory.read(0o1000), 0o52);
        assert_eq!(cpu.mmu.memory.read(0o1001), 0o52 << 8 | 0o52);
        assert_eq!(cpu.regs.x(), 0o1002);
        assert_eq!(cpu.regs.t(), 0);
        assert_eq!(cpu.regs.p(), 2);
    }

    #[test]
    fn test_movb_copies_and_updates_descriptors() {
        let mut cpu = machine(&[0o140131, 0, 0]);
        cpu.mmu.memory.load(0o1000, &[0x4142, 0x4344]);
        cpu.regs.set_a(0o1000);
        cpu.regs.set_d(3);
        cpu.regs.set_x(0o2000);
        cpu.regs.set_t(0o100000 | 5);
        steps(&mut cpu, 1);
        assert_eq!(cpu.mmu.memory.read(0o2000), 0x0041);
        assert_eq!(cpu.mmu.memory.read(0o2001), 0x4243);
        assert_eq!(cpu.regs.a(), 0o1001);
        assert_eq!(cpu.regs.d(), 0o100000);
        assert_eq!(cpu.regs.x(), 0o2002);
        assert_eq!(cpu.regs.t(), 3);
        assert_eq!(cpu.regs.p(), 2);
    }

    #[test]
    fn test_movb_overlapping_upwards() {
        let mut cpu = machine(&[0o140131]);
        cpu.mmu.memory.load(0o1000, &[0x0102, 0x0304, 0]);
        cpu.regs.set_a(0o1000);
        cpu.regs.set_d(4);
        cpu.regs.set_x(0o1001);
        cpu.regs.set_t(4);
        steps(&mut cpu, 1);
        let words: Vec<u16> = cpu.mmu.memory.dump(0o1000, 3).into_iter().map(|w| w.1).collect();
        assert_eq!(words, vec![0x0102, 0x0102, 0x0304]);
    }

    #[test]
    fn test_movbf_leaves_remaining_counts() {
        let mut cpu = machine(&[0o140132]);
        cpu.mmu.memory.load(0o1000, &[0x4142, 0x4344]);
        cpu.regs.set_a(0o1000);
        cpu.regs.set_d(4);
        cpu.regs.set_x(0o2000);
        cpu.regs.set_t(0o40000 | 6);
        steps(&mut cpu, 1);
        let words: Vec<u16> = cpu.mmu.memory.dump(0o2000, 2).into_iter().map(|w| w.1).collect();
        assert_eq!(words, vec![0x4142, 0x4344]);
        assert_eq!(cpu.regs.d(), 0);
        assert_eq!(cpu.regs.t(), 0o40000 | 2);
        assert_eq!(cpu.regs.p(), 2);
    }

    #[test]
    fn test_movbf_overlap_takes_error_return() {
        let mut cpu = machine(&[0o140132]);
        cpu.regs.set_a(0o1000);
        cpu.regs.set_d(8);
        cpu.regs.set_x(0o1002);
        cpu.regs.set_t(8);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 1);
    }

    /// INIT at 0 with parameters, stack at 0o4000 of 0o400 words.
    fn init_machine(flag: u16) -> Cpu {
        let mut cpu = machine(&[0o140134, 0o200, 0o4000, 0o400, flag, 0, 0, 0]);
        cpu.regs.set_l(0o777);
        cpu.regs.set_b(0o1234);
        cpu
    }

    #[test]
    fn test_init_builds_first_frame() {
        let mut cpu = init_machine(0);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 7);
        assert_eq!(cpu.regs.b(), 0o4200);
        let frame: Vec<u16> = cpu.mmu.memory.dump(0o4000, 4).into_iter().map(|w| w.1).collect();
        assert_eq!(frame, vec![0o1000, 0o1234, 0o4200 + 0o200 - 122, 0o4400]);
    }

    #[test]
    fn test_init_error_returns() {
        let mut cpu = init_machine(1);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 6);
        assert_eq!(cpu.regs.b(), 0o1234);

        let mut cpu = init_machine(0);
        cpu.mmu.memory.write(1, 0o1000, ByteSelect::Word);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 6);
    }

    #[test]
    fn test_entr_and_leave() {
        let mut cpu = init_machine(0);
        steps(&mut cpu, 1);
        // ENTR at 0o100 with demand 0o20, then LEAVE
        cpu.mmu.memory.load(0o100, &[0o140135, 0o20, 0, 0o140136]);
        cpu.regs.set_l(0o100);
        cpu.jump(0o100);
        steps(&mut cpu, 1);
        let b = 0o4200 + 0o200 - 122 + 128;
        assert_eq!(cpu.regs.b(), b);
        assert_eq!(cpu.regs.p(), 0o103);
        assert_eq!(cpu.mmu.memory.read(u32::from(b - 128)), 0o101);
        assert_eq!(cpu.mmu.memory.read(u32::from(b - 127)), 0o4200);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 0o101);
        assert_eq!(cpu.regs.b(), 0o4200);
    }

    #[test]
    fn test_entr_overflow() {
        let mut cpu = init_machine(0);
        steps(&mut cpu, 1);
        cpu.mmu.memory.load(0o100, &[0o140135, 0o7000]);
        cpu.jump(0o100);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 0o102);
        assert_eq!(cpu.regs.b(), 0o4200);
    }

    #[test]
    fn test_eleav_error_return() {
        let mut cpu = init_machine(0);
        steps(&mut cpu, 1);
        cpu.mmu.memory.load(0o100, &[0o140137]);
        cpu.regs.set_a(0o55);
        cpu.jump(0o100);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 0o777);
        assert_eq!(cpu.regs.b(), 0o1234);
        assert_eq!(cpu.mmu.memory.read(0o4200 - 123), 0o55);
    }

    #[test]
    fn test_clept_moves_entries() {
        let mut cpu = machine(&[0o140301]);
        // one segment record at 0o3000: next = 0, EL = 0o200, save slot
        cpu.mmu.memory.load(0o3000, &[0, 0o200, 0]);
        // segment base table: word 0o400 holds the shadow offset
        cpu.mmu.memory.load(0o400, &[0o402]);
        cpu.regs.set_global(sts::SEXI, true);
        // 0o177402 is the upper half of table 2 entry 1 in extended mode
        cpu.mmu.tables.set_entry(2, 1, 0o123 << 16);
        cpu.regs.set_x(0o3000);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.b(), 0o177402);
        assert_eq!(cpu.mmu.memory.read(0o3002), 0o123);
        assert_eq!(cpu.mmu.tables.entry(2, 1), 0);
        assert_eq!(cpu.regs.x(), 0);
        assert_eq!(cpu.regs.p(), 1);
    }

    #[test]
    fn test_clept_cyclic_list_terminates() {
        let mut cpu = machine(&[0o140301]);
        // the record's next pointer is itself
        cpu.mmu.memory.load(0o3000, &[0o3000, 0o200, 0]);
        cpu.mmu.memory.load(0o400, &[0o402]);
        cpu.regs.set_global(sts::SEXI, true);
        cpu.mmu.tables.set_entry(2, 1, 0o123 << 16);
        cpu.regs.set_x(0o3000);
        steps(&mut cpu, 1);
        assert_eq!(cpu.mmu.memory.read(0o3002), 0o123);
        assert_eq!(cpu.mmu.tables.entry(2, 1), 0);
        assert_eq!(cpu.regs.x(), 0o3000);
        assert_eq!(cpu.regs.p(), 1);
    }
}
