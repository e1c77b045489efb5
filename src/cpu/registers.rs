//! ND100 register file.
//!
//! The CPU has 16 priority levels, each with its own bank of 16 registers.
//! Registers 0-7 are STS, D, P, B, L, A, T, X; 8-15 are scratch. The
//! current level is bits 8-11 of STS and selects which bank the
//! instruction set sees.
//!
//! STS bits 8-15 are machine-wide: the level field and the four mode
//! flags. They are kept identical in all 16 banks, so every write to them
//! goes through [`RegisterFile::set_global`] or [`RegisterFile::set_level`].

use serde::{Deserialize, Serialize};

pub const STS: usize = 0;
pub const D: usize = 1;
pub const P: usize = 2;
pub const B: usize = 3;
pub const L: usize = 4;
pub const A: usize = 5;
pub const T: usize = 6;
pub const X: usize = 7;

pub const LEVELS: usize = 16;

/// Names of registers 0-7, in register-number order.
pub const NAMES: [&str; 8] = ["STS", "D", "P", "B", "L", "A", "T", "X"];

/// STS bit masks.
pub mod sts {
    /// Alternate page table mode.
    pub const PTM: u16 = 1 << 0;
    /// Floating point rounding / inexact.
    pub const TG: u16 = 1 << 1;
    /// One-bit accumulator for bit instructions.
    pub const K: u16 = 1 << 2;
    /// Error flag.
    pub const Z: u16 = 1 << 3;
    /// Dynamic overflow.
    pub const Q: u16 = 1 << 4;
    /// Static overflow.
    pub const O: u16 = 1 << 5;
    pub const C: u16 = 1 << 6;
    /// Multi-shift link.
    pub const M: u16 = 1 << 7;

    pub const PIL_SHIFT: u16 = 8;
    pub const PIL_MASK: u16 = 0x0f00;

    /// Set on ND100 class machines.
    pub const N100: u16 = 1 << 12;
    /// Extended (24-bit) addressing.
    pub const SEXI: u16 = 1 << 13;
    /// Memory management on.
    pub const PONI: u16 = 1 << 14;
    /// Interrupt system on.
    pub const IONI: u16 = 1 << 15;

    /// Per-level flag byte.
    pub const LOCAL: u16 = 0x00ff;
}

/// The 16 x 16 register matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    banks: [[u16; 16]; LEVELS],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self { banks: [[0; 16]; LEVELS] }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current priority level.
    #[inline]
    pub fn level(&self) -> usize {
        ((self.banks[0][STS] & sts::PIL_MASK) >> sts::PIL_SHIFT) as usize
    }

    /// Register `r` of the current level.
    #[inline]
    pub fn get(&self, r: usize) -> u16 {
        self.banks[self.level()][r]
    }

    #[inline]
    pub fn set(&mut self, r: usize, value: u16) {
        let lvl = self.level();
        self.banks[lvl][r] = value;
    }

    /// Register `r` of the current level, or 0 for register number 0.
    /// Register-to-register instructions read STS as zero.
    #[inline]
    pub fn operand(&self, r: usize) -> u16 {
        if r == STS { 0 } else { self.get(r) }
    }

    /// Register `r` of any level.
    #[inline]
    pub fn get_at(&self, level: usize, r: usize) -> u16 {
        self.banks[level & 0xf][r & 0xf]
    }

    #[inline]
    pub fn set_at(&mut self, level: usize, r: usize, value: u16) {
        self.banks[level & 0xf][r & 0xf] = value;
    }

    pub fn p(&self) -> u16 { self.get(P) }
    pub fn a(&self) -> u16 { self.get(A) }
    pub fn d(&self) -> u16 { self.get(D) }
    pub fn t(&self) -> u16 { self.get(T) }
    pub fn x(&self) -> u16 { self.get(X) }
    pub fn b(&self) -> u16 { self.get(B) }
    pub fn l(&self) -> u16 { self.get(L) }
    pub fn sts(&self) -> u16 { self.get(STS) }

    pub fn set_p(&mut self, v: u16) { self.set(P, v) }
    pub fn set_a(&mut self, v: u16) { self.set(A, v) }
    pub fn set_d(&mut self, v: u16) { self.set(D, v) }
    pub fn set_t(&mut self, v: u16) { self.set(T, v) }
    pub fn set_x(&mut self, v: u16) { self.set(X, v) }
    pub fn set_b(&mut self, v: u16) { self.set(B, v) }
    pub fn set_l(&mut self, v: u16) { self.set(L, v) }

    /// Advance P of the current level by `n` words.
    #[inline]
    pub fn advance_p(&mut self, n: u16) {
        let p = self.p();
        self.set_p(p.wrapping_add(n));
    }

    /// Test a flag in the current level's STS.
    #[inline]
    pub fn flag(&self, mask: u16) -> bool {
        self.sts() & mask != 0
    }

    /// Set or clear a per-level flag of the current level.
    pub fn set_flag(&mut self, mask: u16, on: bool) {
        debug_assert_eq!(mask & !sts::LOCAL, 0);
        let lvl = self.level();
        let s = &mut self.banks[lvl][STS];
        if on { *s |= mask } else { *s &= !mask }
    }

    /// Replace the low (per-level) byte of STS on `level`.
    pub fn set_local_sts(&mut self, level: usize, value: u16) {
        let s = &mut self.banks[level & 0xf][STS];
        *s = (*s & !sts::LOCAL) | (value & sts::LOCAL);
    }

    /// Set or clear a machine-wide STS bit in all banks.
    pub fn set_global(&mut self, mask: u16, on: bool) {
        for bank in self.banks.iter_mut() {
            if on { bank[STS] |= mask } else { bank[STS] &= !mask }
        }
    }

    /// Switch the current level, in all banks.
    pub fn set_level(&mut self, level: usize) {
        let field = ((level as u16) << sts::PIL_SHIFT) & sts::PIL_MASK;
        for bank in self.banks.iter_mut() {
            bank[STS] = (bank[STS] & !sts::PIL_MASK) | field;
        }
    }

    /// Read bit `bit` of register `r` on the current level.
    pub fn bit(&self, r: usize, bit: u16) -> bool {
        self.get(r) >> (bit & 0xf) & 1 != 0
    }

    /// Write bit `bit` of register `r` on the current level. Bits 8-15 of
    /// STS are machine-wide and are written in every bank.
    pub fn set_bit(&mut self, r: usize, bit: u16, on: bool) {
        let mask = 1u16 << (bit & 0xf);
        if r == STS && mask & !sts::LOCAL != 0 {
            if mask & sts::PIL_MASK != 0 {
                let s = self.sts();
                let s = if on { s | mask } else { s & !mask };
                self.set_level(((s & sts::PIL_MASK) >> sts::PIL_SHIFT) as usize);
            } else {
                self.set_global(mask, on);
            }
            return;
        }
        let v = self.get(r);
        self.set(r, if on { v | mask } else { v & !mask });
    }

    /// True when bits 8-15 of STS agree across all banks.
    pub fn globals_in_sync(&self) -> bool {
        let g = self.banks[0][STS] & !sts::LOCAL;
        self.banks.iter().all(|bank| bank[STS] & !sts::LOCAL == g)
    }

    /// One bank, for diagnostics.
    pub fn bank(&self, level: usize) -> &[u16; 16] {
        &self.banks[level & 0xf]
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal registers outside the banked file, reached through TRA, TRR,
/// MCL and MST.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRegisters {
    /// Page control register per level; only bits 0-1 (ring), 7-8 (APT)
    /// and 9-10 (PT) are kept.
    pub pcr: [u16; LEVELS],
    /// Level active before the last level switch.
    pub pvl: u16,
    pub pans: u16,
    pub panc: u16,
    pub opr: u16,
    pub lmp: u16,
    pub csr: u16,
    pub ald: u16,
    pub pes: u16,
    pub pea: u16,
    pub ccl: u16,
    pub lcil: u16,
    pub ucil: u16,
    /// Set by OPCOM.
    pub opcom: bool,
}

/// Valid bits of a page control register.
pub const PCR_MASK: u16 = 0x0783;

/// Field accessors for a page control register value.
pub mod pcr {
    pub fn ring(pcr: u16) -> u16 {
        pcr & 0x3
    }

    /// Alternate page table number.
    pub fn apt(pcr: u16) -> u16 {
        (pcr >> 7) & 0x3
    }

    /// Normal page table number.
    pub fn pt(pcr: u16) -> u16 {
        (pcr >> 9) & 0x3
    }
}

impl SystemRegisters {
    pub fn new() -> Self {
        Self {
            // cache not available
            csr: 1 << 2,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_aliasing() {
        let mut regs = RegisterFile::new();
        regs.set_a(0o1234);
        regs.set_level(5);
        assert_eq!(regs.level(), 5);
        assert_eq!(regs.a(), 0);
        regs.set_a(0o777);
        regs.set_level(0);
        assert_eq!(regs.a(), 0o1234);
        assert_eq!(regs.get_at(5, A), 0o777);
    }

    #[test]
    fn test_globals_stay_in_sync() {
        let mut regs = RegisterFile::new();
        regs.set_global(sts::IONI | sts::PONI, true);
        regs.set_level(9);
        regs.set_flag(sts::C, true);
        assert!(regs.globals_in_sync());
        assert!(regs.flag(sts::C));
        assert_eq!(regs.get_at(3, STS) & sts::C, 0);

        regs.set_global(sts::PONI, false);
        assert!(regs.globals_in_sync());
        assert_eq!(regs.get_at(15, STS) & 0xff00, sts::IONI | (9 << 8));
    }

    #[test]
    fn test_set_bit_on_sts_high_byte_is_global() {
        let mut regs = RegisterFile::new();
        regs.set_bit(STS, 13, true);
        assert!(regs.globals_in_sync());
        assert!(regs.flag(sts::SEXI));
        regs.set_bit(STS, 9, true);
        assert_eq!(regs.level(), 2);
        assert!(regs.globals_in_sync());
    }

    #[test]
    fn test_operand_reads_sts_as_zero() {
        let mut regs = RegisterFile::new();
        regs.set_flag(sts::K, true);
        assert_eq!(regs.operand(STS), 0);
        regs.set_x(7);
        assert_eq!(regs.operand(X), 7);
    }

    #[test]
    fn test_pcr_fields() {
        let v = (2 << 9) | (1 << 7) | 3;
        assert_eq!(pcr::pt(v), 2);
        assert_eq!(pcr::apt(v), 1);
        assert_eq!(pcr::ring(v), 3);
        assert_eq!(SystemRegisters::new().csr, 4);
    }
}
