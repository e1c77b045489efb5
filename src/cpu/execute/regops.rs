//! Register-to-register instructions: SKP, ROP, BOP, shifts, RMPY/RDIV,
//! NLZ/DNZ and the argument group.

use log::warn;

use crate::arith::float::{self, NdFloat};
use crate::arith::int::{self, sign_extend_byte, ShiftOp, SkipCondition};
use crate::cpu::dispatch::Handler;
use crate::cpu::registers::{sts, A, B, D, STS, T, X};

use super::{Cpu, CpuError, Step};

#[inline]
fn source_field(ir: u16) -> usize {
    ((ir >> 3) & 7) as usize
}

#[inline]
fn destination_field(ir: u16) -> usize {
    (ir & 7) as usize
}

impl Cpu {
    /// SKP: skip the next instruction if `dr <cond> sr` holds.
    pub(super) fn skip(&mut self, ir: u16) -> Step {
        let dst = self.regs.operand(destination_field(ir));
        let src = self.regs.operand(source_field(ir));
        self.regs.advance_p(1);
        if SkipCondition::from_instruction(ir).holds(dst, src) {
            self.regs.advance_p(1);
        }
        Ok(None)
    }

    /// ROP: the logical (RSWP RAND REXO RORA) and arithmetic (RADD RSUB
    /// COPY and friends) register operations.
    pub(super) fn register_operation(&mut self, ir: u16) -> Step {
        self.regs.advance_p(1);
        let sr = source_field(ir);
        let dr = destination_field(ir);
        let complement = ir & 0o200 != 0;
        let clear_dst = ir & 0o100 != 0;
        let src = self.regs.operand(sr);
        let operand = if complement { !src } else { src };

        if ir & 0o2000 == 0 {
            if dr == STS {
                return Ok(None);
            }
            let old = self.regs.get(dr);
            let result = match (ir >> 8) & 3 {
                // RSWP
                0 => {
                    if sr != STS {
                        self.regs.set(sr, if clear_dst { 0 } else { old });
                    }
                    operand
                }
                1 if clear_dst => 0,
                1 => old & operand,
                2 if clear_dst => operand,
                2 => old ^ operand,
                _ if clear_dst => operand,
                _ => old | operand,
            };
            self.regs.set(dr, result);
            return Ok(None);
        }

        if dr == STS {
            self.regs.set_flag(sts::C, false);
            return Ok(None);
        }
        let base = if clear_dst { 0 } else { self.regs.get(dr) };
        let carry = self.regs.flag(sts::C);
        let result = match (ir >> 7) & 7 {
            0 if clear_dst => src,
            0 => self.add_with_flags(base, src, false),
            1 if clear_dst => !src,
            1 => self.add_with_flags(base, !src, false),
            2 => self.add_with_flags(base, src, true),
            3 => self.add_with_flags(base, !src, true),
            4 => self.add_with_flags(base, src, carry),
            5 => self.add_with_flags(base, !src, carry),
            _ => self.regs.get(dr),
        };
        self.regs.set(dr, result);
        Ok(None)
    }

    /// BOP: single-bit operations against the K accumulator.
    pub(super) fn bit_operation(&mut self, ir: u16) -> Step {
        self.regs.advance_p(1);
        let bit = (ir >> 3) & 0xf;
        let dr = destination_field(ir);
        let value = self.regs.bit(dr, bit);
        let k = self.regs.flag(sts::K);
        match (ir >> 7) & 0xf {
            0 => self.regs.set_bit(dr, bit, false),
            1 => self.regs.set_bit(dr, bit, true),
            2 => self.regs.set_bit(dr, bit, !value),
            3 => self.regs.set_bit(dr, bit, k),
            4 => self.skip_if(!value),
            5 => self.skip_if(value),
            6 => self.skip_if(value != k),
            7 => self.skip_if(value == k),
            // BSTC
            8 => {
                self.regs.set_bit(dr, bit, !k);
                self.regs.set_flag(sts::K, true);
            }
            // BSTA
            9 => {
                self.regs.set_bit(dr, bit, k);
                self.regs.set_flag(sts::K, false);
            }
            10 => self.regs.set_flag(sts::K, !value),
            11 => self.regs.set_flag(sts::K, value),
            12 => self.regs.set_flag(sts::K, !value && k),
            13 => self.regs.set_flag(sts::K, value && k),
            14 => self.regs.set_flag(sts::K, !value || k),
            _ => self.regs.set_flag(sts::K, value || k),
        }
        Ok(None)
    }

    fn skip_if(&mut self, cond: bool) {
        if cond {
            self.regs.advance_p(1);
        }
    }

    /// SHT, SHD, SHA and SAD. The last bit shifted out goes to M.
    pub(super) fn shift(&mut self, ir: u16) -> Step {
        let op = ShiftOp::from_instruction(ir);
        let m = self.regs.flag(sts::M);
        let m = match (ir >> 7) & 3 {
            3 => {
                let pair = (self.regs.a() as u32) << 16 | self.regs.d() as u32;
                let (v, m) = int::shift32(pair, op, m);
                self.regs.set_a((v >> 16) as u16);
                self.regs.set_d(v as u16);
                m
            }
            sel => {
                let r = [T, D, A][sel as usize];
                let (v, m) = int::shift16(self.regs.get(r), op, m);
                self.regs.set(r, v);
                m
            }
        };
        self.regs.set_flag(sts::M, m);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// RMPY: signed `sr * dr` into A:D.
    pub(super) fn register_multiply(&mut self, ir: u16) -> Step {
        let src = self.regs.operand(source_field(ir));
        let dst = self.regs.operand(destination_field(ir));
        let (hi, lo, overflow) = int::rmpy(src, dst);
        self.regs.set_a(hi);
        self.regs.set_d(lo);
        self.regs.set_flag(sts::O | sts::Q, overflow);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// RDIV: A:D divided by `sr`, quotient to A and remainder to D.
    pub(super) fn register_divide(&mut self, ir: u16) -> Step {
        let divisor = self.regs.operand(source_field(ir));
        let p = self.regs.p();
        let Some((q, r)) = int::rdiv(self.regs.a(), self.regs.d(), divisor) else {
            warn!("RDIV by zero at {:06o}", p);
            return Err(CpuError::DivideByZero { p });
        };
        self.regs.set_a(q);
        self.regs.set_d(r);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// NLZ: convert the integer in A to a float in T:A:D.
    pub(super) fn normalize(&mut self, ir: u16) -> Step {
        let [t, a, d] = float::normalize(self.regs.a(), ir as u8 as i8).words();
        self.regs.set_t(t);
        self.regs.set_a(a);
        self.regs.set_d(d);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// DNZ: convert the float in T:A:D to an integer in A.
    pub(super) fn denormalize(&mut self, ir: u16) -> Step {
        let value = NdFloat::from_words([self.regs.t(), self.regs.a(), self.regs.d()]);
        let r = float::denormalize(value, ir as u8 as i8);
        self.regs.set_a(r.a);
        self.regs.set_t(0);
        self.regs.set_d(0);
        if r.overflow {
            self.regs.set_flag(sts::Z, true);
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// SAB SAA SAT SAX load the sign-extended argument; AAB AAA AAT AAX
    /// add it with flags.
    pub(super) fn argument(&mut self, handler: Handler, ir: u16) -> Step {
        let arg = sign_extend_byte(ir);
        let (r, add) = match handler {
            Handler::Sab => (B, false),
            Handler::Saa => (A, false),
            Handler::Sat => (T, false),
            Handler::Sax => (X, false),
            Handler::Aab => (B, true),
            Handler::Aaa => (A, true),
            Handler::Aat => (T, true),
            _ => (X, true),
        };
        let v = if add { self.add_with_flags(self.regs.get(r), arg, false) } else { arg };
        self.regs.set(r, v);
        self.regs.advance_p(1);
        Ok(None)
    }
}
