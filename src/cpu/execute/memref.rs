//! Memory reference instructions and jumps.

use log::debug;

use crate::arith::float::{self, FloatStatus, NdFloat};
use crate::arith::int::{self, sign_extend_byte};
use crate::cpu::dispatch::Handler;
use crate::cpu::registers::sts;

use super::{Cpu, Step};

impl Cpu {
    pub(super) fn store(&mut self, handler: Handler, ir: u16) -> Step {
        let ea = self.effective_address(ir)?;
        let (a, d, t) = (self.regs.a(), self.regs.d(), self.regs.t());
        let (words, n) = match handler {
            Handler::Stz => ([0, 0, 0], 1),
            Handler::Sta => ([a, 0, 0], 1),
            Handler::Stt => ([t, 0, 0], 1),
            Handler::Stx => ([self.regs.x(), 0, 0], 1),
            Handler::Std => ([a, d, 0], 2),
            _ => ([t, a, d], 3),
        };
        for (i, &w) in words[..n].iter().enumerate() {
            self.memory_write(ea.addr.wrapping_add(i as u16), w, ea.use_apt)?;
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    pub(super) fn load(&mut self, handler: Handler, ir: u16) -> Step {
        let ea = self.effective_address(ir)?;
        let first = self.memory_read(ea.addr, ea.use_apt)?;
        match handler {
            Handler::Lda => self.regs.set_a(first),
            Handler::Ldt => self.regs.set_t(first),
            Handler::Ldx => self.regs.set_x(first),
            Handler::Ldd => {
                let second = self.memory_read(ea.addr.wrapping_add(1), ea.use_apt)?;
                self.regs.set_a(first);
                self.regs.set_d(second);
            }
            _ => {
                let second = self.memory_read(ea.addr.wrapping_add(1), ea.use_apt)?;
                let third = self.memory_read(ea.addr.wrapping_add(2), ea.use_apt)?;
                self.regs.set_t(first);
                self.regs.set_a(second);
                self.regs.set_d(third);
            }
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// MIN, ADD, SUB, AND, ORA, MPY.
    pub(super) fn memory_arithmetic(&mut self, handler: Handler, ir: u16) -> Step {
        let ea = self.effective_address(ir)?;
        let m = self.memory_read(ea.addr, ea.use_apt)?;
        let a = self.regs.a();
        match handler {
            Handler::Min => {
                let v = m.wrapping_add(1);
                self.memory_write(ea.addr, v, ea.use_apt)?;
                if v == 0 {
                    self.regs.advance_p(1);
                }
            }
            Handler::Add => {
                let v = self.add_with_flags(a, m, false);
                self.regs.set_a(v);
            }
            Handler::Sub => {
                let v = self.add_with_flags(a, !m, true);
                self.regs.set_a(v);
            }
            Handler::And => self.regs.set_a(a & m),
            Handler::Ora => self.regs.set_a(a | m),
            _ => {
                let (v, overflow) = int::mpy(a, m);
                self.regs.set_flag(sts::O | sts::Q, overflow);
                self.regs.set_a(v);
            }
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// FAD, FSB, FMU, FDV on T:A:D and a three-word operand.
    ///
    /// Only FAD reports precision loss, through TG. Overflow, underflow and
    /// division by zero are logged but leave the status register alone.
    pub(super) fn float_arithmetic(&mut self, handler: Handler, ir: u16) -> Step {
        let ea = self.effective_address(ir)?;
        let mut words = [0u16; 3];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.memory_read(ea.addr.wrapping_add(i as u16), ea.use_apt)?;
        }
        let operand = NdFloat::from_words(words);
        let acc = NdFloat::from_words([self.regs.t(), self.regs.a(), self.regs.d()]);
        let (result, status) = match handler {
            Handler::Fad => float::add(acc, operand),
            Handler::Fsb => float::sub(acc, operand),
            Handler::Fmu => float::mul(acc, operand),
            _ => float::div(acc, operand),
        };
        match status {
            FloatStatus::Exact => {}
            FloatStatus::Inexact => {
                if handler == Handler::Fad {
                    self.regs.set_flag(sts::TG, true);
                }
            }
            FloatStatus::Overflow | FloatStatus::Underflow | FloatStatus::DivideByZero => {
                debug!("{:?} at {:06o}: {:?}", handler, self.regs.p(), status);
            }
        }
        let [t, a, d] = result.words();
        self.regs.set_t(t);
        self.regs.set_a(a);
        self.regs.set_d(d);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// JMP and JPL. The return address of JPL goes to L.
    pub(super) fn jump_to(&mut self, handler: Handler, ir: u16) -> Step {
        let ea = self.effective_address(ir)?;
        if handler == Handler::Jpl {
            let ret = self.regs.p().wrapping_add(1);
            self.regs.set_l(ret);
        }
        self.regs.set_p(ea.addr);
        Ok(None)
    }

    /// Relative jumps on A or X. JPC and JNC count X up first.
    pub(super) fn conditional_jump(&mut self, handler: Handler, ir: u16) -> Step {
        let a = self.regs.a();
        let taken = match handler {
            Handler::Jap => a & 0x8000 == 0,
            Handler::Jan => a & 0x8000 != 0,
            Handler::Jaz => a == 0,
            Handler::Jaf => a != 0,
            Handler::Jpc | Handler::Jnc => {
                let x = self.regs.x().wrapping_add(1);
                self.regs.set_x(x);
                (x & 0x8000 == 0) == (handler == Handler::Jpc)
            }
            Handler::Jxz => self.regs.x() == 0,
            _ => self.regs.x() & 0x8000 != 0,
        };
        if taken {
            let p = self.add_with_flags(self.regs.p(), sign_extend_byte(ir), false);
            self.regs.set_p(p);
        } else {
            self.regs.advance_p(1);
        }
        Ok(None)
    }
}
