//! System control: internal registers, interrupt and paging mode bits,
//! IOX, WAIT/MON, inter-level register access, EXR and IDENT.

use log::{debug, trace, warn};

use crate::cpu::decode::decode;
use crate::cpu::dispatch::Handler;
use crate::cpu::interrupt::{iid, INTERNAL_LEVEL};
use crate::cpu::registers::{sts, A, B, D, L, P, PCR_MASK, STS, T, X};

use super::{Cpu, Step, StopReason};

/// Canonical opcode of EXR.
const EXR: u16 = 0o140600;

/// Registers saved by SRB and restored by LRB, in memory order.
const REGISTER_BLOCK: [usize; 8] = [P, X, T, A, D, L, STS, B];

impl Cpu {
    /// TRA: internal register to A. PGS and IIC are cleared by the read.
    pub(super) fn transfer_to_a(&mut self, ir: u16) -> Step {
        let a = self.regs.a();
        let value = match ir & 0xf {
            0 => self.sys.pans,
            1 => self.regs.sts(),
            2 => self.sys.opr,
            3 => self.irq.update(|s| s.take_pgs())?,
            // PVL is returned as the instruction IRR <pvl> DP
            4 => ((self.sys.pvl & 7) << 3) | 0o153602,
            5 => self.irq.update(|s| s.read_iic())?,
            6 => self.irq.with(|s| s.pid)?,
            7 => self.irq.with(|s| s.pie)?,
            8 => self.sys.csr,
            9 => self.regs.level() as u16,
            10 => self.sys.ald,
            11 => self.sys.pes,
            12 => self.sys.pcr[((a >> 3) & 0xf) as usize] & PCR_MASK,
            13 => self.sys.pea,
            _ => 0,
        };
        self.regs.set_a(value);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// TRR: A to internal register.
    pub(super) fn transfer_from_a(&mut self, ir: u16) -> Step {
        let a = self.regs.a();
        match ir & 0xf {
            0 => self.sys.panc = a,
            1 => {
                let level = self.regs.level();
                self.regs.set_local_sts(level, a);
            }
            2 => self.sys.lmp = a,
            3 => {
                let level = ((a >> 3) & 0xf) as usize;
                self.sys.pcr[level] = a & PCR_MASK;
                trace!("PCR[{}] = {:06o}", level, a & PCR_MASK);
            }
            5 => self.irq.update(|s| s.iie = a)?,
            6 => self.irq.update(|s| s.pid = a)?,
            7 => self.irq.update(|s| s.pie = a)?,
            8 => self.sys.ccl = a,
            9 => self.sys.lcil = a,
            10 => self.sys.ucil = a,
            _ => {}
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// MCL: clear the bits set in A from STS, PID or PIE.
    pub(super) fn masked_clear(&mut self, ir: u16) -> Step {
        let a = self.regs.a();
        match ir & 0xf {
            1 => {
                let level = self.regs.level();
                let s = self.regs.sts();
                self.regs.set_local_sts(level, s & !(a & sts::LOCAL));
            }
            6 => self.irq.update(|s| s.pid &= !a)?,
            7 => self.irq.update(|s| s.pie &= !a)?,
            _ => {}
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// MST: set the bits set in A in STS, PID or PIE.
    pub(super) fn masked_set(&mut self, ir: u16) -> Step {
        let a = self.regs.a();
        match ir & 0xf {
            1 => {
                let level = self.regs.level();
                let s = self.regs.sts();
                self.regs.set_local_sts(level, s | (a & sts::LOCAL));
            }
            6 => self.irq.update(|s| s.pid |= a)?,
            7 => self.irq.update(|s| s.pie |= a)?,
            _ => {}
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// OPCOM and the interrupt, paging and extended-addressing switches.
    pub(super) fn system_mode(&mut self, handler: Handler) -> Step {
        match handler {
            Handler::Opcom => self.sys.opcom = true,
            Handler::Iof => self.regs.set_global(sts::IONI, false),
            Handler::Ion => self.regs.set_global(sts::IONI, true),
            Handler::Pof => self.regs.set_global(sts::PONI, false),
            Handler::Pon => self.regs.set_global(sts::PONI, true),
            Handler::Piof => self.regs.set_global(sts::IONI | sts::PONI, false),
            Handler::Pion => self.regs.set_global(sts::IONI | sts::PONI, true),
            Handler::Sex => self.regs.set_global(sts::SEXI, true),
            _ => self.regs.set_global(sts::SEXI, false),
        }
        debug!("{:?}: STS {:06o}", handler, self.regs.sts());
        self.regs.advance_p(1);
        Ok(None)
    }

    /// IOX / IOXT: one device register transfer through A.
    pub(super) fn iox(&mut self, device: u16) -> Step {
        let mut a = self.regs.a();
        self.bus.io_op(device, &mut a, &self.irq)?;
        self.regs.set_a(a);
        self.regs.advance_p(1);
        Ok(None)
    }

    fn physical_ad(&self) -> u32 {
        (self.regs.a() as u32) << 16 | self.regs.d() as u32
    }

    /// EXAM: T = physical word at A:D.
    pub(super) fn examine(&mut self) -> Step {
        let v = self.physical_read(self.physical_ad());
        self.regs.set_t(v);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// DEPO: physical word at A:D = T.
    pub(super) fn deposit(&mut self) -> Step {
        let addr = self.physical_ad();
        let t = self.regs.t();
        self.physical_write(addr, t);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// WAIT halts with interrupts off; otherwise it gives up the level.
    pub(super) fn wait(&mut self) -> Step {
        self.regs.advance_p(1);
        if !self.regs.flag(sts::IONI) {
            debug!("WAIT with IONI off at {:06o}", self.regs.p().wrapping_sub(1));
            return Ok(Some(StopReason::Wait));
        }
        let level = self.regs.level();
        if level != 0 {
            self.irq.update(|s| s.pid &= !(1 << level))?;
        }
        Ok(None)
    }

    /// MON: monitor call number to T on level 14.
    pub(super) fn monitor_call(&mut self, ir: u16) -> Step {
        self.regs.advance_p(1);
        self.regs.set_at(INTERNAL_LEVEL as usize, T, ir & 0xff);
        self.irq.raise(INTERNAL_LEVEL, iid::MONITOR_CALL)?;
        Ok(None)
    }

    /// SRB: store the register block of a level at X.
    pub(super) fn store_register_block(&mut self, ir: u16) -> Step {
        self.regs.advance_p(1);
        let level = ((ir >> 3) & 0xf) as usize;
        let base = self.regs.x();
        for (i, &r) in REGISTER_BLOCK.iter().enumerate() {
            let mut v = self.regs.get_at(level, r);
            if r == STS {
                v &= sts::LOCAL;
            }
            self.memory_write(base.wrapping_add(i as u16), v, false)?;
        }
        Ok(None)
    }

    /// LRB: load the register block of a level from X. P of the running
    /// level is left alone.
    pub(super) fn load_register_block(&mut self, ir: u16) -> Step {
        self.regs.advance_p(1);
        let level = ((ir >> 3) & 0xf) as usize;
        let current = self.regs.level();
        let base = self.regs.x();
        for (i, &r) in REGISTER_BLOCK.iter().enumerate() {
            if r == P && level == current {
                continue;
            }
            let v = self.memory_read(base.wrapping_add(i as u16), false)?;
            if r == STS {
                self.regs.set_local_sts(level, v);
            } else {
                self.regs.set_at(level, r, v);
            }
        }
        Ok(None)
    }

    /// IRW: A to register `dr` of a level.
    pub(super) fn inter_register_write(&mut self, ir: u16) -> Step {
        let level = ((ir >> 3) & 0xf) as usize;
        let dr = (ir & 7) as usize;
        let a = self.regs.a();
        if dr == STS {
            self.regs.set_local_sts(level, a);
        } else if !(dr == P && level == self.regs.level()) {
            self.regs.set_at(level, dr, a);
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    /// IRR: register `dr` of a level to A.
    pub(super) fn inter_register_read(&mut self, ir: u16) -> Step {
        let level = ((ir >> 3) & 0xf) as usize;
        let dr = (ir & 7) as usize;
        let mut v = self.regs.get_at(level, dr);
        if dr == STS {
            v &= sts::LOCAL;
        }
        self.regs.set_a(v);
        self.regs.advance_p(1);
        Ok(None)
    }

    /// EXR: execute the instruction held in `sr`. The executed instruction
    /// moves P itself. EXR of EXR only sets Z.
    pub(super) fn execute_register(&mut self, ir: u16) -> Step {
        let target = self.regs.operand(((ir >> 3) & 7) as usize);
        if decode(target, self.table.map()) == EXR {
            warn!("EXR of EXR at {:06o}", self.regs.p());
            self.regs.set_flag(sts::Z, true);
            return Ok(None);
        }
        self.execute(target)
    }

    /// IDENT PL10..PL13: code of the oldest device on the level to A.
    pub(super) fn ident(&mut self, ir: u16) -> Step {
        let level = match ir & 0o77 {
            0o04 => 10,
            0o11 => 11,
            0o22 => 12,
            _ => 13,
        };
        if let Some(code) = self.irq.ident(level)? {
            self.regs.set_a(code);
        }
        self.regs.advance_p(1);
        Ok(None)
    }

    pub(super) fn unimplemented(&mut self, ir: u16) -> Step {
        let p = self.regs.p();
        warn!("unimplemented instruction {:06o} at {:06o}", ir, p);
        self.regs.advance_p(1);
        Ok(Some(StopReason::Unimplemented { opcode: ir, p }))
    }

    pub(super) fn illegal(&mut self, ir: u16) -> Step {
        debug!("illegal instruction {:06o} at {:06o}", ir, self.regs.p());
        self.irq.raise(INTERNAL_LEVEL, iid::ILLEGAL_INSTRUCTION)?;
        self.regs.advance_p(1);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{machine, steps};
    use super::super::CpuError;
    use crate::cpu::interrupt::{iid, InterruptLine};
    use crate::cpu::io::{IoBus, IoError};
    use crate::cpu::registers::{sts, A, B, D, L, P, STS, T, X};

    #[test]
    fn test_tra_trr_internal_registers() {
        // TRR LMP; TRA OPR; TRA LEV
        let mut cpu = machine(&[0o150102, 0o150002, 0o150011]);
        cpu.regs.set_a(0o777);
        cpu.sys.opr = 0o123;
        steps(&mut cpu, 2);
        assert_eq!(cpu.sys.lmp, 0o777);
        assert_eq!(cpu.regs.a(), 0o123);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0);
    }

    #[test]
    fn test_tra_pvl_format() {
        let mut cpu = machine(&[0o150004]);
        cpu.sys.pvl = 5;
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0o153652);
    }

    #[test]
    fn test_tra_pgs_and_iic_read_clear() {
        let mut cpu = machine(&[0o150003, 0o150005]);
        cpu.interrupts()
            .update(|s| {
                s.pgs = 0o40003;
                s.iie = 0xffff;
                s.iid = iid::PAGE_FAULT;
            })
            .unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0o40003);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 3);
        let s = cpu.interrupts().snapshot().unwrap();
        assert_eq!((s.pgs, s.iid), (0, 0));
    }

    #[test]
    fn test_trr_pcr_and_tra_pcr() {
        // TRR PCR; TRA PCR
        let mut cpu = machine(&[0o150103, 0o150014]);
        let value = (2 << 9) | (1 << 7) | (3 << 3) | 2;
        cpu.regs.set_a(value | 0o100000);
        steps(&mut cpu, 1);
        assert_eq!(cpu.sys.pcr[3], (2 << 9) | (1 << 7) | 2);
        cpu.regs.set_a(3 << 3);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), (2 << 9) | (1 << 7) | 2);
    }

    #[test]
    fn test_trr_pie_updates_pk() {
        let mut cpu = machine(&[0o150107]);
        cpu.interrupts().update(|s| s.pid = 1 << 9).unwrap();
        cpu.regs.set_a(1 << 9);
        steps(&mut cpu, 1);
        assert_eq!(cpu.interrupts().pk().unwrap(), 9);
    }

    #[test]
    fn test_mcl_mst_sts_keep_globals() {
        // MST STS; MCL STS
        let mut cpu = machine(&[0o150301, 0o150201]);
        cpu.regs.set_global(sts::SEXI, true);
        cpu.regs.set_a(0o177400 | sts::K | sts::C);
        steps(&mut cpu, 1);
        assert!(cpu.regs.flag(sts::K) && cpu.regs.flag(sts::C));
        assert!(cpu.regs.globals_in_sync());
        assert!(cpu.regs.flag(sts::SEXI));
        assert!(!cpu.regs.flag(sts::IONI));
        cpu.regs.set_a(sts::C);
        steps(&mut cpu, 1);
        assert!(cpu.regs.flag(sts::K));
        assert!(!cpu.regs.flag(sts::C));
    }

    #[test]
    fn test_mst_mcl_pid() {
        let mut cpu = machine(&[0o150306, 0o150206]);
        cpu.regs.set_a(0o1400);
        steps(&mut cpu, 1);
        assert_eq!(cpu.interrupts().snapshot().unwrap().pid, 0o1400);
        cpu.regs.set_a(0o400);
        steps(&mut cpu, 1);
        assert_eq!(cpu.interrupts().snapshot().unwrap().pid, 0o1000);
    }

    #[test]
    fn test_mode_switches() {
        // SEX; PON; PIOF; OPCOM
        let mut cpu = machine(&[0o150406, 0o150410, 0o150405, 0o150400]);
        cpu.mmu.tables.set_entry(0, 0, crate::cpu::memory::pte::PERMITS);
        steps(&mut cpu, 2);
        assert!(cpu.regs.flag(sts::SEXI) && cpu.regs.flag(sts::PONI));
        steps(&mut cpu, 2);
        assert!(!cpu.regs.flag(sts::PONI) && !cpu.regs.flag(sts::IONI));
        assert!(cpu.sys.opcom);
        assert!(cpu.regs.globals_in_sync());
    }

    struct Echo {
        last: Option<(u16, u16)>,
    }

    impl IoBus for Echo {
        fn io_op(&mut self, device: u16, a: &mut u16, _irq: &InterruptLine) -> Result<(), IoError> {
            self.last = Some((device, *a));
            if device & 1 == 0 {
                *a = 0o42;
            }
            Ok(())
        }
    }

    struct Broken;

    impl IoBus for Broken {
        fn io_op(&mut self, device: u16, _a: &mut u16, _irq: &InterruptLine) -> Result<(), IoError> {
            Err(IoError::Device { device, message: "jammed".into() })
        }
    }

    #[test]
    fn test_iox_and_ioxt() {
        // IOX 300 (read); IOXT
        let mut cpu = machine(&[0o164300, 0o150415]);
        cpu.set_bus(Box::new(Echo { last: None }));
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0o42);
        cpu.regs.set_t(0o301);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0o42);
        assert_eq!(cpu.regs.p(), 2);
    }

    #[test]
    fn test_iox_device_error_propagates() {
        let mut cpu = machine(&[0o164301]);
        cpu.set_bus(Box::new(Broken));
        assert!(matches!(cpu.step(), Err(CpuError::Io(IoError::Device { device: 0o301, .. }))));
    }

    #[test]
    fn test_iox_without_device_times_out() {
        let mut cpu = machine(&[0o164300]);
        cpu.interrupts().update(|s| s.iie = iid::IOX_ERROR).unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.interrupts().snapshot().unwrap().iid, iid::IOX_ERROR);
    }

    #[test]
    fn test_exam_depo() {
        // DEPO; EXAM after clearing T
        let mut cpu = machine(&[0o150417, 0o171000, 0o150416]);
        cpu.regs.set_a(0);
        cpu.regs.set_d(0o1000);
        cpu.regs.set_t(0o4444);
        steps(&mut cpu, 1);
        assert_eq!(cpu.mmu.memory.read(0o1000), 0o4444);
        steps(&mut cpu, 2);
        assert_eq!(cpu.regs.t(), 0o4444);
    }

    #[test]
    fn test_wait_gives_up_level() {
        let mut cpu = machine(&[0o151000]);
        cpu.regs.set_global(sts::IONI, true);
        cpu.regs.set_level(4);
        cpu.regs.set_p(0);
        cpu.interrupts()
            .update(|s| {
                s.pid = (1 << 4) | (1 << 1);
                s.pie = (1 << 4) | (1 << 1);
            })
            .unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.interrupts().snapshot().unwrap().pid, 1 << 1);
        assert_eq!(cpu.regs.level(), 1);
        assert_eq!(cpu.sys.pvl, 4);
        assert_eq!(cpu.regs.get_at(4, P), 1);
    }

    #[test]
    fn test_wait_on_level_zero_is_noop() {
        let mut cpu = machine(&[0o151000]);
        cpu.regs.set_global(sts::IONI, true);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 1);
    }

    #[test]
    fn test_mon_raises_level_14() {
        let mut cpu = machine(&[0o153037]);
        cpu.interrupts()
            .update(|s| {
                s.iie = iid::MONITOR_CALL;
                s.pie = 1 << 14;
            })
            .unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.get_at(14, T), 0o37);
        assert_eq!(cpu.interrupts().pk().unwrap(), 14);
        assert_eq!(cpu.regs.p(), 1);
    }

    #[test]
    fn test_srb_lrb_round_trip() {
        // SRB level 3; LRB level 5
        let mut cpu = machine(&[0o152430, 0o152650]);
        for (i, r) in [P, X, T, A, D, L, B].into_iter().enumerate() {
            cpu.regs.set_at(3, r, 0o100 + i as u16);
        }
        cpu.regs.set_local_sts(3, sts::C);
        cpu.regs.set_x(0o1000);
        steps(&mut cpu, 1);
        let block: Vec<u16> = cpu.mmu.memory.dump(0o1000, 8).into_iter().map(|(_, w)| w).collect();
        assert_eq!(block, vec![0o100, 0o101, 0o102, 0o103, 0o104, 0o105, sts::C, 0o106]);

        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.get_at(5, P), 0o100);
        assert_eq!(cpu.regs.get_at(5, B), 0o106);
        assert_eq!(cpu.regs.get_at(5, STS) & sts::LOCAL, sts::C);
        assert!(cpu.regs.globals_in_sync());
    }

    #[test]
    fn test_lrb_current_level_keeps_p() {
        let mut cpu = machine(&[0o152600]);
        cpu.regs.set_x(0o1000);
        cpu.mmu.memory.load(0o1000, &[0o7777, 0o1, 0o2, 0o3]);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.p(), 1);
        assert_eq!(cpu.regs.a(), 0o3);
        assert_eq!(cpu.regs.x(), 0o1);
    }

    #[test]
    fn test_irw_irr() {
        // IRW level 6 DT; IRR level 6 DT; IRR level 6 DSTS
        let mut cpu = machine(&[0o153466, 0o170400, 0o153666, 0o153660]);
        cpu.regs.set_a(0o555);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.get_at(6, T), 0o555);
        steps(&mut cpu, 2);
        assert_eq!(cpu.regs.a(), 0o555);
        cpu.regs.set_local_sts(6, sts::Z);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), sts::Z);
    }

    #[test]
    fn test_exr_runs_register() {
        // EXR SA with A = SAT 5
        let mut cpu = machine(&[0o140600 | (A as u16) << 3]);
        cpu.regs.set_a(0o171005);
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.t(), 5);
        assert_eq!(cpu.regs.p(), 1);
    }

    #[test]
    fn test_exr_of_exr_sets_z() {
        let mut cpu = machine(&[0o140600 | (A as u16) << 3]);
        cpu.regs.set_a(0o140610);
        steps(&mut cpu, 1);
        assert!(cpu.regs.flag(sts::Z));
        assert_eq!(cpu.regs.p(), 0);
    }

    #[test]
    fn test_ident_takes_chain_entry() {
        let mut cpu = machine(&[0o143611, 0o143611]);
        cpu.interrupts().raise_device(11, 0o17, 1).unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0o17);
        cpu.interrupts().update(|s| s.iie = iid::IOX_ERROR).unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0o17);
        assert_ne!(cpu.interrupts().snapshot().unwrap().iid & iid::IOX_ERROR, 0);
    }
}
