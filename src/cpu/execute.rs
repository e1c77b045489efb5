//! CPU execution engine for the ND100.
//!
//! Implements the fetch-decode-execute cycle, the memory access paths that
//! turn MMU faults into interrupts, and the per-instruction level switch.
//! The instruction handlers themselves live in the submodules, grouped the
//! way the reference manual groups them.

use std::fmt;
use std::sync::Arc;
use std::thread;

use log::{debug, error, log_enabled, trace, warn, Level};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arith::int::{self, AddOutcome};
use crate::disasm;

use super::address::{self, Bases, EffectiveAddress};
use super::control::{Gate, RunControl, RunMode, RunState};
use super::decode::{decode, CpuModel};
use super::dispatch::{DispatchTable, Handler};
use super::interrupt::{InterruptError, InterruptLine, InterruptState};
use super::io::{IoBus, IoError, NullBus};
use super::memory::{ByteSelect, PhysicalMemory};
use super::mmu::{AccessContext, FaultInfo, Mmu};
use super::registers::{sts, RegisterFile, SystemRegisters};

mod extended;
mod memref;
mod regops;
mod system;

/// Failures of the emulator itself. Guest-visible faults are interrupts,
/// not errors.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("division by zero at P={p:06o}")]
    DivideByZero { p: u16 },
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
    #[error("I/O bus: {0}")]
    Io(IoError),
}

impl From<InterruptError> for CpuError {
    fn from(_: InterruptError) -> Self {
        CpuError::Poisoned("interrupt")
    }
}

impl From<IoError> for CpuError {
    fn from(e: IoError) -> Self {
        match e {
            IoError::Interrupt(_) => CpuError::Poisoned("interrupt"),
            other => CpuError::Io(other),
        }
    }
}

/// Why the CPU stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A recognised instruction the emulator does not implement.
    Unimplemented { opcode: u16, p: u16 },
    /// WAIT with the interrupt system off.
    Wait,
    Breakpoint(u16),
    InstructionLimit,
    /// Another thread stopped or shut down the CPU.
    External,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Unimplemented { opcode, p } => {
                write!(f, "unimplemented instruction {:06o} at {:06o}", opcode, p)
            }
            StopReason::Wait => write!(f, "WAIT with interrupts off"),
            StopReason::Breakpoint(p) => write!(f, "breakpoint at {:06o}", p),
            StopReason::InstructionLimit => write!(f, "instruction limit reached"),
            StopReason::External => write!(f, "stopped"),
        }
    }
}

/// Result of one handler: `Some` stops the run loop.
type Step = Result<Option<StopReason>, CpuError>;

/// Serializable view of the machine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub model: CpuModel,
    pub level: usize,
    pub cycles: u64,
    pub registers: RegisterFile,
    pub system: SystemRegisters,
    pub interrupts: InterruptState,
    pub run: RunState,
}

/// The ND100 CPU.
pub struct Cpu {
    pub regs: RegisterFile,
    pub sys: SystemRegisters,
    pub mmu: Mmu,
    irq: InterruptLine,
    control: Arc<RunControl>,
    bus: Box<dyn IoBus>,
    model: CpuModel,
    table: DispatchTable,
    /// Prefetched instruction word; `None` after P was changed from outside.
    pfb: Option<u16>,
    cycles: u64,
}

impl Cpu {
    /// CPU with the full 16M-word memory.
    pub fn new(model: CpuModel) -> Self {
        Self::with_memory(model, PhysicalMemory::new())
    }

    pub fn with_memory(model: CpuModel, memory: PhysicalMemory) -> Self {
        let mut cpu = Self {
            regs: RegisterFile::new(),
            sys: SystemRegisters::new(),
            mmu: Mmu::new(memory),
            irq: InterruptLine::new(),
            control: Arc::new(RunControl::new()),
            bus: Box::new(NullBus),
            model,
            table: DispatchTable::build(model.opcode_map()),
            pfb: None,
            cycles: 0,
        };
        cpu.reset_registers();
        cpu
    }

    fn reset_registers(&mut self) {
        self.regs.reset();
        self.regs.set_local_sts(0, sts::O);
        self.regs.set_global(sts::N100, true);
        self.sys = SystemRegisters::new();
        self.pfb = None;
        self.cycles = 0;
    }

    /// Master clear: registers, interrupt state, page tables and memory.
    pub fn reset(&mut self) -> Result<(), CpuError> {
        self.reset_registers();
        self.irq.reset()?;
        self.mmu.tables.clear();
        self.mmu.memory.clear();
        self.control.start();
        Ok(())
    }

    pub fn model(&self) -> CpuModel {
        self.model
    }

    /// Switch CPU model. The dispatch table is rebuilt only here.
    pub fn set_model(&mut self, model: CpuModel) {
        if model != self.model {
            debug!("cpu model {} -> {}", self.model, model);
            self.model = model;
            self.table = DispatchTable::build(model.opcode_map());
        }
    }

    /// Handle for devices that raise interrupts.
    pub fn interrupts(&self) -> &InterruptLine {
        &self.irq
    }

    /// Handle for threads that start and stop the CPU.
    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    pub fn set_bus(&mut self, bus: Box<dyn IoBus>) {
        self.bus = bus;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Set P on the current level and drop the prefetched word.
    pub fn jump(&mut self, p: u16) {
        self.regs.set_p(p);
        self.pfb = None;
    }

    pub fn snapshot(&self) -> Result<CpuSnapshot, CpuError> {
        Ok(CpuSnapshot {
            model: self.model,
            level: self.regs.level(),
            cycles: self.cycles,
            registers: self.regs.clone(),
            system: self.sys.clone(),
            interrupts: self.irq.snapshot()?,
            run: self.control.snapshot(),
        })
    }

    // ==================== Memory access ====================

    fn context(&self) -> AccessContext {
        AccessContext::current(&self.regs, &self.sys)
    }

    fn fault(&self, info: FaultInfo) -> Result<(), CpuError> {
        self.irq.raise_fault(info.fault.subcode(), info.pgs)?;
        Ok(())
    }

    /// Virtual read. A faulting read raises the interrupt and yields 0.
    pub fn memory_read(&mut self, addr: u16, use_apt: bool) -> Result<u16, CpuError> {
        let ctx = self.context();
        match self.mmu.read(addr, use_apt, &ctx) {
            Ok(v) => Ok(v),
            Err(info) => self.fault(info).map(|_| 0),
        }
    }

    /// Instruction fetch; checks the fetch permit instead of the read permit.
    pub fn memory_fetch(&mut self, addr: u16, use_apt: bool) -> Result<u16, CpuError> {
        let ctx = self.context();
        match self.mmu.fetch(addr, use_apt, &ctx) {
            Ok(v) => Ok(v),
            Err(info) => self.fault(info).map(|_| 0),
        }
    }

    /// Virtual word write. A faulting write is dropped.
    pub fn memory_write(&mut self, addr: u16, value: u16, use_apt: bool) -> Result<(), CpuError> {
        self.memory_write_select(addr, value, ByteSelect::Word, use_apt)
    }

    pub fn memory_write_select(
        &mut self,
        addr: u16,
        value: u16,
        select: ByteSelect,
        use_apt: bool,
    ) -> Result<(), CpuError> {
        let ctx = self.context();
        match self.mmu.write(addr, value, select, use_apt, &ctx) {
            Ok(()) => Ok(()),
            Err(info) => self.fault(info),
        }
    }

    /// Untranslated read for loaders, DMA and the TX instructions.
    pub fn physical_read(&self, addr: u32) -> u16 {
        self.mmu.physical_read(addr, &self.context())
    }

    pub fn physical_write(&mut self, addr: u32, value: u16) {
        let ctx = self.context();
        self.mmu.physical_write(addr, value, &ctx);
    }

    fn effective_address(&mut self, instr: u16) -> Result<EffectiveAddress, CpuError> {
        let bases = Bases { p: self.regs.p(), b: self.regs.b(), x: self.regs.x() };
        address::resolve(instr, bases, |addr, apt| self.memory_read(addr, apt))
    }

    // ==================== Flags ====================

    /// Apply the C, O and Q outcome of the adder and return the sum.
    fn apply_add(&mut self, r: AddOutcome) -> u16 {
        self.regs.set_flag(sts::C, r.carry);
        if r.overflow {
            self.regs.set_flag(sts::O | sts::Q, true);
        } else {
            self.regs.set_flag(sts::Q, false);
        }
        r.value
    }

    fn add_with_flags(&mut self, a: u16, b: u16, carry_in: bool) -> u16 {
        let r = int::add(a, b, carry_in);
        self.apply_add(r)
    }

    // ==================== Execution ====================

    fn prefetch(&mut self) -> Result<(), CpuError> {
        let p = self.regs.p();
        self.pfb = Some(self.memory_fetch(p, false)?);
        Ok(())
    }

    /// Execute one instruction, prefetch the next and take a pending level
    /// switch. Does not consult the run mode.
    pub fn step(&mut self) -> Step {
        let ir = match self.pfb.take() {
            Some(w) => w,
            None => {
                let p = self.regs.p();
                self.memory_fetch(p, false)?
            }
        };
        if log_enabled!(Level::Trace) {
            trace!(
                "L{:02} {:06o}: {:06o}  {}",
                self.regs.level(),
                self.regs.p(),
                ir,
                disasm::format_with(ir, &self.table)
            );
        }
        let stop = self.execute(ir)?;
        self.cycles += 1;
        self.prefetch()?;
        self.switch_level_if_pending()?;
        Ok(stop)
    }

    fn switch_level_if_pending(&mut self) -> Result<(), CpuError> {
        if !self.regs.flag(sts::IONI) {
            return Ok(());
        }
        let pk = self.irq.pk()? as usize;
        let level = self.regs.level();
        if pk != level {
            self.sys.pvl = level as u16;
            self.regs.set_level(pk);
            trace!("level switch {} -> {}", level, pk);
            self.prefetch()?;
        }
        Ok(())
    }

    /// Run until the run mode, a breakpoint, the instruction counter or an
    /// instruction stops the CPU. Any error also stops it; a poisoned lock
    /// shuts it down.
    pub fn run(&mut self) -> Result<StopReason, CpuError> {
        loop {
            match self.control.gate(self.regs.p()) {
                Gate::Go => {}
                Gate::Breakpoint(p) => {
                    debug!("breakpoint at {:06o}", p);
                    return Ok(StopReason::Breakpoint(p));
                }
                Gate::InstructionLimit => return Ok(StopReason::InstructionLimit),
                Gate::Halted => return Ok(StopReason::External),
            }
            match self.step() {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    self.control.stop();
                    return Ok(reason);
                }
                Err(e) => {
                    if let CpuError::Poisoned(what) = e {
                        error!("{} lock poisoned, shutting down", what);
                        self.control.shutdown();
                    } else {
                        self.control.stop();
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Run at most `limit` instructions.
    pub fn run_limited(&mut self, limit: u64) -> Result<StopReason, CpuError> {
        self.control.semi_run(None, Some(limit));
        self.run()
    }

    fn execute(&mut self, ir: u16) -> Step {
        let handler = self.table.lookup(decode(ir, self.table.map()));
        use Handler::*;
        match handler {
            Stz | Sta | Stt | Stx | Std | Stf => self.store(handler, ir),
            Lda | Ldt | Ldx | Ldd | Ldf => self.load(handler, ir),
            Min | Add | Sub | And | Ora | Mpy => self.memory_arithmetic(handler, ir),
            Fad | Fsb | Fmu | Fdv => self.float_arithmetic(handler, ir),
            Jmp | Jpl => self.jump_to(handler, ir),
            Jap | Jan | Jaz | Jaf | Jpc | Jnc | Jxz | Jxn => self.conditional_jump(handler, ir),
            Skp => self.skip(ir),

            Rop => self.register_operation(ir),
            Bop => self.bit_operation(ir),
            Shift => self.shift(ir),
            Rmpy => self.register_multiply(ir),
            Rdiv => self.register_divide(ir),
            Nlz => self.normalize(ir),
            Dnz => self.denormalize(ir),
            Sab | Saa | Sat | Sax | Aab | Aaa | Aat | Aax => self.argument(handler, ir),

            Tra => self.transfer_to_a(ir),
            Trr => self.transfer_from_a(ir),
            Mcl => self.masked_clear(ir),
            Mst => self.masked_set(ir),
            Opcom | Iof | Ion | Pof | Piof | Sex | Rex | Pon | Pion => self.system_mode(handler),
            Iox => self.iox(ir & 0x07ff),
            Ioxt => {
                let device = self.regs.t();
                self.iox(device)
            }
            Exam => self.examine(),
            Depo => self.deposit(),
            Wait => self.wait(),
            Mon => self.monitor_call(ir),
            Srb => self.store_register_block(ir),
            Lrb => self.load_register_block(ir),
            Irw => self.inter_register_write(ir),
            Irr => self.inter_register_read(ir),
            Exr => self.execute_register(ir),
            Ident => self.ident(ir),

            Lbyt => self.load_byte(),
            Sbyt => self.store_byte(),
            Mix3 => self.mix3(),
            Ldatx | Ldxtx | Lddtx | Ldbtx | Statx | Stztx | Stdtx => self.tx_access(handler, ir),
            Bfill => self.byte_fill(),
            Movb => self.move_bytes(),
            Movbf => self.move_bytes_forward(),
            Init => self.stack_init(),
            Entr => self.stack_enter(),
            Leave => self.stack_leave(false),
            Eleav => self.stack_leave(true),
            Clept => self.clear_page_tables(),
            Geco => {
                self.regs.advance_p(1);
                Ok(None)
            }

            Unimplemented => self.unimplemented(ir),
            Illegal => self.illegal(ir),
        }
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("model", &self.model)
            .field("level", &self.regs.level())
            .field("p", &format_args!("{:06o}", self.regs.p()))
            .field("cycles", &self.cycles)
            .field("memory", &self.mmu.memory)
            .finish()
    }
}

// ==================== CPU thread ====================

/// CPU thread body: run while the mode allows it, park while stopped,
/// return on shutdown. Only a poisoned lock ends the thread with an error.
pub fn cpu_thread(cpu: &mut Cpu) -> Result<(), CpuError> {
    let control = cpu.control();
    loop {
        if control.mode().is_running() {
            match cpu.run() {
                Ok(reason) => debug!("cpu stopped: {}", reason),
                Err(e @ CpuError::Poisoned(_)) => return Err(e),
                Err(e) => warn!("cpu halted: {}", e),
            }
        }
        if control.wait_for_run() == RunMode::Shutdown {
            debug!("cpu thread shutting down after {} instructions", cpu.cycles());
            return Ok(());
        }
    }
}

/// Move the CPU to its own thread. The handle returns the CPU on shutdown.
pub fn spawn_cpu_thread(mut cpu: Cpu) -> thread::JoinHandle<Result<Cpu, CpuError>> {
    thread::spawn(move || cpu_thread(&mut cpu).map(|_| cpu))
}


#[cfg(test)]
mod tests {
    use super::testing::{machine, steps};
    use super::*;
    use crate::cpu::interrupt::iid;
    use crate::cpu::memory::pte;
    use crate::cpu::registers::{A, P, STS};

    #[test]
    fn test_reset_state() {
        let cpu = machine(&[]);
        assert_eq!(cpu.regs.sts() & sts::O, sts::O);
        assert!(cpu.regs.globals_in_sync());
        assert!(cpu.regs.flag(sts::N100));
        assert_eq!(cpu.regs.get_at(3, STS), sts::N100);
        assert_eq!(cpu.sys.csr, 1 << 2);
        assert_eq!(cpu.control().mode(), RunMode::Run);
    }

    #[test]
    fn test_sequential_program() {
        // SAA 5; AAA 3; STA *2; JMP *0; (data)
        let mut cpu = machine(&[0o170405, 0o172403, 0o004002, 0o124000, 0]);
        steps(&mut cpu, 3);
        assert_eq!(cpu.regs.a(), 8);
        assert_eq!(cpu.physical_read(4), 8);
        assert_eq!(cpu.regs.p(), 3);
        assert_eq!(cpu.cycles(), 3);
    }

    #[test]
    fn test_run_limited_stops() {
        // JMP *0 loops forever
        let mut cpu = machine(&[0o124000]);
        assert_eq!(cpu.run_limited(10).unwrap(), StopReason::InstructionLimit);
        assert_eq!(cpu.cycles(), 10);
        assert_eq!(cpu.control().mode(), RunMode::Stop);
    }

    #[test]
    fn test_breakpoint_stops_before_executing() {
        // SAA 1; SAA 2; SAA 3
        let mut cpu = machine(&[0o170401, 0o170402, 0o170403]);
        cpu.control().semi_run(Some(2), None);
        assert_eq!(cpu.run().unwrap(), StopReason::Breakpoint(2));
        assert_eq!(cpu.regs.a(), 2);
        assert_eq!(cpu.regs.p(), 2);
    }

    #[test]
    fn test_wait_with_interrupts_off_stops() {
        let mut cpu = machine(&[0o151000]);
        assert_eq!(cpu.run().unwrap(), StopReason::Wait);
        assert_eq!(cpu.regs.p(), 1);
        assert_eq!(cpu.control().mode(), RunMode::Stop);
    }

    #[test]
    fn test_unimplemented_stops_cpu() {
        // ADDD
        let mut cpu = machine(&[0o140120]);
        assert_eq!(cpu.run().unwrap(), StopReason::Unimplemented { opcode: 0o140120, p: 0 });
        assert_eq!(cpu.regs.p(), 1);
    }

    #[test]
    fn test_illegal_raises_level_14() {
        let mut cpu = machine(&[0o140200]);
        cpu.interrupts().update(|s| s.iie = iid::ILLEGAL_INSTRUCTION).unwrap();
        steps(&mut cpu, 1);
        let s = cpu.interrupts().snapshot().unwrap();
        assert_eq!(s.iid, iid::ILLEGAL_INSTRUCTION);
        assert_ne!(s.pid & (1 << 14), 0);
        assert_eq!(cpu.regs.p(), 1);
    }

    #[test]
    fn test_level_switch_after_instruction() {
        // level 0: ION; level 5 starts at 0o100 with SAA 7
        let mut program = vec![0o150402, 0o170401];
        program.resize(0o100, 0);
        program.push(0o170407);
        let mut cpu = machine(&program);
        cpu.regs.set_at(5, P, 0o100);
        cpu.interrupts()
            .update(|s| {
                s.pie = 1 << 5;
                s.pid = 1 << 5;
            })
            .unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.level(), 5);
        assert_eq!(cpu.sys.pvl, 0);
        assert!(cpu.regs.globals_in_sync());
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 7);
        assert_eq!(cpu.regs.get_at(0, A), 0);
        assert_eq!(cpu.regs.get_at(0, P), 1);
    }

    #[test]
    fn test_b_relative_round_trip_flat_and_paged() {
        // STA ,B 3; LDA ,B 3 after clearing A via SAA 0
        let program = [0o004403, 0o170400, 0o044403];
        let mut cpu = machine(&program);
        cpu.regs.set_b(0o2000);
        cpu.regs.set_a(0o12345);
        steps(&mut cpu, 3);
        assert_eq!(cpu.regs.a(), 0o12345);
        assert_eq!(cpu.physical_read(0o2003), 0o12345);

        // same with paging on: page 0 and page 1 map to physical 0 and 7
        let mut cpu = machine(&program);
        cpu.mmu.tables.set_entry(0, 0, pte::PERMITS);
        cpu.mmu.tables.set_entry(0, 1, pte::RPM | pte::WPM | 7);
        cpu.regs.set_global(sts::PONI, true);
        cpu.regs.set_b(0o2000);
        cpu.regs.set_a(0o12345);
        steps(&mut cpu, 3);
        assert_eq!(cpu.regs.a(), 0o12345);
        assert_eq!(cpu.mmu.memory.read(7 * 1024 + 3), 0o12345);
        let entry = cpu.mmu.tables.entry(0, 1);
        assert_eq!(entry & (pte::PGU | pte::WIP), pte::PGU | pte::WIP);
    }

    #[test]
    fn test_page_fault_reads_zero_and_latches_pgs() {
        // LDA ,X 0 into an unmapped page
        let mut cpu = machine(&[0o046000]);
        cpu.mmu.tables.set_entry(0, 0, pte::PERMITS);
        cpu.regs.set_global(sts::PONI, true);
        cpu.regs.set_x(0o4000);
        cpu.regs.set_a(0o777);
        cpu.interrupts().update(|s| s.iie = iid::PAGE_FAULT).unwrap();
        steps(&mut cpu, 1);
        assert_eq!(cpu.regs.a(), 0);
        let s = cpu.interrupts().snapshot().unwrap();
        assert_eq!(s.iid, iid::PAGE_FAULT);
        assert_eq!(s.pgs, (1 << 14) | 2);
        assert_eq!(cpu.regs.x(), 0o4000);
    }

    #[test]
    fn test_set_model_rebuilds_table() {
        let mut cpu = machine(&[0o140133]);
        cpu.set_model(CpuModel::Nd110);
        assert!(matches!(cpu.run().unwrap(), StopReason::Unimplemented { .. }));
    }

    #[test]
    fn test_cpu_thread_start_stop_shutdown() {
        let cpu = machine(&[0o124000]);
        let control = cpu.control();
        control.stop();
        let handle = spawn_cpu_thread(cpu);
        control.start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        control.stop();
        control.shutdown();
        let cpu = handle.join().unwrap().unwrap();
        assert_eq!(cpu.regs.p(), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let cpu = machine(&[]);
        let snap = cpu.snapshot().unwrap();
        let json = serde_json::to_string(&snap).unwrap();
        let back: CpuSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
