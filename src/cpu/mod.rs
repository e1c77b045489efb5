//! CPU emulation for the Norsk Data ND100 family.
//!
//! This module implements the processor core:
//! - 16 interrupt levels, each with its own eight-register file
//! - paged virtual memory with four page tables and ring protection
//! - the ND100, ND110 and ND110 PCX instruction sets

pub mod address;
pub mod control;
pub mod decode;
pub mod dispatch;
pub mod execute;
pub mod interrupt;
pub mod io;
pub mod memory;
pub mod mmu;
pub mod registers;

pub use control::{RunControl, RunMode, RunState};
pub use decode::{decode, CpuModel, OpcodeMap, UnknownModel};
pub use dispatch::{DispatchTable, Handler};
pub use execute::{cpu_thread, spawn_cpu_thread, Cpu, CpuError, CpuSnapshot, StopReason};
pub use interrupt::{InterruptLine, InterruptState};
pub use io::{IoBus, IoError, NullBus};
pub use memory::{ByteSelect, PageTables, PhysicalMemory};
pub use mmu::Mmu;
pub use registers::{RegisterFile, SystemRegisters};
