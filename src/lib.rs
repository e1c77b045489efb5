//! # ND100 Emulator
//!
//! A CPU core emulator for the Norsk Data ND100 and ND110 16-bit
//! minicomputers.
//!
//! The core runs the instruction set with paging, ring protection and the
//! 16-level interrupt system. Devices plug in through [`cpu::IoBus`];
//! everything outside the CPU (consoles, disks, floppies) belongs to the
//! caller.

pub mod arith;
pub mod config;
pub mod cpu;
pub mod disasm;
pub mod loader;

// Re-export commonly used types
pub use config::{ConfigError, MachineConfig, Overrides};
pub use cpu::{Cpu, CpuError, CpuModel, CpuSnapshot, StopReason};
pub use loader::{load_file, BootKind, BpunImage, LoadError, Loaded};
