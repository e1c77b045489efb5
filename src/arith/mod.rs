//! Arithmetic engines of the ND100 CPU.
//!
//! - [`int`]: 16-bit integer add/subtract with carry and overflow flags,
//!   word and register multiply, register divide, the shift engine and
//!   the register compare used by skip instructions.
//! - [`float`]: the 48-bit ND floating point format.
//!
//! Nothing in here touches the register file. Every operation returns
//! its result together with the flag outcome and the caller applies it.

pub mod int;
pub mod float;

pub use int::{AddOutcome, ShiftKind, ShiftOp, SkipCondition};
pub use float::{FloatStatus, NdFloat};
