//! The IOX seam between the CPU and device controllers.
//!
//! IOX and IOXT hand a device register address and the A register to the
//! bus. Devices that need attention later call back through the
//! [`InterruptLine`] they were given.

use log::trace;
use thiserror::Error;

use super::interrupt::{iid, InterruptError, InterruptLine, INTERNAL_LEVEL};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IoError {
    #[error("device {device:o}: {message}")]
    Device { device: u16, message: String },
    #[error(transparent)]
    Interrupt(#[from] InterruptError),
}

/// Device side of IOX/IOXT.
pub trait IoBus: Send {
    /// Perform one IOX on `device`. Odd addresses are conventionally
    /// writes (A to device), even ones reads (device to A).
    ///
    /// An address nobody answers must raise the level-14 IOX error
    /// through `irq` rather than fail.
    fn io_op(&mut self, device: u16, a: &mut u16, irq: &InterruptLine) -> Result<(), IoError>;
}

/// A bus with no devices. Every access is a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

impl IoBus for NullBus {
    fn io_op(&mut self, device: u16, _a: &mut u16, irq: &InterruptLine) -> Result<(), IoError> {
        trace!("iox {:o}: no device", device);
        irq.update(|s| {
            if s.iie & iid::IOX_ERROR != 0 {
                s.raise(INTERNAL_LEVEL, iid::IOX_ERROR);
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_bus_timeout_needs_iie() {
        let irq = InterruptLine::new();
        let mut bus = NullBus;
        let mut a = 0o123;
        bus.io_op(0o300, &mut a, &irq).unwrap();
        assert_eq!(irq.snapshot().unwrap().iid, 0);
        assert_eq!(a, 0o123);

        irq.update(|s| s.iie = iid::IOX_ERROR).unwrap();
        bus.io_op(0o300, &mut a, &irq).unwrap();
        let s = irq.snapshot().unwrap();
        assert_eq!(s.iid, iid::IOX_ERROR);
        assert_ne!(s.pid & (1 << INTERNAL_LEVEL), 0);
    }
}
