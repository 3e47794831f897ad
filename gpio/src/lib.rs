//! GPIO output backends and the HD44780 character LCD driver built on top of them.
//!
//! The [GpioDriver] trait hands out exported output pins, and [lcd::hd44780] turns six of them
//! (register-select, enable and four data lines) into a serialized, 4-bit LCD driver.

pub mod gpiod;
pub mod lcd;
pub mod mock;
pub mod sysfs;

use bitvec::vec::BitVec;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("pin has been unexported")]
    Unexported,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("error: {0}")]
    Other(String),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO pins available.
    fn count(&self) -> GpioResult<usize>;

    /// Exports the GPIO pin at the given index and configures it as an output.
    ///
    /// The pin stays reserved until [GpioOutput::unexport] is called or the returned value is
    /// dropped.
    fn export_output(&self, index: usize) -> GpioResult<Box<dyn GpioOutput>>;
}

pub trait GpioOutput: Debug + Send {
    /// Writes the state of the GPIO pin.
    fn write(&self, value: bool) -> GpioResult<()>;

    /// Releases the pin back to the system. Writes after this fail with [GpioError::Unexported].
    fn unexport(&mut self) -> GpioResult<()>;
}

/// Bookkeeping of the pins a driver has handed out, shared between the driver and its pins.
#[derive(Debug, Clone)]
pub(crate) struct PinRegistry {
    used_pins: Arc<BitVec<AtomicU8>>,
}

impl PinRegistry {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            used_pins: Arc::new(BitVec::repeat(false, count)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.used_pins.len()
    }

    pub(crate) fn claim(&self, index: usize) -> GpioResult<()> {
        if index >= self.used_pins.len() {
            return Err(GpioError::InvalidArgument);
        }

        if self.used_pins[index] {
            return Err(GpioError::AlreadyInUse);
        }

        self.used_pins.set_aliased(index, true);
        Ok(())
    }

    pub(crate) fn release(&self, index: usize) {
        if index < self.used_pins.len() {
            self.used_pins.set_aliased(index, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_double_claim() {
        let registry = PinRegistry::new(4);
        assert_eq!(registry.claim(2), Ok(()));
        assert_eq!(registry.claim(2), Err(GpioError::AlreadyInUse));
        registry.release(2);
        assert_eq!(registry.claim(2), Ok(()));
    }

    #[test]
    fn registry_rejects_out_of_range() {
        let registry = PinRegistry::new(4);
        assert_eq!(registry.claim(4), Err(GpioError::InvalidArgument));
    }
}
