//! In-memory GPIO backend that records every pin operation.
//!
//! Used by the tests and by dry runs without hardware. Writes to a pin can be made to fail to
//! simulate a disconnected or unexported line.
use crate::{GpioDriver, GpioError, GpioOutput, GpioResult, PinRegistry};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single recorded pin operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MockEvent {
    Export(usize),
    Write { pin: usize, value: bool },
    Unexport(usize),
}

#[derive(Debug, Default)]
struct MockLog {
    events: Vec<MockEvent>,
    failing: Vec<usize>,
}

#[derive(Clone)]
pub struct MockGpioDriver {
    registry: PinRegistry,
    log: Arc<Mutex<MockLog>>,
}

impl MockGpioDriver {
    pub fn new(count: usize) -> Self {
        Self {
            registry: PinRegistry::new(count),
            log: Arc::default(),
        }
    }

    fn log(&self) -> MutexGuard<'_, MockLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets a copy of all recorded events, oldest first.
    pub fn events(&self) -> Vec<MockEvent> {
        self.log().events.clone()
    }

    /// Gets only the writes, as `(pin, value)` pairs.
    pub fn writes(&self) -> Vec<(usize, bool)> {
        self.log()
            .events
            .iter()
            .filter_map(|event| match *event {
                MockEvent::Write { pin, value } => Some((pin, value)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.log().events.clear();
    }

    /// Makes every following write to `pin` fail with an I/O error.
    pub fn fail_writes(&self, pin: usize) {
        let mut log = self.log();
        if !log.failing.contains(&pin) {
            log.failing.push(pin);
        }
    }

    pub fn restore_writes(&self, pin: usize) {
        self.log().failing.retain(|&p| p != pin);
    }
}

impl Debug for MockGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockGpioDriver({})", self.registry.len())
    }
}

impl GpioDriver for MockGpioDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.registry.len())
    }

    fn export_output(&self, index: usize) -> GpioResult<Box<dyn GpioOutput>> {
        self.registry.claim(index)?;
        self.log().events.push(MockEvent::Export(index));
        Ok(Box::new(MockOutput {
            driver: self.clone(),
            index,
            exported: true,
        }))
    }
}

struct MockOutput {
    driver: MockGpioDriver,
    index: usize,
    exported: bool,
}

impl Debug for MockOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][output]", self.driver, self.index)
    }
}

impl GpioOutput for MockOutput {
    fn write(&self, value: bool) -> GpioResult<()> {
        if !self.exported {
            return Err(GpioError::Unexported);
        }
        let mut log = self.driver.log();
        if log.failing.contains(&self.index) {
            return Err(GpioError::Io(std::io::ErrorKind::BrokenPipe));
        }
        log.events.push(MockEvent::Write {
            pin: self.index,
            value,
        });
        Ok(())
    }

    fn unexport(&mut self) -> GpioResult<()> {
        if !self.exported {
            return Err(GpioError::Unexported);
        }
        self.exported = false;
        self.driver.registry.release(self.index);
        self.driver.log().events.push(MockEvent::Unexport(self.index));
        Ok(())
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        if self.exported {
            _ = self.unexport();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let gpio = MockGpioDriver::new(8);
        let mut pin = gpio.export_output(3).unwrap();
        pin.write(true).unwrap();
        pin.write(false).unwrap();
        pin.unexport().unwrap();

        assert_eq!(
            gpio.events(),
            vec![
                MockEvent::Export(3),
                MockEvent::Write { pin: 3, value: true },
                MockEvent::Write { pin: 3, value: false },
                MockEvent::Unexport(3),
            ]
        );
    }

    #[test]
    fn failing_pin() {
        let gpio = MockGpioDriver::new(8);
        let pin = gpio.export_output(1).unwrap();
        gpio.fail_writes(1);
        assert!(matches!(pin.write(true), Err(GpioError::Io(_))));
        gpio.restore_writes(1);
        assert_eq!(pin.write(true), Ok(()));
    }

    #[test]
    fn drop_unexports() {
        let gpio = MockGpioDriver::new(8);
        drop(gpio.export_output(2).unwrap());
        assert_eq!(gpio.events().last(), Some(&MockEvent::Unexport(2)));
        assert!(gpio.export_output(2).is_ok());
    }
}
