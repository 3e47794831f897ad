//! GPIO character device backend (`/dev/gpiochipN`) using the gpiod library.
use crate::{GpioDriver, GpioError, GpioOutput, GpioResult, PinRegistry};
use log::debug;
use std::fmt::{Debug, Formatter};
use std::path::Path;

/// GpiodDriver is a GPIO driver that uses the gpiod library to request output lines.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    registry: PinRegistry,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        let n = chip.num_lines() as usize;
        Self {
            chip,
            registry: PinRegistry::new(n),
        }
    }

    /// Opens the chip at the given path, e.g. `/dev/gpiochip0`.
    pub fn open(path: &Path) -> GpioResult<Self> {
        Ok(Self::new(gpiod::Chip::new(path)?))
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl GpioDriver for GpiodDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.chip.num_lines() as usize)
    }

    fn export_output(&self, index: usize) -> GpioResult<Box<dyn GpioOutput>> {
        self.registry.claim(index)?;

        let line = self.chip.request_lines(
            gpiod::Options::output([index as u32]).consumer(env!("CARGO_PKG_NAME")),
        );
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                self.registry.release(index);
                return Err(err.into());
            }
        };

        debug!("Requested {}[{}] as output", self.chip.name(), index);

        Ok(Box::new(GpiodOutput {
            chip_name: self.chip.name().to_string(),
            index,
            registry: self.registry.clone(),
            line: Some(line),
        }))
    }
}

struct GpiodOutput {
    chip_name: String,
    index: usize,
    registry: PinRegistry,
    line: Option<gpiod::Lines<gpiod::Output>>,
}

impl Debug for GpiodOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})[{}][output]", self.chip_name, self.index)
    }
}

impl GpioOutput for GpiodOutput {
    fn write(&self, value: bool) -> GpioResult<()> {
        let line = self.line.as_ref().ok_or(GpioError::Unexported)?;
        line.set_values([value])?;
        Ok(())
    }

    fn unexport(&mut self) -> GpioResult<()> {
        // Dropping the line handle returns it to the kernel
        self.line.take().ok_or(GpioError::Unexported)?;
        self.registry.release(self.index);
        debug!("Released {}[{}]", self.chip_name, self.index);
        Ok(())
    }
}

impl Drop for GpiodOutput {
    fn drop(&mut self) {
        if self.line.is_some() {
            _ = self.unexport();
        }
    }
}
