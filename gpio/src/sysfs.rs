//! Legacy sysfs GPIO backend (`/sys/class/gpio`).
//!
//! Pins are exported by writing their number to `export`, configured through `gpioN/direction`
//! and driven through `gpioN/value`. Unexporting writes the number to `unexport`.
use crate::{GpioDriver, GpioError, GpioOutput, GpioResult, PinRegistry};
use log::debug;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

pub struct SysfsGpioDriver {
    base_path: PathBuf,
    registry: PinRegistry,
}

impl SysfsGpioDriver {
    pub const DEFAULT_BASE_PATH: &'static str = "/sys/class/gpio";

    /// Creates a driver over the default `/sys/class/gpio` tree.
    pub fn new() -> GpioResult<Self> {
        Self::with_base_path(Self::DEFAULT_BASE_PATH)
    }

    /// Creates a driver over a custom sysfs GPIO tree.
    pub fn with_base_path(base_path: impl AsRef<Path>) -> GpioResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.join("export").exists() {
            return Err(GpioError::InvalidArgument);
        }
        let count = Self::count_lines(&base_path)?;
        Ok(SysfsGpioDriver {
            base_path,
            registry: PinRegistry::new(count),
        })
    }

    /// Sums up the lines of every `gpiochipN` entry, as `base + ngpio` of the highest chip.
    fn count_lines(base_path: &Path) -> GpioResult<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(base_path)? {
            let path = entry?.path();
            let is_chip = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("gpiochip"));
            if !is_chip {
                continue;
            }
            let base = read_number(&path.join("base"))?;
            let ngpio = read_number(&path.join("ngpio"))?;
            count = count.max(base + ngpio);
        }
        Ok(count)
    }
}

fn read_number(path: &Path) -> GpioResult<usize> {
    let content = std::fs::read_to_string(path)?;
    content
        .trim()
        .parse()
        .map_err(|_| GpioError::Other(format!("parsing {} failed", path.display())))
}

impl Debug for SysfsGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SysfsGpioDriver({:?})", self.base_path)
    }
}

impl GpioDriver for SysfsGpioDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.registry.len())
    }

    fn export_output(&self, index: usize) -> GpioResult<Box<dyn GpioOutput>> {
        self.registry.claim(index)?;

        let pin_path = self.base_path.join(format!("gpio{}", index));
        let exported = (|| -> GpioResult<()> {
            // Might have been left exported by a previous run
            if !pin_path.exists() {
                std::fs::write(self.base_path.join("export"), index.to_string())?;
            }
            if !pin_path.exists() {
                return Err(GpioError::Other(format!("exporting GPIO {} failed", index)));
            }
            std::fs::write(pin_path.join("direction"), "out")?;
            Ok(())
        })();

        if let Err(err) = exported {
            self.registry.release(index);
            return Err(err);
        }

        debug!("Exported sysfs GPIO {} as output", index);

        Ok(Box::new(SysfsOutput {
            base_path: self.base_path.clone(),
            pin_path,
            index,
            registry: self.registry.clone(),
            exported: true,
        }))
    }
}

struct SysfsOutput {
    base_path: PathBuf,
    pin_path: PathBuf,
    index: usize,
    registry: PinRegistry,
    exported: bool,
}

impl Debug for SysfsOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SysfsOutput({:?})[output]", self.pin_path)
    }
}

impl GpioOutput for SysfsOutput {
    fn write(&self, value: bool) -> GpioResult<()> {
        if !self.exported {
            return Err(GpioError::Unexported);
        }
        std::fs::write(self.pin_path.join("value"), if value { "1" } else { "0" })?;
        Ok(())
    }

    fn unexport(&mut self) -> GpioResult<()> {
        if !self.exported {
            return Err(GpioError::Unexported);
        }
        self.exported = false;
        self.registry.release(self.index);
        std::fs::write(self.base_path.join("unexport"), self.index.to_string())?;
        debug!("Unexported sysfs GPIO {}", self.index);
        Ok(())
    }
}

impl Drop for SysfsOutput {
    fn drop(&mut self) {
        if self.exported {
            _ = self.unexport();
        }
    }
}
