use crate::lcd::hd44780::driver::{HD44780Driver, RegisterSelect};
use crate::lcd::hd44780::{timing, LcdConfig, LcdError, LcdResult};
use crate::{GpioDriver, GpioError, GpioOutput};
use log::{debug, trace};

/// HD44780 driver over six GPIO outputs, 4-bit and write-only (R/W tied to ground).
///
/// Each nibble is framed as: E high, D4..D7 written, E low, then one enable cycle time.
/// E only drops after every data write has returned, so the lines are stable on the falling
/// edge the controller latches on.
#[derive(Debug)]
pub struct GpioHD44780Driver {
    pin_rs: Box<dyn GpioOutput>,
    pin_e: Box<dyn GpioOutput>,
    data_bus: [Box<dyn GpioOutput>; 4],
}

impl GpioHD44780Driver {
    /// Creates a driver from already exported pins. `data_bus` is D4..D7, in bit order.
    pub fn new(
        pin_rs: Box<dyn GpioOutput>,
        pin_e: Box<dyn GpioOutput>,
        data_bus: [Box<dyn GpioOutput>; 4],
    ) -> Self {
        GpioHD44780Driver {
            pin_rs,
            pin_e,
            data_bus,
        }
    }

    /// Exports the pins named by `config` from `gpio`.
    ///
    /// If any pin can't be exported, the ones exported so far are released again.
    pub fn export(gpio: &dyn GpioDriver, config: &LcdConfig) -> LcdResult<Self> {
        config.validate()?;

        let export = |index: usize| {
            gpio.export_output(index).map_err(|err| match err {
                GpioError::InvalidArgument | GpioError::AlreadyInUse => {
                    LcdError::Config(format!("pin {} can't be exported: {}", index, err))
                }
                err => LcdError::Gpio(err),
            })
        };

        let pin_rs = export(config.register_select_pin)?;
        let pin_e = export(config.enable_pin)?;
        let [d4, d5, d6, d7] = config.data_pins;
        let data_bus = [export(d4)?, export(d5)?, export(d6)?, export(d7)?];

        debug!(
            "Exported LCD pins from {:?}: RS {}, E {}, data {:?}",
            gpio, config.register_select_pin, config.enable_pin, config.data_pins
        );

        Ok(Self::new(pin_rs, pin_e, data_bus))
    }
}

impl HD44780Driver for GpioHD44780Driver {
    fn select_register(&mut self, register: RegisterSelect) -> LcdResult<()> {
        self.pin_rs.write(register == RegisterSelect::Data)?;
        Ok(())
    }

    fn write_nibble(&mut self, nibble: u8) -> LcdResult<()> {
        if nibble > 0b1111 {
            return Err(LcdError::InvalidNibble(nibble));
        }

        trace!("Writing nibble: {:04b}", nibble);

        self.pin_e.write(true)?;
        for (i, pin) in self.data_bus.iter().enumerate() {
            pin.write(nibble & (1 << i) != 0)?;
        }
        self.pin_e.write(false)?;
        timing::busy_wait(timing::ENABLE_CYCLE_DELAY);

        Ok(())
    }

    fn send(&mut self, value: u8, register: RegisterSelect) -> LcdResult<()> {
        trace!("Sending data: {:08b}, register: {:?}", value, register);

        self.select_register(register)?;
        self.write_nibble(value >> 4)?;
        self.write_nibble(value & 0x0F)?;

        timing::busy_wait(match register {
            RegisterSelect::Command => timing::COMMAND_DELAY,
            RegisterSelect::Data => timing::DATA_DELAY,
        });

        Ok(())
    }

    fn close(&mut self) -> LcdResult<()> {
        // Release every pin even if one of them fails, then report the first failure
        let mut result = Ok(());
        let pins = [&mut self.pin_rs, &mut self.pin_e]
            .into_iter()
            .chain(self.data_bus.iter_mut());
        for pin in pins {
            if let Err(err) = pin.unexport() {
                if result.is_ok() {
                    result = Err(err.into());
                }
            }
        }
        debug!("LCD pins released");
        result
    }
}
