//! HD44780 command set and power-on sequence.
//!
//! [HD44780Driver] is implemented by whatever moves the bits (see [GpioHD44780Driver]); the
//! commands and the initialization sequence are built on top of its low-level primitives.

mod gpio;

use super::state::{DisplayControl, DisplayMode};
use super::timing;
use super::LcdResult;
pub use gpio::*;
use log::debug;
use std::fmt::Debug;

/// Command opcodes. The operand bits live in the low bits of each.
pub mod commands {
    pub const CLEAR_DISPLAY: u8 = 0b00000001;
    pub const RETURN_HOME: u8 = 0b00000010;
    pub const ENTRY_MODE_SET: u8 = 0b00000100;
    pub const DISPLAY_CONTROL: u8 = 0b00001000;
    pub const CURSOR_SHIFT: u8 = 0b00010000;
    pub const FUNCTION_SET: u8 = 0b00100000;
    pub const SET_DDRAM_ADDRESS: u8 = 0b10000000;

    /// Cursor shift: move the display instead of the cursor.
    pub const SHIFT_DISPLAY: u8 = 0b00001000;
    /// Cursor shift: to the right.
    pub const SHIFT_RIGHT: u8 = 0b00000100;

    /// Function set: two display lines.
    pub const TWO_LINES: u8 = 0b00001000;
    /// Function set: 5x10 dot font.
    pub const LARGE_FONT: u8 = 0b00000100;

    /// The wake-up nibble, `0011`, i.e. the upper half of an 8-bit function set.
    pub const WAKE_UP: u8 = 0b0011;
    /// The nibble switching the interface to 4-bit mode, `0010`.
    pub const FOUR_BIT_MODE: u8 = 0b0010;
}

/// Which register a byte is written to, selected by the RS line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegisterSelect {
    /// RS low: instruction register.
    Command,
    /// RS high: data register, i.e. a character at the cursor.
    Data,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    Left,
    Right,
}

pub trait HD44780Driver: Debug + Send {
    // Low-level primitives, implemented by the bus implementation.

    /// Drives RS without transmitting anything.
    fn select_register(&mut self, register: RegisterSelect) -> LcdResult<()>;

    /// Strobes a single nibble onto the data lines.
    ///
    /// # Errors
    /// - [super::LcdError::InvalidNibble] if `nibble` doesn't fit in 4 bits. Nothing is written.
    fn write_nibble(&mut self, nibble: u8) -> LcdResult<()>;

    /// Sends a full byte as two nibbles, high nibble first, then waits for the controller to
    /// execute it.
    fn send(&mut self, value: u8, register: RegisterSelect) -> LcdResult<()>;

    /// Releases all the pins. Nothing may be sent afterwards.
    fn close(&mut self) -> LcdResult<()>;

    /// Sends a command (RS low).
    fn send_command(&mut self, command: u8) -> LcdResult<()> {
        self.send(command, RegisterSelect::Command)
    }

    /// Writes a character code at the cursor (RS high).
    fn send_data(&mut self, data: u8) -> LcdResult<()> {
        self.send(data, RegisterSelect::Data)
    }

    /// Clears the display and sets the cursor to the home position.
    fn clear_display(&mut self) -> LcdResult<()> {
        self.send_command(commands::CLEAR_DISPLAY)?;
        timing::sleep(timing::CLEAR_DELAY);
        Ok(())
    }

    /// Sets the cursor to the home position and undoes any display shift.
    fn return_home(&mut self) -> LcdResult<()> {
        self.send_command(commands::RETURN_HOME)?;
        timing::sleep(timing::CLEAR_DELAY);
        Ok(())
    }

    /// Sends the function set for a 4-bit interface.
    fn function_set(&mut self, two_lines: bool, large_font: bool) -> LcdResult<()> {
        let mut command = commands::FUNCTION_SET;
        if two_lines {
            command |= commands::TWO_LINES;
        }
        if large_font {
            command |= commands::LARGE_FONT;
        }
        self.send_command(command)
    }

    /// Moves the cursor or shifts the display by one position.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> LcdResult<()> {
        let mut command = commands::CURSOR_SHIFT;
        if display_shift {
            command |= commands::SHIFT_DISPLAY;
        }
        if direction == CursorDirection::Right {
            command |= commands::SHIFT_RIGHT;
        }
        self.send_command(command)
    }

    /// Sets the DDRAM address. The address isn't checked.
    fn set_ddram_address(&mut self, address: u8) -> LcdResult<()> {
        self.send_command(commands::SET_DDRAM_ADDRESS | address)
    }

    /// Runs the power-on sequence: resynchronizes the interface from any state into 4-bit mode,
    /// then loads the given registers and clears the display.
    ///
    /// `large_font` is only sent for single-row displays, the controller ignores it otherwise.
    fn init(
        &mut self,
        rows: u8,
        large_font: bool,
        control: DisplayControl,
        mode: DisplayMode,
    ) -> LcdResult<()> {
        debug!("Initializing HD44780, {} row(s), large font: {}", rows, large_font);

        self.select_register(RegisterSelect::Command)?;
        timing::wait(timing::POWER_ON_DELAY);

        // Three wake-ups bring the controller into 8-bit mode whatever state it was in
        self.write_nibble(commands::WAKE_UP)?;
        timing::wait(timing::WAKE_UP_FIRST_DELAY);
        self.write_nibble(commands::WAKE_UP)?;
        timing::wait(timing::WAKE_UP_DELAY);
        self.write_nibble(commands::WAKE_UP)?;
        timing::wait(timing::WAKE_UP_DELAY);
        self.write_nibble(commands::FOUR_BIT_MODE)?;
        timing::wait(timing::COMMAND_DELAY);

        self.function_set(rows > 1, rows == 1 && large_font)?;
        self.send_command(commands::CURSOR_SHIFT)?;
        self.send_command(control.bits())?;
        self.send_command(mode.bits())?;
        self.clear_display()?;

        debug!("HD44780 initialized");
        Ok(())
    }
}
