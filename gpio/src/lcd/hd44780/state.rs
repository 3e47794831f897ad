//! Display-control and entry-mode registers.
//!
//! The controller's registers can't be read back, so the driver keeps the last value it sent
//! and always retransmits the whole command byte. Both types hold the complete command byte
//! (command bits included), so [DisplayControl::bits] can be sent as-is.

use super::driver::commands;

/// Display on/off control: `00001DCB`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DisplayControl(u8);

impl DisplayControl {
    /// `D`: the display is on.
    pub const DISPLAY_ON: u8 = 0b00000100;
    /// `C`: the underline cursor is shown.
    pub const CURSOR_ON: u8 = 0b00000010;
    /// `B`: the cursor cell blinks.
    pub const BLINK_ON: u8 = 0b00000001;

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Sets `flag`.
    pub const fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }

    /// Clears `flag`.
    pub const fn without(self, flag: u8) -> Self {
        Self(self.0 & !flag)
    }

    pub const fn is_set(self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}

impl Default for DisplayControl {
    /// Display on, cursor off, blink off.
    fn default() -> Self {
        Self(commands::DISPLAY_CONTROL | Self::DISPLAY_ON)
    }
}

/// Entry mode set: `000001IS`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DisplayMode(u8);

impl DisplayMode {
    /// `I`: the address counter increments, i.e. text runs left to right.
    pub const LEFT_TO_RIGHT: u8 = 0b00000010;
    /// `S`: the display shifts with every write, keeping the cursor in place.
    pub const AUTOSCROLL: u8 = 0b00000001;

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }

    pub const fn without(self, flag: u8) -> Self {
        Self(self.0 & !flag)
    }

    pub const fn is_set(self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}

impl Default for DisplayMode {
    /// Left to right, no autoscroll.
    fn default() -> Self {
        Self(commands::ENTRY_MODE_SET | Self::LEFT_TO_RIGHT)
    }
}

/// DDRAM address of the first column of each row.
pub const ROW_OFFSETS: [u8; 4] = [0x00, 0x40, 0x14, 0x54];

/// Clamps `row` to the last configured row.
pub fn clamp_row(row: u8, rows: u8) -> u8 {
    row.min(rows.saturating_sub(1))
}

/// Computes the DDRAM address of a position.
///
/// The row is clamped to `rows`, the column is not checked at all: columns past the visible
/// width address the off-screen part of the line, which is what horizontal scrolling shows.
pub fn ddram_address(col: u8, row: u8, rows: u8) -> u8 {
    let row = clamp_row(row, rows);
    col.wrapping_add(ROW_OFFSETS[row as usize])
}
