use super::{LcdError, LcdResult};

/// Number of characters one full screen can hold on the largest supported geometry (4x20).
pub const PAGE_SIZE: usize = 80;

/// Wiring and geometry of a display. Immutable once the driver is constructed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LcdConfig {
    /// GPIO number of the RS line.
    pub register_select_pin: usize,
    /// GPIO number of the E line.
    pub enable_pin: usize,
    /// GPIO numbers of D4..D7, in bit order.
    pub data_pins: [usize; 4],
    /// Informational only, writes are never bounded by it.
    pub columns: u8,
    /// 1 to 4.
    pub rows: u8,
    /// 5x10 dot font. Only honored by single-row displays.
    pub large_font: bool,
    /// Skip the power-on sequence during construction.
    pub suppress_auto_init: bool,
}

impl LcdConfig {
    pub fn new(register_select_pin: usize, enable_pin: usize, data_pins: [usize; 4]) -> Self {
        Self {
            register_select_pin,
            enable_pin,
            data_pins,
            columns: 16,
            rows: 1,
            large_font: false,
            suppress_auto_init: false,
        }
    }

    pub fn with_columns(mut self, columns: u8) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_rows(mut self, rows: u8) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_large_font(mut self, large_font: bool) -> Self {
        self.large_font = large_font;
        self
    }

    pub fn with_suppress_auto_init(mut self, suppress_auto_init: bool) -> Self {
        self.suppress_auto_init = suppress_auto_init;
        self
    }

    /// Whether the 5x10 font is actually selected.
    pub fn effective_large_font(&self) -> bool {
        self.large_font && self.rows == 1
    }

    /// All six pins: RS, E, then D4..D7.
    pub fn pins(&self) -> [usize; 6] {
        let [d4, d5, d6, d7] = self.data_pins;
        [self.register_select_pin, self.enable_pin, d4, d5, d6, d7]
    }

    pub fn validate(&self) -> LcdResult<()> {
        if !(1..=4).contains(&self.rows) {
            return Err(LcdError::Config(format!(
                "rows must be between 1 and 4, got {}",
                self.rows
            )));
        }

        let pins = self.pins();
        for (i, pin) in pins.iter().enumerate() {
            if pins[..i].contains(pin) {
                return Err(LcdError::Config(format!("pin {} is assigned twice", pin)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LcdConfig::new(1, 2, [3, 4, 5, 6]);
        assert_eq!(config.rows, 1);
        assert!(!config.large_font);
        assert!(!config.suppress_auto_init);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_rows() {
        for rows in [0, 5] {
            let config = LcdConfig::new(1, 2, [3, 4, 5, 6]).with_rows(rows);
            assert!(matches!(config.validate(), Err(LcdError::Config(_))));
        }
    }

    #[test]
    fn rejects_shared_pins() {
        let config = LcdConfig::new(1, 2, [3, 4, 2, 6]);
        assert!(matches!(config.validate(), Err(LcdError::Config(_))));
    }

    #[test]
    fn large_font_needs_single_row() {
        let config = LcdConfig::new(1, 2, [3, 4, 5, 6]).with_large_font(true);
        assert!(config.effective_large_font());
        assert!(!config.with_rows(2).effective_large_font());
    }
}
