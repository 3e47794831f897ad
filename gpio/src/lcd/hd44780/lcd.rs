use super::driver::{CursorDirection, GpioHD44780Driver, HD44780Driver};
use super::state::{self, DisplayControl, DisplayMode};
use super::{LcdConfig, LcdError, LcdResult, PAGE_SIZE};
use crate::GpioDriver;
use log::{debug, trace, warn};
use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A character LCD, safe to share between threads.
///
/// Every operation takes the same lock for its whole duration, so nibbles of two operations
/// never interleave, and a [Lcd::print] is transmitted as one uninterrupted sequence. The lock
/// is released on every exit path, errors included. Waiters are not queued in order; use
/// [super::notify::LcdWorker] if first-come first-served ordering matters.
///
/// Hardware errors are returned as-is and not retried: the controller's state is unknown after
/// one, and [Lcd::init] is the way to resynchronize it.
pub struct Lcd {
    config: LcdConfig,
    state: Mutex<LcdState>,
}

struct LcdState {
    driver: Box<dyn HD44780Driver>,
    control: DisplayControl,
    mode: DisplayMode,
    closed: bool,
}

impl Lcd {
    /// Exports the pins from `gpio` and creates the display, initializing it unless
    /// [LcdConfig::suppress_auto_init] is set.
    pub fn open(gpio: &dyn GpioDriver, config: LcdConfig) -> LcdResult<Self> {
        let driver = GpioHD44780Driver::export(gpio, &config)?;
        Self::new(Box::new(driver), config)
    }

    /// Creates the display over an existing driver, initializing it unless
    /// [LcdConfig::suppress_auto_init] is set.
    ///
    /// Initialization runs before the value exists, so nothing can race with it.
    pub fn new(driver: Box<dyn HD44780Driver>, config: LcdConfig) -> LcdResult<Self> {
        config.validate()?;

        let mut state = LcdState {
            driver,
            control: DisplayControl::default(),
            mode: DisplayMode::default(),
            closed: false,
        };

        if !config.suppress_auto_init {
            state.init(&config)?;
        }

        Ok(Lcd {
            config,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &LcdConfig {
        &self.config
    }

    /// The last display-control value sent.
    pub fn display_control(&self) -> DisplayControl {
        self.lock().control
    }

    /// The last entry-mode value sent.
    pub fn display_mode(&self) -> DisplayMode {
        self.lock().mode
    }

    fn lock(&self) -> MutexGuard<'_, LcdState> {
        // A panic mid-transmission leaves nothing that init() can't fix
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the bus.
    fn with_state<T>(&self, f: impl FnOnce(&mut LcdState) -> LcdResult<T>) -> LcdResult<T> {
        let mut state = self.lock();
        if state.closed {
            return Err(LcdError::Closed);
        }
        f(&mut state)
    }

    /// Runs the power-on sequence again with the current register values.
    pub fn init(&self) -> LcdResult<()> {
        self.with_state(|state| state.init(&self.config))
    }

    /// Prints `text` at the cursor.
    ///
    /// Characters up to U+00FF are sent as their 8-bit code, so the upper half of the character
    /// ROM (e.g. `'\u{DF}'`, the degree sign on ROM A00) is reachable. Anything above is replaced
    /// by `?`. If the text spans more than two full pages
    /// ([PAGE_SIZE] characters each), the pages that would be overwritten before they could be
    /// seen are skipped: only the last full page and the remainder after it are sent.
    pub fn print(&self, text: &str) -> LcdResult<()> {
        let chars: Vec<char> = text.chars().collect();
        let start = first_visible(chars.len());
        if start > 0 {
            debug!("Skipping {} of {} characters", start, chars.len());
        }

        self.with_state(|state| {
            chars[start..]
                .iter()
                .try_for_each(|&c| state.driver.send_data(char_code(c)))
        })
    }

    /// Prints a single character at the cursor.
    pub fn write_char(&self, c: char) -> LcdResult<()> {
        self.with_state(|state| state.driver.send_data(char_code(c)))
    }

    /// Clears the display and moves the cursor home.
    pub fn clear(&self) -> LcdResult<()> {
        self.with_state(|state| state.driver.clear_display())
    }

    /// Moves the cursor home and undoes any scrolling.
    pub fn home(&self) -> LcdResult<()> {
        self.with_state(|state| state.driver.return_home())
    }

    /// Moves the cursor, both zero-based.
    ///
    /// A row past the last one is clamped to the last one. The column isn't checked, columns
    /// past the visible width land in the off-screen part of the line.
    pub fn set_cursor(&self, col: u8, row: u8) -> LcdResult<()> {
        if row >= self.config.rows {
            warn!("Row {} clamped to {}", row, self.config.rows - 1);
        }
        let address = state::ddram_address(col, row, self.config.rows);
        self.with_state(|state| state.driver.set_ddram_address(address))
    }

    pub fn display(&self) -> LcdResult<()> {
        self.update_control(|control| control.with(DisplayControl::DISPLAY_ON))
    }

    /// Blanks the display. The contents are kept.
    pub fn no_display(&self) -> LcdResult<()> {
        self.update_control(|control| control.without(DisplayControl::DISPLAY_ON))
    }

    pub fn cursor(&self) -> LcdResult<()> {
        self.update_control(|control| control.with(DisplayControl::CURSOR_ON))
    }

    pub fn no_cursor(&self) -> LcdResult<()> {
        self.update_control(|control| control.without(DisplayControl::CURSOR_ON))
    }

    pub fn blink(&self) -> LcdResult<()> {
        self.update_control(|control| control.with(DisplayControl::BLINK_ON))
    }

    pub fn no_blink(&self) -> LcdResult<()> {
        self.update_control(|control| control.without(DisplayControl::BLINK_ON))
    }

    /// Shifts the whole display one position to the left.
    pub fn scroll_display_left(&self) -> LcdResult<()> {
        self.with_state(|state| state.driver.cursor_shift(true, CursorDirection::Left))
    }

    /// Shifts the whole display one position to the right.
    pub fn scroll_display_right(&self) -> LcdResult<()> {
        self.with_state(|state| state.driver.cursor_shift(true, CursorDirection::Right))
    }

    pub fn left_to_right(&self) -> LcdResult<()> {
        self.update_mode(|mode| mode.with(DisplayMode::LEFT_TO_RIGHT))
    }

    pub fn right_to_left(&self) -> LcdResult<()> {
        self.update_mode(|mode| mode.without(DisplayMode::LEFT_TO_RIGHT))
    }

    /// Shifts the display on every write, so text appears to flow past a fixed cursor.
    pub fn autoscroll(&self) -> LcdResult<()> {
        self.update_mode(|mode| mode.with(DisplayMode::AUTOSCROLL))
    }

    pub fn no_autoscroll(&self) -> LcdResult<()> {
        self.update_mode(|mode| mode.without(DisplayMode::AUTOSCROLL))
    }

    /// Releases the pins. Every later operation, `close` included, fails with
    /// [LcdError::Closed].
    pub fn close(&self) -> LcdResult<()> {
        self.with_state(|state| {
            state.closed = true;
            state.driver.close()
        })
    }

    fn update_control(&self, f: impl FnOnce(DisplayControl) -> DisplayControl) -> LcdResult<()> {
        self.with_state(|state| {
            state.control = f(state.control);
            trace!("Display control: {:08b}", state.control.bits());
            state.driver.send_command(state.control.bits())
        })
    }

    fn update_mode(&self, f: impl FnOnce(DisplayMode) -> DisplayMode) -> LcdResult<()> {
        self.with_state(|state| {
            state.mode = f(state.mode);
            trace!("Display mode: {:08b}", state.mode.bits());
            state.driver.send_command(state.mode.bits())
        })
    }
}

impl LcdState {
    fn init(&mut self, config: &LcdConfig) -> LcdResult<()> {
        self.driver.init(
            config.rows,
            config.effective_large_font(),
            self.control,
            self.mode,
        )
    }
}

impl Debug for Lcd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lcd({}x{})", self.config.columns, self.config.rows)
    }
}

/// Index of the first character worth sending: with `n` full pages and `n > 1`, everything
/// before the last full page would be overwritten unseen.
fn first_visible(len: usize) -> usize {
    let pages = len / PAGE_SIZE;
    if pages > 1 {
        (pages - 1) * PAGE_SIZE
    } else {
        0
    }
}

fn char_code(c: char) -> u8 {
    u8::try_from(c).unwrap_or_else(|_| {
        warn!("Character outside the 8-bit range: {}", c);
        b'?'
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEvent, MockGpioDriver};
    use std::time::Duration;

    const RS: usize = 0;
    const E: usize = 1;
    const DATA: [usize; 4] = [2, 3, 4, 5];

    fn config() -> LcdConfig {
        LcdConfig::new(RS, E, DATA).with_columns(20).with_rows(4)
    }

    fn open(config: LcdConfig) -> (MockGpioDriver, Lcd) {
        let gpio = MockGpioDriver::new(8);
        let lcd = Lcd::open(&gpio, config).unwrap();
        gpio.clear_events();
        (gpio, lcd)
    }

    /// Decodes recorded writes back into `(is_data, byte)` pairs.
    fn bytes(gpio: &MockGpioDriver) -> Vec<(bool, u8)> {
        let mut rs = false;
        let mut data = [false; 4];
        let mut high: Option<u8> = None;
        let mut bytes = Vec::new();
        for (pin, value) in gpio.writes() {
            match pin {
                RS => rs = value,
                E if !value => {
                    let nibble = data
                        .iter()
                        .enumerate()
                        .fold(0, |acc, (i, &bit)| acc | ((bit as u8) << i));
                    match high.take() {
                        Some(high) => bytes.push((rs, (high << 4) | nibble)),
                        None => high = Some(nibble),
                    }
                }
                E => {}
                pin => data[DATA.iter().position(|&p| p == pin).unwrap()] = value,
            }
        }
        bytes
    }

    fn printed(gpio: &MockGpioDriver) -> String {
        bytes(gpio)
            .into_iter()
            .filter(|&(is_data, _)| is_data)
            .map(|(_, byte)| byte as char)
            .collect()
    }

    const EXPORTS: [MockEvent; 6] = [
        MockEvent::Export(RS),
        MockEvent::Export(E),
        MockEvent::Export(2),
        MockEvent::Export(3),
        MockEvent::Export(4),
        MockEvent::Export(5),
    ];

    #[test]
    fn open_initializes() {
        let gpio = MockGpioDriver::new(8);
        let _lcd = Lcd::open(&gpio, config()).unwrap();
        assert_eq!(&gpio.events()[..6], &EXPORTS);
        // The four wake-up nibbles 3, 3, 3, 2 decode as the bytes 0x33 and 0x32
        assert_eq!(
            bytes(&gpio),
            vec![
                (false, 0x33),
                (false, 0x32),
                (false, 0x28),
                (false, 0x10),
                (false, 0x0c),
                (false, 0x06),
                (false, 0x01),
            ]
        );
    }

    #[test]
    fn suppressed_init_sends_nothing() {
        let gpio = MockGpioDriver::new(8);
        let _lcd = Lcd::open(&gpio, config().with_suppress_auto_init(true)).unwrap();
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn invalid_config_fails_construction() {
        let gpio = MockGpioDriver::new(8);
        let result = Lcd::open(&gpio, config().with_rows(7));
        assert!(matches!(result, Err(LcdError::Config(_))));
        assert!(gpio.events().is_empty());
    }

    #[test]
    fn empty_print_sends_nothing() {
        let (gpio, lcd) = open(config());
        lcd.print("").unwrap();
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn print_sends_characters_in_order() {
        let (gpio, lcd) = open(config());
        lcd.print("Hello").unwrap();
        assert_eq!(printed(&gpio), "Hello");
    }

    #[test]
    fn print_replaces_wide_characters() {
        let (gpio, lcd) = open(config());
        lcd.print("zł").unwrap();
        assert_eq!(printed(&gpio), "z?");
    }

    #[test]
    fn print_sends_8_bit_codes() {
        let (gpio, lcd) = open(config());
        lcd.print("25\u{DF}C").unwrap();
        assert_eq!(
            bytes(&gpio),
            vec![(true, b'2'), (true, b'5'), (true, 0xdf), (true, b'C')]
        );
    }

    #[test]
    fn print_skips_overwritten_pages() {
        let (gpio, lcd) = open(config());
        let text: String = (0..802).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        lcd.print(&text).unwrap();
        assert_eq!(printed(&gpio), &text[720..]);
    }

    #[test]
    fn first_visible_index() {
        assert_eq!(first_visible(0), 0);
        assert_eq!(first_visible(80), 0);
        assert_eq!(first_visible(159), 0);
        assert_eq!(first_visible(160), 80);
        assert_eq!(first_visible(802), 720);
    }

    #[test]
    fn set_cursor_clamps_row() {
        let (gpio, lcd) = open(config());
        lcd.set_cursor(3, 5).unwrap();
        assert_eq!(bytes(&gpio), vec![(false, 0x80 | (3 + 0x54))]);
    }

    #[test]
    fn control_register_follows_toggles() {
        let (gpio, lcd) = open(config());
        lcd.display().unwrap();
        lcd.no_display().unwrap();
        lcd.cursor().unwrap();

        let expected = (0x0c | 0x04) & !0x04 | 0x02;
        assert_eq!(lcd.display_control().bits(), expected);
        assert_eq!(bytes(&gpio).last(), Some(&(false, expected)));
    }

    #[test]
    fn mode_register_follows_toggles() {
        let (gpio, lcd) = open(config());
        lcd.right_to_left().unwrap();
        lcd.autoscroll().unwrap();
        lcd.no_autoscroll().unwrap();
        lcd.left_to_right().unwrap();
        assert_eq!(
            bytes(&gpio),
            vec![(false, 0x04), (false, 0x05), (false, 0x04), (false, 0x06)]
        );
        assert_eq!(lcd.display_mode(), DisplayMode::default());
    }

    #[test]
    fn blink_and_scroll_commands() {
        let (gpio, lcd) = open(config());
        lcd.blink().unwrap();
        lcd.no_blink().unwrap();
        lcd.no_cursor().unwrap();
        lcd.scroll_display_left().unwrap();
        lcd.scroll_display_right().unwrap();
        lcd.clear().unwrap();
        lcd.home().unwrap();
        assert_eq!(
            bytes(&gpio),
            vec![
                (false, 0x0d),
                (false, 0x0c),
                (false, 0x0c),
                (false, 0x18),
                (false, 0x1c),
                (false, 0x01),
                (false, 0x02),
            ]
        );
    }

    #[test]
    fn init_keeps_register_state() {
        let (gpio, lcd) = open(config());
        lcd.cursor().unwrap();
        gpio.clear_events();
        lcd.init().unwrap();
        assert!(bytes(&gpio).contains(&(false, 0x0e)));
    }

    #[test]
    fn concurrent_prints_do_not_interleave() {
        let (gpio, lcd) = open(config());
        let a = "A".repeat(40);
        let b = "B".repeat(40);

        std::thread::scope(|scope| {
            scope.spawn(|| lcd.print(&a).unwrap());
            scope.spawn(|| lcd.print(&b).unwrap());
        });

        let text = printed(&gpio);
        assert!(text == format!("{a}{b}") || text == format!("{b}{a}"), "{}", text);
    }

    #[test]
    fn failure_releases_lock() {
        let (gpio, lcd) = open(config());
        gpio.fail_writes(DATA[0]);
        assert!(matches!(lcd.print("x"), Err(LcdError::Gpio(_))));

        gpio.restore_writes(DATA[0]);
        let done = std::thread::scope(|scope| {
            let handle = scope.spawn(|| lcd.print("y"));
            std::thread::sleep(Duration::from_millis(1));
            handle.join().unwrap()
        });
        assert_eq!(done, Ok(()));
    }

    #[test]
    fn close_then_operations_fail() {
        let (gpio, lcd) = open(config());
        lcd.close().unwrap();
        let unexports = gpio
            .events()
            .iter()
            .filter(|event| matches!(event, MockEvent::Unexport(_)))
            .count();
        assert_eq!(unexports, 6);

        assert_eq!(lcd.print("x"), Err(LcdError::Closed));
        assert_eq!(lcd.cursor(), Err(LcdError::Closed));
        assert_eq!(lcd.close(), Err(LcdError::Closed));
        assert_eq!(gpio.writes().len(), 0);
    }
}
