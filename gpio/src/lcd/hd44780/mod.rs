//! HD44780 character LCD driven over a write-only 4-bit parallel bus.
//!
//! The layers, from the pins up:
//! - [driver::GpioHD44780Driver] frames bytes as two enable-strobed nibbles on six GPIO outputs,
//!   and [driver::HD44780Driver] builds the command set and the power-on sequence on top of it.
//! - [state] holds the display-control and entry-mode registers as plain values.
//! - [Lcd] serializes every operation behind one lock, so concurrent callers never interleave
//!   their nibbles, and owns the register state.
//! - [notify::LcdWorker] moves an [Lcd] onto its own thread and reports completions by waiting,
//!   by callback, or as broadcast [notify::LcdEvent]s.
//!
//! There is no busy flag to poll (R/W is tied to ground), so every command is followed by the
//! worst-case execution time of the controller. Waits below one millisecond spin on the calling
//! thread; see [timing].

mod config;
pub mod driver;
mod lcd;
pub mod notify;
pub mod state;
pub mod timing;

use crate::GpioError;
pub use config::*;
pub use lcd::*;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum LcdError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("nibble out of range: {0:#04x}")]
    InvalidNibble(u8),
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),
    #[error("the display has been closed")]
    Closed,
}

pub type LcdResult<T> = Result<T, LcdError>;
