// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Backend seam between the line/telemetry logic and the actual hardware.
//!
//! ```text
//!            GpioChip / RegisterBus
//!                     |
//!        +------------+------------+
//!        v                         v
//!   rpi::RpiChip              mock::MockChip
//!   rpi::I2cBus               mock::MockBus
//!   (rppal, /dev/gpiomem,     (in-memory board,
//!    /dev/i2c-N)               tests and --dry-run)
//! ```
//!
//! Backends deal in electrical levels only; polarity is applied by the
//! [`LineController`](crate::hub::LineController).

use thiserror::Error;

use crate::signal::{EdgeEvent, RawLevel};

pub mod mock;
pub mod rpi;

#[derive(Debug, Error)]
pub enum HalError {
    #[error("cannot open GPIO controller: {0}")]
    Open(String),

    /// The line is held by another request (in this or another process).
    #[error("GPIO {0} is in use")]
    LineBusy(u8),

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("I2C error: {0}")]
    Bus(String),
}

/// Callback invoked by the backend for every edge, one at a time, in arrival order.
pub type EdgeSink = Box<dyn FnMut(EdgeEvent) + Send + 'static>;

/// An opened GPIO controller.
///
/// Requesting a line claims it exclusively; dropping the returned line
/// releases the claim.
pub trait GpioChip: Send {
    fn request_input(&self, line: u8) -> Result<Box<dyn InputLine>, HalError>;

    /// Claims `line` as an output already driven to `initial`.
    fn request_output(&self, line: u8, initial: RawLevel) -> Result<Box<dyn OutputLine>, HalError>;
}

pub trait InputLine: Send {
    fn read(&self) -> RawLevel;

    /// Enables edge detection on both edges, delivering every edge to `sink`
    /// until the line is dropped.
    fn watch(&mut self, sink: EdgeSink) -> Result<(), HalError>;
}

pub trait OutputLine: Send {
    fn write(&mut self, level: RawLevel);

    fn level(&self) -> RawLevel;
}

/// Register access on a two-wire bus device.
pub trait RegisterBus: Send {
    /// Reads one SMBus word (low byte first on the wire).
    fn read_word(&mut self, register: u8) -> Result<u16, HalError>;
}
