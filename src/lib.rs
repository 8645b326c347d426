// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Monitoring and control of the Geekworm X728 UPS board on a Raspberry Pi.
//!
//! - [`hub::LineController`] owns the GPIO controller and hands out lines.
//! - [`monitor::DebouncedInputMonitor`] turns AC power-loss edges into clean
//!   level changes.
//! - [`pulse::PulseOutputController`] drives the charge-enable switch and the
//!   timed safe-shutdown pulse.
//! - [`battery::BatteryTelemetryReader`] converts the fuel gauge's cell
//!   voltage into pack voltage and state of charge.
//! - [`daemon::Daemon`] wires them together and publishes the result on D-Bus.

pub mod battery;
pub mod board;
pub mod config;
pub mod daemon;
pub mod dbus;
pub mod error;
pub mod hal;
pub mod hub;
pub mod monitor;
pub mod pulse;
pub mod restore;
pub mod signal;
pub mod status;

pub use error::{Result, UpsError};
