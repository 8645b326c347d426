// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Fixed wiring and protocol constants of the X728 board.

use std::time::Duration;

use crate::signal::Polarity;

/// AC power-loss detect input (PLD).
pub const PIN_POWER_LOSS: u8 = 6;
/// Charge-enable output.
pub const PIN_CHARGING: u8 = 16;
/// Safe-shutdown request output towards the board's power controller.
pub const PIN_SHUTDOWN: u8 = 26;

pub const POWER_LOSS_POLARITY: Polarity = Polarity::ActiveLow;
pub const CHARGING_POLARITY: Polarity = Polarity::ActiveLow;
pub const SHUTDOWN_POLARITY: Polarity = Polarity::ActiveHigh;

pub const POWER_LOSS_DEBOUNCE: Duration = Duration::from_millis(50);

/// Must match the pulse width the board's power-controller firmware expects.
pub const SHUTDOWN_PULSE: Duration = Duration::from_secs(3);

// Fuel gauge
pub const I2C_BUS: u8 = 1;
pub const ADDR_FUEL_GAUGE: u16 = 0x36;
pub const REG_VCELL: u8 = 0x02;
