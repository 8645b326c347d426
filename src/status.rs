// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Snapshot of everything the daemon reports to the host.

use crate::battery::Telemetry;
use crate::config::DeviceClass;
use crate::signal::LogicalLevel;

/// UPower device state codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ChargeState {
    Unknown = 0,
    Charging = 1,
    Discharging = 2,
    FullyCharged = 4,
    PendingCharge = 5,
}

/// One update to the snapshot, produced by the monitor, the switches or the poller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatusEvent {
    PowerLoss(LogicalLevel),
    Charging(bool),
    Shutdown(bool),
    Battery(Telemetry),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpsStatus {
    pub device_class: DeviceClass,
    /// `None` when the power-loss sensor could not be set up.
    pub power_loss: Option<LogicalLevel>,
    /// `None` when the charge switch could not be set up.
    pub charging: Option<bool>,
    pub shutdown_active: bool,
    pub battery: Telemetry,
}

impl UpsStatus {
    pub fn new(device_class: DeviceClass) -> Self {
        UpsStatus {
            device_class,
            power_loss: None,
            charging: None,
            shutdown_active: false,
            battery: Telemetry::Unavailable,
        }
    }

    pub fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::PowerLoss(level) => self.power_loss = Some(level),
            StatusEvent::Charging(on) => self.charging = Some(on),
            StatusEvent::Shutdown(on) => self.shutdown_active = on,
            StatusEvent::Battery(telemetry) => self.battery = telemetry,
        }
    }

    /// Sensor state as configured: the logical level of the input line.
    pub fn sensor_on(&self) -> bool {
        self.power_loss.is_some_and(LogicalLevel::is_active)
    }

    pub fn on_battery(&self) -> bool {
        match (self.power_loss, self.device_class) {
            (None, _) => false,
            (Some(level), DeviceClass::Problem) => level.is_active(),
            (Some(level), DeviceClass::Power) => !level.is_active(),
        }
    }

    pub fn percentage(&self) -> Option<u8> {
        self.battery.reading().map(|r| r.percentage)
    }

    pub fn voltage(&self) -> Option<f64> {
        self.battery.reading().map(|r| r.display_voltage())
    }

    pub fn charge_state(&self) -> ChargeState {
        let Some(percentage) = self.percentage() else {
            return ChargeState::Unknown;
        };
        if self.on_battery() {
            ChargeState::Discharging
        } else if percentage >= 100 {
            ChargeState::FullyCharged
        } else if self.charging == Some(true) {
            ChargeState::Charging
        } else {
            ChargeState::PendingCharge
        }
    }

    /// Whether the host should be told about the change from `last`.
    pub fn significant_change(&self, last: &UpsStatus) -> bool {
        let soc_moved = match (self.percentage(), last.percentage()) {
            (Some(now), Some(before)) => (f64::from(now) - f64::from(before)).abs() > 0.5,
            (now, before) => now.is_some() != before.is_some(),
        };
        let volts_moved = match (self.voltage(), last.voltage()) {
            (Some(now), Some(before)) => (now - before).abs() > 0.05,
            _ => false,
        };
        self.power_loss != last.power_loss
            || self.charging != last.charging
            || self.shutdown_active != last.shutdown_active
            || self.charge_state() != last.charge_state()
            || soc_moved
            || volts_moved
    }
}
