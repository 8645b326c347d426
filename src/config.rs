// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Daemon configuration, read from a TOML file.
//!
//! Every key is optional; a missing file means all defaults. Board wiring,
//! debounce and pulse width are fixed and not configurable.
//!
//! ```toml
//! [power_loss]
//! device_class = "problem"   # or "power"
//! invert_logic = true
//!
//! [battery]
//! poll_interval_secs = 30
//!
//! [dbus]
//! enabled = true
//! session = false
//! name = "io.geekworm.X728"
//!
//! [state]
//! path = "/var/lib/x728d/state.toml"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpsError};
use crate::signal::Polarity;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/x728d/config.toml";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// "On" means something is wrong: AC power is lost.
    #[default]
    Problem,
    /// "On" means power is present.
    Power,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Problem => "problem",
            DeviceClass::Power => "power",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerLossConfig {
    pub device_class: DeviceClass,
    pub invert_logic: bool,
}

impl Default for PowerLossConfig {
    fn default() -> Self {
        PowerLossConfig {
            device_class: DeviceClass::Problem,
            invert_logic: true,
        }
    }
}

impl PowerLossConfig {
    pub fn polarity(&self) -> Polarity {
        Polarity::from_active_low(self.invert_logic)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub poll_interval_secs: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        BatteryConfig {
            poll_interval_secs: 30,
        }
    }
}

impl BatteryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbusConfig {
    pub enabled: bool,
    /// Serve on the session bus instead of the system bus.
    pub session: bool,
    pub name: String,
}

impl Default for DbusConfig {
    fn default() -> Self {
        DbusConfig {
            enabled: true,
            session: false,
            name: "io.geekworm.X728".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            path: PathBuf::from("/var/lib/x728d/state.toml"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub power_loss: PowerLossConfig,
    pub battery: BatteryConfig,
    pub dbus: DbusConfig,
    pub state: StateConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| UpsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`; a file that does not exist yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml(&text).map_err(|e| match e {
                    UpsError::Config(msg) => UpsError::Config(format!("{}: {}", path.display(), msg)),
                    other => other,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                Ok(Config::default())
            }
            Err(e) => Err(UpsError::Config(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.battery.poll_interval_secs == 0 {
            return Err(UpsError::Config(
                "battery.poll_interval_secs must be at least 1".into(),
            ));
        }
        if self.dbus.enabled && self.dbus.name.is_empty() {
            return Err(UpsError::Config("dbus.name must not be empty".into()));
        }
        Ok(())
    }
}
