// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Host-facing entities, published on D-Bus.
//!
//! The UPower-compatible objects let desktop power managers see the UPS as a
//! battery; `io.geekworm.X728` carries the board-specific sensor and switches.

use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};
use zbus::object_server::InterfaceRef;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::{connection::Builder, fdo, interface, Connection};

use crate::config::DbusConfig;
use crate::error::UpsError;
use crate::pulse::{PulseOutputController, PulseRunner};
use crate::restore::LastKnownState;
use crate::signal::LogicalLevel;
use crate::status::UpsStatus;

pub const UPOWER_PATH: &str = "/org/freedesktop/UPower";
pub const BATTERY_PATH: &str = "/org/freedesktop/UPower/devices/battery_x728";
pub const CONTROL_PATH: &str = "/io/geekworm/X728";

pub type SharedStatus = Arc<RwLock<UpsStatus>>;

fn snapshot(status: &SharedStatus) -> UpsStatus {
    *status.read().unwrap_or_else(PoisonError::into_inner)
}

fn battery_path() -> OwnedObjectPath {
    ObjectPath::from_static_str_unchecked(BATTERY_PATH).into()
}

fn to_fdo(err: UpsError) -> fdo::Error {
    fdo::Error::Failed(err.to_string())
}

fn telemetry_unknown(what: &str) -> fdo::Error {
    fdo::Error::Failed(format!("battery {} unknown: telemetry unavailable", what))
}

// --- UPower Manager Interface ---
pub struct UPowerManager {
    status: SharedStatus,
}

#[interface(name = "org.freedesktop.UPower")]
impl UPowerManager {
    fn enumerate_devices(&self) -> Vec<OwnedObjectPath> {
        vec![battery_path()]
    }

    fn get_display_device(&self) -> OwnedObjectPath {
        battery_path()
    }

    #[zbus(property)]
    fn daemon_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    #[zbus(property)]
    fn on_battery(&self) -> bool {
        snapshot(&self.status).on_battery()
    }
}

// --- UPower Device Interface ---
pub struct UpsBattery {
    status: SharedStatus,
}

#[interface(name = "org.freedesktop.UPower.Device")]
impl UpsBattery {
    #[zbus(property)]
    fn percentage(&self) -> f64 {
        snapshot(&self.status).percentage().map_or(0.0, f64::from)
    }

    #[zbus(property)]
    fn voltage(&self) -> f64 {
        snapshot(&self.status).voltage().unwrap_or(0.0)
    }

    #[zbus(property)]
    fn state(&self) -> u32 {
        snapshot(&self.status).charge_state() as u32
    }

    /// False while telemetry is unavailable.
    #[zbus(property)]
    fn is_present(&self) -> bool {
        snapshot(&self.status).percentage().is_some()
    }

    #[zbus(property)]
    fn is_rechargeable(&self) -> bool { true }

    #[zbus(property)]
    fn power_supply(&self) -> bool { true }

    #[zbus(property)]
    fn technology(&self) -> u32 { 1 } // 1 = Li-ion

    #[zbus(property)]
    fn model(&self) -> String { "X728".to_string() }

    #[zbus(property)]
    fn vendor(&self) -> String { "Geekworm".to_string() }

    #[zbus(property)]
    fn type_(&self) -> u32 { 2 } // 2 = Battery
}

// --- X728 Control Interface ---
pub struct UpsControl {
    status: SharedStatus,
    charging: Option<Arc<PulseOutputController>>,
    shutdown: Option<Arc<PulseRunner>>,
    restore: Arc<LastKnownState>,
}

impl UpsControl {
    pub fn new(
        status: SharedStatus,
        charging: Option<Arc<PulseOutputController>>,
        shutdown: Option<Arc<PulseRunner>>,
        restore: Arc<LastKnownState>,
    ) -> Self {
        UpsControl {
            status,
            charging,
            shutdown,
            restore,
        }
    }
}

#[interface(name = "io.geekworm.X728")]
impl UpsControl {
    /// Sensor state; its meaning follows `DeviceClass`.
    #[zbus(property)]
    fn power_loss(&self) -> bool {
        snapshot(&self.status).sensor_on()
    }

    #[zbus(property)]
    fn device_class(&self) -> String {
        snapshot(&self.status).device_class.as_str().to_string()
    }

    #[zbus(property)]
    fn charging(&self) -> bool {
        snapshot(&self.status).charging.unwrap_or(false)
    }

    #[zbus(property)]
    fn shutdown_active(&self) -> bool {
        snapshot(&self.status).shutdown_active
    }

    #[zbus(property)]
    fn battery_available(&self) -> bool {
        snapshot(&self.status).percentage().is_some()
    }

    /// Fails while telemetry is unavailable; see `BatteryAvailable`.
    #[zbus(property)]
    fn battery_voltage(&self) -> fdo::Result<f64> {
        snapshot(&self.status)
            .voltage()
            .ok_or_else(|| telemetry_unknown("voltage"))
    }

    #[zbus(property)]
    fn battery_percentage(&self) -> fdo::Result<u8> {
        snapshot(&self.status)
            .percentage()
            .ok_or_else(|| telemetry_unknown("percentage"))
    }

    async fn set_charging(&self, enabled: bool) -> fdo::Result<()> {
        let Some(charging) = &self.charging else {
            return Err(fdo::Error::NotSupported("charge switch unavailable".into()));
        };
        let level = LogicalLevel::from(enabled);
        charging.set_level(level).map_err(to_fdo)?;
        self.restore.store_charging(level);
        info!("Battery charging {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    async fn trigger_shutdown(&self) -> fdo::Result<()> {
        let Some(shutdown) = &self.shutdown else {
            return Err(fdo::Error::NotSupported("shutdown trigger unavailable".into()));
        };
        info!("Safe shutdown requested over D-Bus");
        shutdown.trigger().await.map_err(to_fdo)
    }
}

/// Emits property-changed signals for all published objects.
pub struct Publisher {
    manager: InterfaceRef<UPowerManager>,
    battery: InterfaceRef<UpsBattery>,
    control: InterfaceRef<UpsControl>,
}

impl Publisher {
    pub async fn announce(&self) {
        if let Err(e) = self.try_announce().await {
            warn!("Failed to emit D-Bus property changes: {}", e);
        }
    }

    async fn try_announce(&self) -> zbus::Result<()> {
        let bat_ctx = self.battery.signal_context();
        let bat_inst = self.battery.get().await;
        bat_inst.percentage_changed(bat_ctx).await?;
        bat_inst.state_changed(bat_ctx).await?;
        bat_inst.voltage_changed(bat_ctx).await?;
        bat_inst.is_present_changed(bat_ctx).await?;

        let mgr_ctx = self.manager.signal_context();
        let mgr_inst = self.manager.get().await;
        mgr_inst.on_battery_changed(mgr_ctx).await?;

        let ctl_ctx = self.control.signal_context();
        let ctl_inst = self.control.get().await;
        ctl_inst.power_loss_changed(ctl_ctx).await?;
        ctl_inst.charging_changed(ctl_ctx).await?;
        ctl_inst.shutdown_active_changed(ctl_ctx).await?;
        ctl_inst.battery_available_changed(ctl_ctx).await?;
        // Unknown values have no value to signal; BatteryAvailable covers them.
        if ctl_inst.battery_available() {
            ctl_inst.battery_voltage_changed(ctl_ctx).await?;
            ctl_inst.battery_percentage_changed(ctl_ctx).await?;
        }
        Ok(())
    }
}

/// Connects to the configured bus, claims the name and serves all objects.
pub async fn serve(config: &DbusConfig, control: UpsControl) -> zbus::Result<(Connection, Publisher)> {
    let status = control.status.clone();
    let manager_obj = UPowerManager {
        status: status.clone(),
    };
    let battery_obj = UpsBattery { status };

    let builder = if config.session {
        Builder::session()?
    } else {
        Builder::system()?
    };
    let conn = builder
        .name(config.name.as_str())?
        .serve_at(UPOWER_PATH, manager_obj)?
        .serve_at(BATTERY_PATH, battery_obj)?
        .serve_at(CONTROL_PATH, control)?
        .build()
        .await?;

    let publisher = {
        let object_server = conn.object_server();
        Publisher {
            manager: object_server.interface::<_, UPowerManager>(UPOWER_PATH).await?,
            battery: object_server.interface::<_, UpsBattery>(BATTERY_PATH).await?,
            control: object_server.interface::<_, UpsControl>(CONTROL_PATH).await?,
        }
    };
    info!("D-Bus service {} ready", config.name);
    Ok((conn, publisher))
}
