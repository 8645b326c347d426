// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Wiring of the line controller, the monitors/switches, telemetry polling
//! and the D-Bus entities, plus the teardown order that keeps the shutdown
//! line safe.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, watch, OnceCell};
use tokio::task::JoinHandle;

use crate::battery::{BatteryTelemetryReader, Telemetry};
use crate::board::{
    ADDR_FUEL_GAUGE, CHARGING_POLARITY, I2C_BUS, PIN_CHARGING, PIN_POWER_LOSS, PIN_SHUTDOWN,
    POWER_LOSS_DEBOUNCE, SHUTDOWN_POLARITY, SHUTDOWN_PULSE,
};
use crate::config::Config;
use crate::dbus::{self, Publisher, SharedStatus, UpsControl};
use crate::hal::mock::{MockBus, MockChip};
use crate::hal::rpi::{I2cBus, RpiChip};
use crate::hal::{GpioChip, HalError, RegisterBus};
use crate::hub::{LineController, LineRequest};
use crate::monitor::{DebouncedInputMonitor, LevelChange};
use crate::pulse::{PulseOutputController, PulseRunner};
use crate::restore::LastKnownState;
use crate::signal::LogicalLevel;
use crate::status::{StatusEvent, UpsStatus};

/// Where the daemon gets its hardware from.
#[derive(Clone)]
pub enum Backend {
    Hardware,
    /// In-memory board; `chip: None` simulates a GPIO controller that
    /// cannot be opened.
    Simulated { chip: Option<MockChip>, bus: MockBus },
}

impl Backend {
    /// Simulated board with a healthy, half-charged pack.
    pub fn simulated() -> Self {
        // 3.75 V per cell, as the gauge puts it on the wire
        Backend::Simulated {
            chip: Some(MockChip::new()),
            bus: MockBus::new(Some(48_000u16.swap_bytes())),
        }
    }

    fn open_chip(&self) -> Result<Box<dyn GpioChip>, HalError> {
        match self {
            Backend::Hardware => Ok(Box::new(RpiChip::open()?)),
            Backend::Simulated { chip: Some(chip), .. } => Ok(Box::new(chip.clone())),
            Backend::Simulated { chip: None, .. } => {
                Err(HalError::Open("simulated GPIO controller absent".into()))
            }
        }
    }

    fn open_bus(&self) -> Result<Box<dyn RegisterBus>, HalError> {
        match self {
            Backend::Hardware => Ok(Box::new(I2cBus::open(I2C_BUS, ADDR_FUEL_GAUGE)?)),
            Backend::Simulated { bus, .. } => Ok(Box::new(bus.clone())),
        }
    }
}

pub struct Daemon {
    config: Config,
    hub: Arc<LineController>,
    status: SharedStatus,
    events: mpsc::UnboundedSender<StatusEvent>,
    publisher: Arc<OnceCell<Publisher>>,
    power_loss: Option<LineRequest>,
    charging: Option<Arc<PulseOutputController>>,
    shutdown: Option<Arc<PulseRunner>>,
    battery: Option<BatteryTelemetryReader>,
    restore: Arc<LastKnownState>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Opens the hardware and sets up every entity that can be set up.
    /// Must be called from within a tokio runtime.
    pub fn start(config: Config, backend: &Backend) -> Self {
        let hub = Arc::new(LineController::new());
        hub.open(|| backend.open_chip());

        let status: SharedStatus = Arc::new(RwLock::new(UpsStatus::new(
            config.power_loss.device_class,
        )));
        let (events, events_rx) = mpsc::unbounded_channel();
        let publisher = Arc::new(OnceCell::new());
        let restore = Arc::new(LastKnownState::new(&config.state.path));

        let battery = match backend.open_bus() {
            Ok(bus) => Some(BatteryTelemetryReader::new(bus)),
            Err(e) => {
                error!("Battery telemetry disabled: {}", e);
                None
            }
        };

        let mut daemon = Daemon {
            config,
            hub,
            status: status.clone(),
            events,
            publisher: publisher.clone(),
            power_loss: None,
            charging: None,
            shutdown: None,
            battery,
            restore,
            tasks: Vec::new(),
        };
        daemon
            .tasks
            .push(tokio::spawn(apply_events(status, events_rx, publisher)));

        if daemon.hub.online() {
            daemon.setup_power_loss();
            daemon.setup_charging();
            daemon.setup_shutdown();
        } else {
            error!("GPIO controller is offline, skipping power-loss sensor and switches");
        }
        daemon
    }

    fn setup_power_loss(&mut self) {
        let polarity = self.config.power_loss.polarity();
        let (mut request, level) =
            match self
                .hub
                .request_input(PIN_POWER_LOSS, polarity, POWER_LOSS_DEBOUNCE)
            {
                Ok(acquired) => acquired,
                Err(e) => {
                    error!("Failed to setup power-loss sensor: {}", e);
                    return;
                }
            };
        let monitor = match DebouncedInputMonitor::new(&mut request, level) {
            Ok(monitor) => monitor,
            Err(e) => {
                error!("Failed to monitor power-loss sensor: {}", e);
                self.hub.release(&request);
                return;
            }
        };
        debug!(
            "Power-loss sensor pin={} initial={} polarity={:?}",
            PIN_POWER_LOSS, level, polarity
        );
        let _ = self.events.send(StatusEvent::PowerLoss(level));

        let changes = monitor.subscribe();
        self.tasks.push(tokio::spawn(monitor.run()));
        self.tasks
            .push(tokio::spawn(forward_level_changes(changes, self.events.clone())));
        self.power_loss = Some(request);
    }

    fn setup_charging(&mut self) {
        let initial = self.restore.charging();
        let request = match self
            .hub
            .request_output(PIN_CHARGING, CHARGING_POLARITY, initial)
        {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to setup charging switch: {}", e);
                return;
            }
        };
        debug!("Charging switch pin={} initial={}", PIN_CHARGING, initial);
        let controller = Arc::new(PulseOutputController::new(
            self.hub.clone(),
            request,
            initial,
        ));
        let _ = self.events.send(StatusEvent::Charging(initial.is_active()));
        self.tasks.push(tokio::spawn(forward_switch(
            controller.subscribe(),
            self.events.clone(),
            StatusEvent::Charging,
        )));
        self.charging = Some(controller);
    }

    fn setup_shutdown(&mut self) {
        // Momentary: always starts released, whatever was reported before.
        let request = match self.hub.request_output(
            PIN_SHUTDOWN,
            SHUTDOWN_POLARITY,
            LogicalLevel::Inactive,
        ) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to setup shutdown switch: {}", e);
                return;
            }
        };
        let controller = Arc::new(PulseOutputController::new(
            self.hub.clone(),
            request,
            LogicalLevel::Inactive,
        ));
        let _ = self.events.send(StatusEvent::Shutdown(false));
        self.tasks.push(tokio::spawn(forward_switch(
            controller.subscribe(),
            self.events.clone(),
            StatusEvent::Shutdown,
        )));
        self.shutdown = Some(Arc::new(PulseRunner::new(controller, SHUTDOWN_PULSE)));
    }

    pub fn status(&self) -> UpsStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hub(&self) -> &Arc<LineController> {
        &self.hub
    }

    pub fn charging(&self) -> Option<&Arc<PulseOutputController>> {
        self.charging.as_ref()
    }

    pub fn shutdown(&self) -> Option<&Arc<PulseRunner>> {
        self.shutdown.as_ref()
    }

    pub fn restore(&self) -> &Arc<LastKnownState> {
        &self.restore
    }

    /// Reads the gauge once and queues the result.
    pub fn poll_battery(&mut self) -> Telemetry {
        let telemetry = match self.battery.as_mut() {
            Some(reader) => reader.read_once(),
            None => Telemetry::Unavailable,
        };
        let _ = self.events.send(StatusEvent::Battery(telemetry));
        telemetry
    }

    /// Serves D-Bus (if enabled) and polls telemetry until `stop` completes,
    /// then tears everything down.
    pub async fn run<F>(mut self, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let connection = if self.config.dbus.enabled {
            let control = UpsControl::new(
                self.status.clone(),
                self.charging.clone(),
                self.shutdown.clone(),
                self.restore.clone(),
            );
            match dbus::serve(&self.config.dbus, control).await {
                Ok((connection, publisher)) => {
                    publisher.announce().await;
                    let _ = self.publisher.set(publisher);
                    Some(connection)
                }
                Err(e) => {
                    self.teardown().await;
                    return Err(anyhow::anyhow!("cannot serve D-Bus: {}", e));
                }
            }
        } else {
            info!("D-Bus disabled by configuration");
            None
        };

        let mut ticker = tokio::time::interval(self.config.battery.poll_interval());
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    self.poll_battery();
                }
            }
        }

        info!("Stopping");
        // No method call may reach the switches once teardown has started.
        drop(connection);
        self.teardown().await;
        Ok(())
    }

    /// Cancels any in-flight pulse (forcing its line inactive), stops all
    /// tasks, releases every line and closes the controller.
    pub async fn teardown(mut self) {
        if let Some(shutdown) = &self.shutdown {
            shutdown.abort().await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        if let Some(request) = self.power_loss.take() {
            self.hub.release(&request);
        }
        if let Some(charging) = self.charging.take() {
            charging.release();
        }
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.controller().release();
        }
        self.hub.close();
    }
}

/// Applies status events to the shared snapshot and tells the host when
/// something it shows has changed.
async fn apply_events(
    status: SharedStatus,
    mut events: mpsc::UnboundedReceiver<StatusEvent>,
    publisher: Arc<OnceCell<Publisher>>,
) {
    let mut last_broadcast = *status.read().unwrap_or_else(PoisonError::into_inner);
    while let Some(event) = events.recv().await {
        let current = {
            let mut w = status.write().unwrap_or_else(PoisonError::into_inner);
            w.apply(event);
            *w
        };
        if !current.significant_change(&last_broadcast) {
            continue;
        }
        last_broadcast = current;
        info!(
            "[EVENT] SOC: {} | V: {} | Sensor: {} | Charging: {} | Shutdown: {}",
            current
                .percentage()
                .map_or_else(|| "unknown".to_string(), |p| format!("{}%", p)),
            current
                .voltage()
                .map_or_else(|| "unknown".to_string(), |v| format!("{:.3}V", v)),
            if current.sensor_on() { "ON" } else { "OFF" },
            if current.charging == Some(true) { "YES" } else { "NO" },
            if current.shutdown_active { "ACTIVE" } else { "idle" },
        );
        if let Some(publisher) = publisher.get() {
            publisher.announce().await;
        }
    }
}

async fn forward_level_changes(
    mut changes: broadcast::Receiver<LevelChange>,
    events: mpsc::UnboundedSender<StatusEvent>,
) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                let _ = events.send(StatusEvent::PowerLoss(change.level));
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Status lagged behind power-loss sensor by {} changes", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn forward_switch(
    mut state: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<StatusEvent>,
    event: fn(bool) -> StatusEvent,
) {
    while state.changed().await.is_ok() {
        let on = *state.borrow_and_update();
        let _ = events.send(event(on));
    }
}
