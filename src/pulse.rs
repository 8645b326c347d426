// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Output lines driven either as plain switches or as timed pulses.
//!
//! A pulse writes `Active`, waits, then writes `Inactive`. The reported state
//! follows the line: it turns on only after the assert write and off only
//! after the deassert write. If the pulse future is dropped mid-wait (task
//! aborted, daemon tearing down) the line is forced back to `Inactive` before
//! anything else can happen to it. Leaving the shutdown line asserted would
//! make the board's power controller cut power a second time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, UpsError};
use crate::hub::{LineController, LineRequest};
use crate::signal::LogicalLevel;

pub struct PulseOutputController {
    hub: Arc<LineController>,
    request: LineRequest,
    busy: AtomicBool,
    active: watch::Sender<bool>,
}

impl PulseOutputController {
    /// Wraps a claimed output line whose current level is `initial`.
    pub fn new(hub: Arc<LineController>, request: LineRequest, initial: LogicalLevel) -> Self {
        let (active, _) = watch::channel(initial.is_active());
        PulseOutputController {
            hub,
            request,
            busy: AtomicBool::new(false),
            active,
        }
    }

    pub fn line(&self) -> u8 {
        self.request.line()
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Receiver that observes every change of the reported state.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    /// Drives the line directly. Refused while a pulse is in flight.
    pub fn set_level(&self, level: LogicalLevel) -> Result<()> {
        if self.is_busy() {
            return Err(UpsError::Busy { line: self.line() });
        }
        self.hub.set_level(&self.request, level)?;
        self.active.send_replace(level.is_active());
        debug!("GPIO {} set {}", self.line(), level);
        Ok(())
    }

    /// Asserts the line for `duration`, then deasserts it.
    ///
    /// A second call while one is running fails with [`UpsError::Busy`].
    pub async fn pulse(&self, duration: Duration) -> Result<()> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(UpsError::Busy { line: self.line() });
        }
        let mut guard = PulseGuard {
            owner: self,
            armed: false,
        };

        self.hub.set_level(&self.request, LogicalLevel::Active)?;
        guard.armed = true;
        self.active.send_replace(true);
        info!(
            "GPIO {} pulse started for {:.1}s",
            self.line(),
            duration.as_secs_f64()
        );

        tokio::time::sleep(duration).await;

        self.hub.set_level(&self.request, LogicalLevel::Inactive)?;
        guard.armed = false;
        self.active.send_replace(false);
        info!("GPIO {} pulse completed", self.line());
        Ok(())
    }

    fn force_inactive(&self) {
        match self.hub.set_level(&self.request, LogicalLevel::Inactive) {
            Ok(()) => info!("GPIO {} pulse interrupted, line forced inactive", self.line()),
            Err(e) => error!("GPIO {} could not be forced inactive: {}", self.line(), e),
        }
        self.active.send_replace(false);
    }

    /// Gives the line back without touching its level. Idempotent.
    pub fn release(&self) {
        self.hub.release(&self.request);
    }
}

impl Drop for PulseOutputController {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs pulses on tasks owned by the daemon, so that teardown can cancel an
/// in-flight pulse (forcing the line inactive) before releasing the line.
pub struct PulseRunner {
    controller: Arc<PulseOutputController>,
    duration: Duration,
    tasks: Mutex<Tasks>,
}

#[derive(Default)]
struct Tasks {
    closed: bool,
    running: Vec<JoinHandle<()>>,
}

impl PulseRunner {
    pub fn new(controller: Arc<PulseOutputController>, duration: Duration) -> Self {
        PulseRunner {
            controller,
            duration,
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub fn controller(&self) -> &Arc<PulseOutputController> {
        &self.controller
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.tasks().closed
    }

    /// Starts a pulse and waits for it to finish. An aborted pulse is not an
    /// error for the caller. Fails once the runner has been aborted.
    pub async fn trigger(&self) -> Result<()> {
        if self.controller.is_busy() {
            return Err(UpsError::Busy {
                line: self.controller.line(),
            });
        }
        let (tx, rx) = oneshot::channel();
        {
            // Spawned under the lock: either abort() sees this task, or this
            // call sees the runner closed.
            let mut tasks = self.tasks();
            if tasks.closed {
                return Err(UpsError::ResourceUnavailable(format!(
                    "GPIO {} pulse runner is shut down",
                    self.controller.line()
                )));
            }
            let controller = self.controller.clone();
            let duration = self.duration;
            let handle = tokio::spawn(async move {
                let _ = tx.send(controller.pulse(duration).await);
            });
            tasks.running.retain(|task| !task.is_finished());
            tasks.running.push(handle);
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Refuses further pulses, cancels in-flight ones and waits until their
    /// lines are deasserted.
    pub async fn abort(&self) {
        let running = {
            let mut tasks = self.tasks();
            tasks.closed = true;
            std::mem::take(&mut tasks.running)
        };
        for task in running {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Clears the busy flag when a pulse ends, and deasserts the line if the
/// pulse ended anywhere between its two writes.
struct PulseGuard<'a> {
    owner: &'a PulseOutputController,
    armed: bool,
}

impl Drop for PulseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.owner.force_inactive();
        }
        self.owner.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockChip;
    use crate::hal::GpioChip;
    use crate::signal::{Polarity, RawLevel};

    fn controller(chip: &MockChip) -> (Arc<LineController>, PulseOutputController) {
        let hub = Arc::new(LineController::new());
        let backend = chip.clone();
        hub.open(move || Ok(Box::new(backend) as Box<dyn GpioChip>));
        let request = hub
            .request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive)
            .unwrap();
        let ctl = PulseOutputController::new(hub.clone(), request, LogicalLevel::Inactive);
        (hub, ctl)
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_asserts_then_deasserts() {
        let chip = MockChip::new();
        let (_hub, ctl) = controller(&chip);

        ctl.pulse(Duration::from_secs(3)).await.unwrap();

        assert_eq!(
            chip.writes(26),
            vec![RawLevel::Low, RawLevel::High, RawLevel::Low]
        );
        assert!(!ctl.is_active());
        assert!(!ctl.is_busy());
    }

    #[tokio::test]
    async fn set_level_tracks_state() {
        let chip = MockChip::new();
        let (_hub, ctl) = controller(&chip);

        ctl.set_level(LogicalLevel::Active).unwrap();
        assert!(ctl.is_active());
        assert_eq!(chip.level(26), RawLevel::High);
        ctl.set_level(LogicalLevel::Inactive).unwrap();
        assert!(!ctl.is_active());
    }

    #[tokio::test]
    async fn released_controller_rejects_writes() {
        let chip = MockChip::new();
        let (_hub, ctl) = controller(&chip);
        ctl.release();
        ctl.release();
        assert!(matches!(
            ctl.set_level(LogicalLevel::Active),
            Err(UpsError::InvalidHandle { line: 26 })
        ));
        assert!(!chip.is_claimed(26));
    }

    #[tokio::test]
    async fn release_keeps_level() {
        let chip = MockChip::new();
        let (_hub, ctl) = controller(&chip);
        ctl.set_level(LogicalLevel::Active).unwrap();
        drop(ctl);
        assert_eq!(chip.writes(26), vec![RawLevel::Low, RawLevel::High]);
    }
}
