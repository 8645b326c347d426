// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Reduction of a bouncy edge stream to clean logical-level changes.
//!
//! A new level is accepted once it has been stable for the debounce
//! interval, i.e. no further edge arrived within the interval after the
//! edge that produced it. Consequences:
//!
//! - a burst of edges closer together than the interval yields at most one
//!   change, carrying the level of the last edge of the burst;
//! - edges at least one interval apart each yield their own change;
//! - an edge that lands on the already-accepted level cancels any pending
//!   change.
//!
//! The window is seeded with the level read when the line was claimed, so the
//! first genuine transition after acquisition is reported.

use std::time::Duration;

use log::{debug, info, trace};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::error::{Result, UpsError};
use crate::hub::{EdgeStream, LineRequest};
use crate::signal::{EdgeEvent, LogicalLevel, Polarity};

/// Notification emitted for every accepted level change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelChange {
    pub line: u8,
    pub level: LogicalLevel,
    /// Time of the edge that started the accepted level.
    pub timestamp: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceWindow {
    pub last_accepted_level: LogicalLevel,
    pub last_accepted_time: Option<Duration>,
    pending: Option<(LogicalLevel, Duration)>,
    last_edge: Option<Duration>,
}

impl DebounceWindow {
    pub fn seeded(level: LogicalLevel) -> Self {
        DebounceWindow {
            last_accepted_level: level,
            last_accepted_time: None,
            pending: None,
            last_edge: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn accept(&mut self) -> Option<(LogicalLevel, Duration)> {
        let (level, at) = self.pending.take()?;
        self.last_accepted_level = level;
        self.last_accepted_time = Some(at);
        Some((level, at))
    }
}

pub struct DebouncedInputMonitor {
    line: u8,
    polarity: Polarity,
    interval: Duration,
    window: DebounceWindow,
    events: Option<EdgeStream>,
    notify: broadcast::Sender<LevelChange>,
}

impl DebouncedInputMonitor {
    /// Builds a monitor for a claimed input line, taking over its edge stream.
    pub fn new(request: &mut LineRequest, initial: LogicalLevel) -> Result<Self> {
        let events = request
            .take_events()
            .ok_or(UpsError::InvalidHandle {
                line: request.line(),
            })?;
        let mut monitor = Self::detached(
            request.line(),
            request.polarity(),
            request.debounce(),
            initial,
        );
        monitor.events = Some(events);
        Ok(monitor)
    }

    /// A monitor fed by hand through [`process`](Self::process) and
    /// [`settle`](Self::settle).
    pub fn detached(
        line: u8,
        polarity: Polarity,
        interval: Duration,
        initial: LogicalLevel,
    ) -> Self {
        let (notify, _) = broadcast::channel(16);
        DebouncedInputMonitor {
            line,
            polarity,
            interval,
            window: DebounceWindow::seeded(initial),
            events: None,
            notify,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LevelChange> {
        self.notify.subscribe()
    }

    pub fn level(&self) -> LogicalLevel {
        self.window.last_accepted_level
    }

    pub fn window(&self) -> &DebounceWindow {
        &self.window
    }

    /// Feeds one edge. Returns the change it confirmed, if any; the change
    /// is also broadcast to subscribers.
    pub fn process(&mut self, event: &EdgeEvent) -> Option<LevelChange> {
        let level = self.polarity.resolve(event.direction.level_after());

        // A pending level followed by a full quiet interval is confirmed by
        // the arrival of this edge.
        let confirmed = match (self.window.pending, self.window.last_edge) {
            (Some(_), Some(last)) if event.timestamp.saturating_sub(last) >= self.interval => {
                self.window.accept()
            }
            _ => None,
        };

        self.window.last_edge = Some(event.timestamp);
        if level != self.window.last_accepted_level {
            self.window.pending = Some((level, event.timestamp));
        } else {
            if self.window.pending.is_some() {
                trace!("GPIO {} bounce back to {}", self.line, level);
            }
            self.window.pending = None;
        }

        confirmed.map(|(level, at)| self.emit(level, at))
    }

    /// Called after a quiet interval with no edges: confirms the pending
    /// level, if any.
    pub fn settle(&mut self) -> Option<LevelChange> {
        self.window
            .accept()
            .map(|(level, at)| self.emit(level, at))
    }

    fn emit(&self, level: LogicalLevel, timestamp: Duration) -> LevelChange {
        let change = LevelChange {
            line: self.line,
            level,
            timestamp,
        };
        info!("GPIO {} changed to {}", self.line, level);
        // No subscribers is fine.
        let _ = self.notify.send(change);
        change
    }

    /// Consumes the edge stream until it ends. Each edge is handled to
    /// completion before the next one is read.
    pub async fn run(mut self) {
        let Some(mut events) = self.events.take() else {
            debug!("GPIO {} monitor has no edge stream", self.line);
            return;
        };
        loop {
            let next = if self.window.has_pending() {
                match timeout(self.interval, events.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.settle();
                        continue;
                    }
                }
            } else {
                events.recv().await
            };
            match next {
                Some(event) => {
                    self.process(&event);
                }
                None => break,
            }
        }
        debug!("GPIO {} edge stream closed, monitor stopped", self.line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::EdgeDirection::{Falling, Rising};
    use crate::signal::EdgeDirection;

    const DEBOUNCE: Duration = Duration::from_millis(50);

    fn edge(direction: EdgeDirection, ms: u64) -> EdgeEvent {
        EdgeEvent {
            line: 6,
            direction,
            timestamp: Duration::from_millis(ms),
        }
    }

    fn monitor(initial: LogicalLevel) -> DebouncedInputMonitor {
        DebouncedInputMonitor::detached(6, Polarity::ActiveHigh, DEBOUNCE, initial)
    }

    #[test]
    fn first_transition_after_seed_is_reported() {
        let mut m = monitor(LogicalLevel::Inactive);
        assert_eq!(m.process(&edge(Rising, 0)), None);
        let change = m.settle().unwrap();
        assert_eq!(change.level, LogicalLevel::Active);
        assert_eq!(m.level(), LogicalLevel::Active);
        assert_eq!(m.window().last_accepted_time, Some(Duration::ZERO));
    }

    #[test]
    fn duplicate_of_seeded_level_is_ignored() {
        let mut m = monitor(LogicalLevel::Active);
        assert_eq!(m.process(&edge(Rising, 0)), None);
        assert_eq!(m.settle(), None);
    }

    #[test]
    fn bounce_back_cancels_change() {
        let mut m = monitor(LogicalLevel::Inactive);
        m.process(&edge(Rising, 0));
        m.process(&edge(Falling, 10));
        assert_eq!(m.settle(), None);
        assert_eq!(m.level(), LogicalLevel::Inactive);
    }

    #[test]
    fn spaced_edge_confirms_previous_level() {
        let mut m = monitor(LogicalLevel::Inactive);
        assert_eq!(m.process(&edge(Rising, 0)), None);
        let change = m.process(&edge(Falling, 50)).unwrap();
        assert_eq!(change.level, LogicalLevel::Active);
        assert_eq!(m.settle().unwrap().level, LogicalLevel::Inactive);
    }

    #[test]
    fn active_low_inverts_edges() {
        let mut m =
            DebouncedInputMonitor::detached(6, Polarity::ActiveLow, DEBOUNCE, LogicalLevel::Inactive);
        m.process(&edge(Falling, 0));
        assert_eq!(m.settle().unwrap().level, LogicalLevel::Active);
    }

    #[test]
    fn subscribers_receive_changes() {
        let mut m = monitor(LogicalLevel::Inactive);
        let mut rx = m.subscribe();
        m.process(&edge(Rising, 0));
        m.settle();
        assert_eq!(rx.try_recv().unwrap().level, LogicalLevel::Active);
    }
}
