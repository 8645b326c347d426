// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Ownership of the GPIO controller and of every line claimed through it.
//!
//! One [`LineController`] exists per daemon and is shared by reference with
//! the components that need lines. It opens the controller once; when that
//! fails it stays offline for the life of the process and every request is
//! refused with [`UpsError::ResourceUnavailable`], so callers can skip the
//! entities that depend on it instead of retrying.
//!
//! ```text
//!   Unopened --open ok--> Online --close--> Closed
//!       |
//!       +----open err---> Offline
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::error::{Result, UpsError};
use crate::hal::{GpioChip, HalError, InputLine, OutputLine};
use crate::signal::{Direction, EdgeEvent, LogicalLevel, Polarity};

/// Edges of one input line, in arrival order. Ends when the line is released.
pub type EdgeStream = mpsc::UnboundedReceiver<EdgeEvent>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChipState {
    Unopened,
    Online,
    Offline,
    Closed,
}

/// Exclusive claim on one line. Obtained from [`LineController`] and given
/// back with [`LineController::release`].
#[derive(Debug)]
pub struct LineRequest {
    line: u8,
    direction: Direction,
    polarity: Polarity,
    claim: u64,
    debounce: Duration,
    events: Option<EdgeStream>,
}

impl LineRequest {
    pub fn line(&self) -> u8 {
        self.line
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Debounce interval requested for an input line; zero for outputs.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Hands out the edge stream of an input line. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<EdgeStream> {
        self.events.take()
    }
}

enum ClaimedLine {
    Input(Box<dyn InputLine>),
    Output(Box<dyn OutputLine>),
}

struct Claim {
    id: u64,
    line: ClaimedLine,
}

struct Hub {
    state: ChipState,
    chip: Option<Box<dyn GpioChip>>,
    claims: HashMap<u8, Claim>,
    next_claim: u64,
}

impl Hub {
    fn chip(&self) -> Result<&dyn GpioChip> {
        match (self.state, self.chip.as_deref()) {
            (ChipState::Online, Some(chip)) => Ok(chip),
            (state, _) => Err(UpsError::ResourceUnavailable(format!(
                "controller is {:?}",
                state
            ))),
        }
    }

    fn ensure_unclaimed(&self, line: u8) -> Result<()> {
        if self.claims.contains_key(&line) {
            Err(UpsError::AlreadyClaimed { line })
        } else {
            Ok(())
        }
    }

    fn insert(&mut self, line: u8, claimed: ClaimedLine) -> u64 {
        self.next_claim += 1;
        let id = self.next_claim;
        self.claims.insert(line, Claim { id, line: claimed });
        id
    }

    fn claim_of(&mut self, request: &LineRequest) -> Result<&mut ClaimedLine> {
        self.chip()?;
        match self.claims.get_mut(&request.line) {
            Some(claim) if claim.id == request.claim => Ok(&mut claim.line),
            _ => Err(UpsError::InvalidHandle { line: request.line }),
        }
    }
}

pub struct LineController {
    hub: Mutex<Hub>,
}

impl Default for LineController {
    fn default() -> Self {
        Self::new()
    }
}

impl LineController {
    pub fn new() -> Self {
        LineController {
            hub: Mutex::new(Hub {
                state: ChipState::Unopened,
                chip: None,
                claims: HashMap::new(),
                next_claim: 0,
            }),
        }
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the controller with `connect`. Only the first call attempts
    /// anything; later calls just report whether the controller is online.
    pub fn open<F>(&self, connect: F) -> bool
    where
        F: FnOnce() -> std::result::Result<Box<dyn GpioChip>, HalError>,
    {
        let mut hub = self.hub();
        if hub.state != ChipState::Unopened {
            warn!("GPIO controller open already attempted (state {:?})", hub.state);
            return hub.state == ChipState::Online;
        }
        match connect() {
            Ok(chip) => {
                hub.chip = Some(chip);
                hub.state = ChipState::Online;
                info!("GPIO controller online");
                true
            }
            Err(e) => {
                hub.state = ChipState::Offline;
                error!("Failed to open GPIO controller: {}. Check host configuration.", e);
                false
            }
        }
    }

    pub fn state(&self) -> ChipState {
        self.hub().state
    }

    pub fn online(&self) -> bool {
        self.state() == ChipState::Online
    }

    /// Claims `line` as an input with edge detection on both edges.
    ///
    /// Returns the request together with the level read at acquisition; the
    /// edge stream is available through [`LineRequest::take_events`].
    pub fn request_input(
        &self,
        line: u8,
        polarity: Polarity,
        debounce: Duration,
    ) -> Result<(LineRequest, LogicalLevel)> {
        let mut hub = self.hub();
        let mut input = {
            let chip = hub.chip()?;
            hub.ensure_unclaimed(line)?;
            chip.request_input(line)
                .map_err(|e| UpsError::from_hal(line, e))?
        };

        // Watch before reading so an edge racing the read is seen afterwards
        // rather than lost.
        let (tx, rx) = mpsc::unbounded_channel();
        input
            .watch(Box::new(move |event| {
                let _ = tx.send(event);
            }))
            .map_err(|e| UpsError::from_hal(line, e))?;
        let level = polarity.resolve(input.read());

        let claim = hub.insert(line, ClaimedLine::Input(input));
        debug!("GPIO {} claimed as input ({:?}), level {}", line, polarity, level);
        Ok((
            LineRequest {
                line,
                direction: Direction::Input,
                polarity,
                claim,
                debounce,
                events: Some(rx),
            },
            level,
        ))
    }

    /// Claims `line` as an output already driven to `initial`.
    pub fn request_output(
        &self,
        line: u8,
        polarity: Polarity,
        initial: LogicalLevel,
    ) -> Result<LineRequest> {
        let mut hub = self.hub();
        let output = {
            let chip = hub.chip()?;
            hub.ensure_unclaimed(line)?;
            chip.request_output(line, polarity.drive(initial))
                .map_err(|e| UpsError::from_hal(line, e))?
        };

        let claim = hub.insert(line, ClaimedLine::Output(output));
        debug!("GPIO {} claimed as output ({:?}), initial {}", line, polarity, initial);
        Ok(LineRequest {
            line,
            direction: Direction::Output,
            polarity,
            claim,
            debounce: Duration::ZERO,
            events: None,
        })
    }

    pub fn set_level(&self, request: &LineRequest, level: LogicalLevel) -> Result<()> {
        let mut hub = self.hub();
        match hub.claim_of(request)? {
            ClaimedLine::Output(output) => {
                output.write(request.polarity.drive(level));
                Ok(())
            }
            ClaimedLine::Input(_) => Err(UpsError::InvalidHandle { line: request.line }),
        }
    }

    /// Current logical level: read from the pin for inputs, last driven for outputs.
    pub fn level(&self, request: &LineRequest) -> Result<LogicalLevel> {
        let mut hub = self.hub();
        let raw = match hub.claim_of(request)? {
            ClaimedLine::Input(input) => input.read(),
            ClaimedLine::Output(output) => output.level(),
        };
        Ok(request.polarity.resolve(raw))
    }

    /// Gives the line back. Releasing twice is a no-op.
    pub fn release(&self, request: &LineRequest) {
        let mut hub = self.hub();
        let owned = matches!(hub.claims.get(&request.line), Some(claim) if claim.id == request.claim);
        if owned {
            hub.claims.remove(&request.line);
            debug!("GPIO {} released", request.line);
        }
    }

    /// Closes the controller. Lines still claimed are released as they are,
    /// without changing their level.
    pub fn close(&self) {
        let mut hub = self.hub();
        if hub.state == ChipState::Closed {
            return;
        }
        if !hub.claims.is_empty() {
            let mut lines: Vec<u8> = hub.claims.keys().copied().collect();
            lines.sort_unstable();
            warn!("Closing GPIO controller with lines still claimed: {:?}", lines);
            hub.claims.clear();
        }
        hub.chip = None;
        hub.state = ChipState::Closed;
        info!("GPIO controller closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockChip;
    use crate::signal::{EdgeDirection, RawLevel};

    fn online(chip: &MockChip) -> LineController {
        let hub = LineController::new();
        let chip = chip.clone();
        assert!(hub.open(move || Ok(Box::new(chip) as Box<dyn GpioChip>)));
        hub
    }

    #[test]
    fn open_is_attempted_once() {
        let hub = LineController::new();
        assert_eq!(hub.state(), ChipState::Unopened);
        assert!(!hub.open(|| Err(HalError::Open("no /dev/gpiomem".into()))));
        assert_eq!(hub.state(), ChipState::Offline);

        let chip = MockChip::new();
        assert!(!hub.open(move || Ok(Box::new(chip) as Box<dyn GpioChip>)));
        assert_eq!(hub.state(), ChipState::Offline);
    }

    #[test]
    fn input_reports_level_at_acquisition() {
        let chip = MockChip::new();
        chip.set_level(6, RawLevel::Low);
        let hub = online(&chip);

        let (request, level) = hub
            .request_input(6, Polarity::ActiveLow, Duration::from_millis(50))
            .unwrap();
        assert_eq!(level, LogicalLevel::Active);
        assert_eq!(request.direction(), Direction::Input);
        assert_eq!(request.debounce(), Duration::from_millis(50));
        assert!(chip.is_watched(6));
    }

    #[test]
    fn output_is_driven_with_claim() {
        let chip = MockChip::new();
        let hub = online(&chip);

        hub.request_output(16, Polarity::ActiveLow, LogicalLevel::Active)
            .unwrap();
        assert_eq!(chip.writes(16), vec![RawLevel::Low]);
    }

    #[test]
    fn set_level_on_input_is_rejected() {
        let chip = MockChip::new();
        let hub = online(&chip);
        let (request, _) = hub
            .request_input(6, Polarity::ActiveHigh, Duration::ZERO)
            .unwrap();
        assert!(matches!(
            hub.set_level(&request, LogicalLevel::Active),
            Err(UpsError::InvalidHandle { line: 6 })
        ));
    }

    #[test]
    fn edge_stream_closes_on_release() {
        let chip = MockChip::new();
        let hub = online(&chip);
        let (mut request, _) = hub
            .request_input(6, Polarity::ActiveHigh, Duration::ZERO)
            .unwrap();
        let mut events = request.take_events().unwrap();
        assert!(request.take_events().is_none());

        chip.edge(6, EdgeDirection::Falling, Duration::from_millis(5));
        hub.release(&request);

        let first = events.try_recv().unwrap();
        assert_eq!(first.direction, EdgeDirection::Falling);
        assert!(matches!(
            events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn stale_request_cannot_touch_new_claim() {
        let chip = MockChip::new();
        let hub = online(&chip);
        let old = hub
            .request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive)
            .unwrap();
        hub.release(&old);
        let new = hub
            .request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive)
            .unwrap();

        assert!(matches!(
            hub.set_level(&old, LogicalLevel::Active),
            Err(UpsError::InvalidHandle { line: 26 })
        ));
        hub.release(&old);
        assert!(hub.set_level(&new, LogicalLevel::Active).is_ok());
    }

    #[test]
    fn close_releases_leftover_lines() {
        let chip = MockChip::new();
        let hub = online(&chip);
        let request = hub
            .request_output(16, Polarity::ActiveLow, LogicalLevel::Inactive)
            .unwrap();

        hub.close();
        assert_eq!(hub.state(), ChipState::Closed);
        assert!(!chip.is_claimed(16));
        assert!(matches!(
            hub.set_level(&request, LogicalLevel::Active),
            Err(UpsError::ResourceUnavailable(_))
        ));
        hub.release(&request);
    }
}
