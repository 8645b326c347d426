// Geekworm X728 UPS Daemon
// License: GPL-3.0

use std::time::Duration;

use x728::hal::mock::MockChip;
use x728::hal::{GpioChip, HalError};
use x728::hub::{ChipState, LineController};
use x728::signal::{LogicalLevel, Polarity, RawLevel};
use x728::UpsError;

const DEBOUNCE: Duration = Duration::from_millis(50);

fn online(chip: &MockChip) -> LineController {
    let hub = LineController::new();
    let backend = chip.clone();
    assert!(hub.open(move || Ok(Box::new(backend) as Box<dyn GpioChip>)));
    hub
}

#[test]
fn offline_controller_refuses_every_request() {
    let hub = LineController::new();
    assert!(!hub.open(|| Err(HalError::Open("permission denied".into()))));
    assert!(!hub.online());
    assert_eq!(hub.state(), ChipState::Offline);

    assert!(matches!(
        hub.request_input(6, Polarity::ActiveLow, DEBOUNCE),
        Err(UpsError::ResourceUnavailable(_))
    ));
    assert!(matches!(
        hub.request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive),
        Err(UpsError::ResourceUnavailable(_))
    ));
}

#[test]
fn unopened_controller_is_not_online() {
    let hub = LineController::new();
    assert!(!hub.online());
    assert!(matches!(
        hub.request_input(6, Polarity::ActiveLow, DEBOUNCE),
        Err(UpsError::ResourceUnavailable(_))
    ));
}

#[test]
fn double_request_fails_until_release() {
    let chip = MockChip::new();
    let hub = online(&chip);

    let (first, _) = hub.request_input(6, Polarity::ActiveLow, DEBOUNCE).unwrap();
    assert!(matches!(
        hub.request_input(6, Polarity::ActiveLow, DEBOUNCE),
        Err(UpsError::AlreadyClaimed { line: 6 })
    ));
    assert!(matches!(
        hub.request_output(6, Polarity::ActiveHigh, LogicalLevel::Inactive),
        Err(UpsError::AlreadyClaimed { line: 6 })
    ));

    hub.release(&first);
    assert!(hub.request_input(6, Polarity::ActiveLow, DEBOUNCE).is_ok());
}

#[test]
fn line_held_outside_the_controller_is_already_claimed() {
    let chip = MockChip::new();
    let _foreign = chip.request_output(16, RawLevel::Low).unwrap();
    let hub = online(&chip);

    assert!(matches!(
        hub.request_output(16, Polarity::ActiveLow, LogicalLevel::Inactive),
        Err(UpsError::AlreadyClaimed { line: 16 })
    ));
}

#[test]
fn acquisition_level_follows_polarity() {
    let chip = MockChip::new();
    chip.set_level(6, RawLevel::High);
    let hub = online(&chip);

    let (request, level) = hub.request_input(6, Polarity::ActiveLow, DEBOUNCE).unwrap();
    assert_eq!(level, LogicalLevel::Inactive);
    hub.release(&request);

    let (_, level) = hub.request_input(6, Polarity::ActiveHigh, DEBOUNCE).unwrap();
    assert_eq!(level, LogicalLevel::Active);
}

#[test]
fn output_initial_level_is_the_first_and_only_write() {
    let chip = MockChip::new();
    let hub = online(&chip);

    let charging = hub
        .request_output(16, Polarity::ActiveLow, LogicalLevel::Active)
        .unwrap();
    let shutdown = hub
        .request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive)
        .unwrap();

    assert_eq!(chip.writes(16), vec![RawLevel::Low]);
    assert_eq!(chip.writes(26), vec![RawLevel::Low]);
    assert_eq!(hub.level(&charging).unwrap(), LogicalLevel::Active);
    assert_eq!(hub.level(&shutdown).unwrap(), LogicalLevel::Inactive);
}

#[test]
fn set_level_after_release_is_invalid_handle() {
    let chip = MockChip::new();
    let hub = online(&chip);
    let request = hub
        .request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive)
        .unwrap();

    hub.set_level(&request, LogicalLevel::Active).unwrap();
    assert_eq!(chip.level(26), RawLevel::High);

    hub.release(&request);
    hub.release(&request);
    assert!(matches!(
        hub.set_level(&request, LogicalLevel::Inactive),
        Err(UpsError::InvalidHandle { line: 26 })
    ));
    // Release does not touch the level.
    assert_eq!(chip.writes(26), vec![RawLevel::Low, RawLevel::High]);
}

#[test]
fn closed_controller_refuses_everything() {
    let chip = MockChip::new();
    let hub = online(&chip);
    let request = hub
        .request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive)
        .unwrap();
    hub.release(&request);

    hub.close();
    hub.close();
    assert_eq!(hub.state(), ChipState::Closed);
    assert!(!hub.online());
    assert!(matches!(
        hub.request_output(26, Polarity::ActiveHigh, LogicalLevel::Inactive),
        Err(UpsError::ResourceUnavailable(_))
    ));
    assert!(matches!(
        hub.level(&request),
        Err(UpsError::ResourceUnavailable(_))
    ));
}
