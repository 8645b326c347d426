// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! In-memory board used by the test suite and by `x728d --dry-run`.
//!
//! Cloning a [`MockChip`] or [`MockBus`] yields another handle to the same
//! simulated hardware, so a test can keep one handle to inject edges and
//! inspect outputs while the daemon owns the other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{EdgeSink, GpioChip, HalError, InputLine, OutputLine, RegisterBus};
use crate::signal::{EdgeDirection, EdgeEvent, RawLevel};

#[derive(Default)]
struct MockBoard {
    levels: HashMap<u8, RawLevel>,
    claimed: HashSet<u8>,
    sinks: HashMap<u8, EdgeSink>,
    writes: HashMap<u8, Vec<RawLevel>>,
}

#[derive(Clone, Default)]
pub struct MockChip {
    board: Arc<Mutex<MockBoard>>,
}

impl MockChip {
    pub fn new() -> Self {
        Self::default()
    }

    fn board(&self) -> MutexGuard<'_, MockBoard> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the electrical level of a line without generating an edge.
    pub fn set_level(&self, line: u8, level: RawLevel) {
        self.board().levels.insert(line, level);
    }

    /// Current electrical level; unconfigured lines read as pulled up.
    pub fn level(&self, line: u8) -> RawLevel {
        self.board()
            .levels
            .get(&line)
            .copied()
            .unwrap_or(RawLevel::High)
    }

    /// Moves the line to the level implied by `direction` and delivers the
    /// edge to whoever is watching it.
    pub fn edge(&self, line: u8, direction: EdgeDirection, timestamp: Duration) {
        let mut board = self.board();
        board.levels.insert(line, direction.level_after());
        if let Some(sink) = board.sinks.get_mut(&line) {
            sink(EdgeEvent {
                line,
                direction,
                timestamp,
            });
        }
    }

    /// Every level written to an output line, including the initial one.
    pub fn writes(&self, line: u8) -> Vec<RawLevel> {
        self.board().writes.get(&line).cloned().unwrap_or_default()
    }

    pub fn is_claimed(&self, line: u8) -> bool {
        self.board().claimed.contains(&line)
    }

    pub fn is_watched(&self, line: u8) -> bool {
        self.board().sinks.contains_key(&line)
    }

    fn claim(&self, line: u8) -> Result<(), HalError> {
        if self.board().claimed.insert(line) {
            Ok(())
        } else {
            Err(HalError::LineBusy(line))
        }
    }

    fn unclaim(&self, line: u8) {
        let mut board = self.board();
        board.claimed.remove(&line);
        board.sinks.remove(&line);
    }
}

impl GpioChip for MockChip {
    fn request_input(&self, line: u8) -> Result<Box<dyn InputLine>, HalError> {
        self.claim(line)?;
        Ok(Box::new(MockInput {
            line,
            chip: self.clone(),
        }))
    }

    fn request_output(&self, line: u8, initial: RawLevel) -> Result<Box<dyn OutputLine>, HalError> {
        self.claim(line)?;
        let mut board = self.board();
        board.levels.insert(line, initial);
        board.writes.entry(line).or_default().push(initial);
        drop(board);
        Ok(Box::new(MockOutput {
            line,
            chip: self.clone(),
        }))
    }
}

struct MockInput {
    line: u8,
    chip: MockChip,
}

impl InputLine for MockInput {
    fn read(&self) -> RawLevel {
        self.chip.level(self.line)
    }

    fn watch(&mut self, sink: EdgeSink) -> Result<(), HalError> {
        self.chip.board().sinks.insert(self.line, sink);
        Ok(())
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        self.chip.unclaim(self.line);
    }
}

struct MockOutput {
    line: u8,
    chip: MockChip,
}

impl OutputLine for MockOutput {
    fn write(&mut self, level: RawLevel) {
        let mut board = self.chip.board();
        board.levels.insert(self.line, level);
        board.writes.entry(self.line).or_default().push(level);
    }

    fn level(&self) -> RawLevel {
        self.chip.level(self.line)
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        self.chip.unclaim(self.line);
    }
}

/// Fuel gauge stand-in returning a settable word; `None` simulates a bus fault.
#[derive(Clone, Default)]
pub struct MockBus {
    word: Arc<Mutex<Option<u16>>>,
    reads: Arc<Mutex<Vec<u8>>>,
}

impl MockBus {
    pub fn new(word: Option<u16>) -> Self {
        MockBus {
            word: Arc::new(Mutex::new(word)),
            reads: Arc::default(),
        }
    }

    pub fn set_word(&self, word: Option<u16>) {
        *self.word.lock().unwrap_or_else(PoisonError::into_inner) = word;
    }

    /// Registers read so far, in order.
    pub fn reads(&self) -> Vec<u8> {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RegisterBus for MockBus {
    fn read_word(&mut self, register: u8) -> Result<u16, HalError> {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(register);
        self.word
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| HalError::Bus("no acknowledge".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_refused_until_drop() {
        let chip = MockChip::new();
        let first = chip.request_input(6).unwrap();
        assert!(matches!(chip.request_input(6), Err(HalError::LineBusy(6))));
        drop(first);
        assert!(chip.request_output(6, RawLevel::Low).is_ok());
    }

    #[test]
    fn output_records_initial_and_written_levels() {
        let chip = MockChip::new();
        let mut out = chip.request_output(26, RawLevel::Low).unwrap();
        out.write(RawLevel::High);
        out.write(RawLevel::Low);
        assert_eq!(
            chip.writes(26),
            vec![RawLevel::Low, RawLevel::High, RawLevel::Low]
        );
    }

    #[test]
    fn edges_reach_watcher_and_stop_after_drop() {
        let chip = MockChip::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut input = chip.request_input(6).unwrap();
        let sink_seen = seen.clone();
        input
            .watch(Box::new(move |ev| sink_seen.lock().unwrap().push(ev.direction)))
            .unwrap();

        chip.edge(6, EdgeDirection::Falling, Duration::from_millis(1));
        assert_eq!(input.read(), RawLevel::Low);
        drop(input);
        chip.edge(6, EdgeDirection::Rising, Duration::from_millis(2));

        assert_eq!(*seen.lock().unwrap(), vec![EdgeDirection::Falling]);
        assert!(!chip.is_watched(6));
    }

    #[test]
    fn bus_fault_is_reported() {
        let mut bus = MockBus::new(None);
        assert!(bus.read_word(0x02).is_err());
        bus.set_word(Some(0x1234));
        assert_eq!(bus.read_word(0x02).unwrap(), 0x1234);
        assert_eq!(bus.reads(), vec![0x02, 0x02]);
    }
}
