// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Electrical and logical signal levels, and the edge records produced by input lines.

use std::fmt;
use std::time::Duration;

/// Electrical level of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RawLevel {
    High,
    Low,
}

impl RawLevel {
    pub fn inverted(self) -> Self {
        match self {
            RawLevel::High => RawLevel::Low,
            RawLevel::Low => RawLevel::High,
        }
    }
}

/// Level as seen by the rest of the daemon, after polarity is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalLevel {
    Active,
    Inactive,
}

impl LogicalLevel {
    pub fn is_active(self) -> bool {
        self == LogicalLevel::Active
    }
}

impl From<bool> for LogicalLevel {
    fn from(active: bool) -> Self {
        if active {
            LogicalLevel::Active
        } else {
            LogicalLevel::Inactive
        }
    }
}

impl fmt::Display for LogicalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalLevel::Active => f.write_str("active"),
            LogicalLevel::Inactive => f.write_str("inactive"),
        }
    }
}

/// Which electrical level counts as `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    pub fn from_active_low(active_low: bool) -> Self {
        if active_low {
            Polarity::ActiveLow
        } else {
            Polarity::ActiveHigh
        }
    }

    /// `Active` iff `(raw == High) XOR (polarity == ActiveLow)`.
    pub fn resolve(self, raw: RawLevel) -> LogicalLevel {
        LogicalLevel::from((raw == RawLevel::High) ^ (self == Polarity::ActiveLow))
    }

    /// Electrical level that produces `level` under this polarity.
    pub fn drive(self, level: LogicalLevel) -> RawLevel {
        let raw = if level.is_active() {
            RawLevel::High
        } else {
            RawLevel::Low
        };
        match self {
            Polarity::ActiveHigh => raw,
            Polarity::ActiveLow => raw.inverted(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeDirection {
    Rising,
    Falling,
}

impl EdgeDirection {
    /// Level the line settled at after this edge.
    pub fn level_after(self) -> RawLevel {
        match self {
            EdgeDirection::Rising => RawLevel::High,
            EdgeDirection::Falling => RawLevel::Low,
        }
    }
}

/// One hardware edge. `timestamp` is monotonic, from an arbitrary epoch shared
/// by all events of the same line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    pub line: u8,
    pub direction: EdgeDirection,
    pub timestamp: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_resolution_truth_table() {
        assert_eq!(Polarity::ActiveHigh.resolve(RawLevel::High), LogicalLevel::Active);
        assert_eq!(Polarity::ActiveHigh.resolve(RawLevel::Low), LogicalLevel::Inactive);
        assert_eq!(Polarity::ActiveLow.resolve(RawLevel::High), LogicalLevel::Inactive);
        assert_eq!(Polarity::ActiveLow.resolve(RawLevel::Low), LogicalLevel::Active);
    }

    #[test]
    fn drive_is_inverse_of_resolve() {
        for polarity in [Polarity::ActiveHigh, Polarity::ActiveLow] {
            for level in [LogicalLevel::Active, LogicalLevel::Inactive] {
                assert_eq!(polarity.resolve(polarity.drive(level)), level);
            }
        }
    }

    #[test]
    fn edge_direction_maps_to_settled_level() {
        assert_eq!(EdgeDirection::Rising.level_after(), RawLevel::High);
        assert_eq!(EdgeDirection::Falling.level_after(), RawLevel::Low);
    }
}
