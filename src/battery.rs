// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Battery telemetry from the fuel gauge's cell-voltage register.
//!
//! The gauge sits on a single cell of the 2S pack, so its voltage is doubled
//! and the state of charge comes from a discharge-curve table for the pack
//! rather than from the gauge's own (single-cell) estimate.

use log::{debug, warn};

use crate::board::REG_VCELL;
use crate::error::{Result, UpsError};
use crate::hal::RegisterBus;

/// Microvolts per count of the VCELL register.
pub const VCELL_MICROVOLTS_PER_COUNT: f64 = 78.125;

/// Number of series cells in the pack.
pub const PACK_CELLS: f64 = 2.0;

/// Pack voltage to state of charge, highest first.
pub const DISCHARGE_CURVE: [(f64, u8); 6] = [
    (8.4, 100),
    (8.2, 90),
    (7.8, 70),
    (7.4, 50),
    (7.0, 20),
    (6.6, 5),
];

/// First breakpoint the voltage meets or exceeds; 0 below the table.
pub fn voltage_to_percentage(pack_voltage: f64) -> u8 {
    DISCHARGE_CURVE
        .iter()
        .find(|(volts, _)| pack_voltage >= *volts)
        .map_or(0, |&(_, percent)| percent)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatteryReading {
    /// Register count after byte-order normalisation.
    pub raw_register_value: u16,
    pub cell_voltage: f64,
    pub pack_voltage: f64,
    pub percentage: u8,
}

impl BatteryReading {
    pub fn from_raw(raw: u16) -> Self {
        let cell_voltage = f64::from(raw) * VCELL_MICROVOLTS_PER_COUNT / 1_000_000.0;
        let pack_voltage = cell_voltage * PACK_CELLS;
        BatteryReading {
            raw_register_value: raw,
            cell_voltage,
            pack_voltage,
            percentage: voltage_to_percentage(pack_voltage),
        }
    }

    /// Builds a reading from the word as the SMBus returned it.
    pub fn from_bus_word(word: u16) -> Self {
        Self::from_raw(word.swap_bytes())
    }

    /// Pack voltage rounded to millivolts, as reported to the host.
    pub fn display_voltage(&self) -> f64 {
        (self.pack_voltage * 1000.0).round() / 1000.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Telemetry {
    Reading(BatteryReading),
    /// Nothing could be read this cycle; show "unknown".
    Unavailable,
}

impl Telemetry {
    pub fn reading(&self) -> Option<&BatteryReading> {
        match self {
            Telemetry::Reading(reading) => Some(reading),
            Telemetry::Unavailable => None,
        }
    }
}

pub struct BatteryTelemetryReader {
    bus: Box<dyn RegisterBus>,
    failures: u32,
}

impl BatteryTelemetryReader {
    pub fn new(bus: Box<dyn RegisterBus>) -> Self {
        BatteryTelemetryReader { bus, failures: 0 }
    }

    /// Reads and converts the cell-voltage register.
    pub fn read(&mut self) -> Result<BatteryReading> {
        let word = self
            .bus
            .read_word(REG_VCELL)
            .map_err(|e| UpsError::ReadFailure(e.to_string()))?;
        Ok(BatteryReading::from_bus_word(word))
    }

    /// Reads the gauge once. A [`UpsError::ReadFailure`] becomes
    /// [`Telemetry::Unavailable`].
    pub fn read_once(&mut self) -> Telemetry {
        match self.read() {
            Ok(reading) => {
                if self.failures > 0 {
                    debug!("Battery telemetry recovered after {} failed reads", self.failures);
                    self.failures = 0;
                }
                debug!(
                    "VCELL raw=0x{:04X} cell={:.3}V pack={:.3}V soc={}%",
                    reading.raw_register_value,
                    reading.cell_voltage,
                    reading.pack_voltage,
                    reading.percentage
                );
                Telemetry::Reading(reading)
            }
            Err(e) => {
                self.failures += 1;
                if self.failures == 1 {
                    warn!("Error reading battery voltage: {}", e);
                } else {
                    debug!("Battery voltage still unavailable ({} reads): {}", self.failures, e);
                }
                Telemetry::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockBus;

    #[test]
    fn table_breakpoints() {
        assert_eq!(voltage_to_percentage(8.4), 100);
        assert_eq!(voltage_to_percentage(8.2), 90);
        assert_eq!(voltage_to_percentage(7.8), 70);
        assert_eq!(voltage_to_percentage(7.4), 50);
        assert_eq!(voltage_to_percentage(7.0), 20);
        assert_eq!(voltage_to_percentage(6.6), 5);
        assert_eq!(voltage_to_percentage(6.5), 0);
        assert_eq!(voltage_to_percentage(9.0), 100);
        assert_eq!(voltage_to_percentage(0.0), 0);
    }

    #[test]
    fn tiny_register_value_is_empty() {
        let reading = BatteryReading::from_raw(0x0200);
        assert!((reading.cell_voltage - 0.04).abs() < 1e-12);
        assert!((reading.pack_voltage - 0.08).abs() < 1e-12);
        assert_eq!(reading.percentage, 0);
    }

    #[test]
    fn full_pack_reads_hundred() {
        // 4.2 V per cell
        let reading = BatteryReading::from_raw(53_760);
        assert_eq!(reading.pack_voltage, 8.4);
        assert_eq!(reading.percentage, 100);
    }

    #[test]
    fn bus_word_is_byte_swapped() {
        let reading = BatteryReading::from_bus_word(0x0002);
        assert_eq!(reading.raw_register_value, 0x0200);
    }

    #[test]
    fn display_voltage_rounds_to_millivolts() {
        // 50_000 counts = 3.90625 V per cell
        let reading = BatteryReading::from_raw(50_000);
        assert_eq!(reading.display_voltage(), 7.813);
    }

    #[test]
    fn read_failure_is_unavailable_then_recovers() {
        let bus = MockBus::new(None);
        let mut reader = BatteryTelemetryReader::new(Box::new(bus.clone()));
        assert_eq!(reader.read_once(), Telemetry::Unavailable);
        assert_eq!(reader.read_once(), Telemetry::Unavailable);

        bus.set_word(Some(0x00D2));
        let telemetry = reader.read_once();
        let reading = telemetry.reading().unwrap();
        assert_eq!(reading.raw_register_value, 0xD200);
        assert_eq!(reading.percentage, 100);
        assert_eq!(bus.reads(), vec![REG_VCELL; 3]);
    }

    #[test]
    fn bus_error_is_a_read_failure() {
        let mut reader = BatteryTelemetryReader::new(Box::new(MockBus::new(None)));
        assert!(matches!(reader.read(), Err(UpsError::ReadFailure(_))));
    }
}
