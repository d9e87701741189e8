//! Measurement bundle captured at one poll instant.

use std::fmt;

/// Text the log carries for a reading that could not be taken.
pub const UNAVAILABLE: &str = "-1";

/// One instrument reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    /// Raw textual payload returned by the instrument.
    Value(String),
    /// Instrument absent, degraded, or the query failed.
    Unavailable,
}

impl Reading {
    /// Build a reading from a trimmed raw response.
    ///
    /// An empty response carries no value and counts as unavailable.
    pub fn from_response(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Reading::Unavailable
        } else {
            Reading::Value(trimmed.to_string())
        }
    }

    /// Whether the instrument answered.
    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value(_))
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Value(value) => f.write_str(value),
            Reading::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

/// The four readings of a poll cycle, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementBundle {
    /// Meter voltage
    pub meter_voltage: Reading,
    /// Meter current
    pub meter_current: Reading,
    /// Load current
    pub load_current: Reading,
    /// Load power
    pub load_power: Reading,
}

impl MeasurementBundle {
    /// A bundle with every field unavailable.
    pub fn unavailable() -> Self {
        Self {
            meter_voltage: Reading::Unavailable,
            meter_current: Reading::Unavailable,
            load_current: Reading::Unavailable,
            load_power: Reading::Unavailable,
        }
    }

    /// Fields in the fixed order they are appended to a record.
    pub fn fields(&self) -> [&Reading; 4] {
        [
            &self.meter_voltage,
            &self.meter_current,
            &self.load_current,
            &self.load_power,
        ]
    }
}

impl fmt::Display for MeasurementBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [v, i, load_i, load_p] = self.fields();
        write!(f, "{},{},{},{}", v, i, load_i, load_p)
    }
}
