//! Instrument Capability Facade
//!
//! The session only ever talks to the bench through these two role traits.
//! They say nothing about the transport; the drivers in [`daq6510`] and
//! [`ngl201`] implement them over any [`ScpiTransport`].
//!
//! # Contract
//! - Every call performs I/O and may block up to the transport timeout
//! - Nothing is retried; failures surface as [`InstrumentError`]
//! - Query results are the raw textual payload; parsing is the consumer's job
//! - `arm` is idempotent: arming twice leaves the same configured state
//!
//! [`daq6510`]: super::daq6510
//! [`ngl201`]: super::ngl201
//! [`ScpiTransport`]: super::scpi::ScpiTransport

use crate::config::{LoadSettings, MeterSettings};
use crate::error::InstrumentError;
use async_trait::async_trait;

/// A single beeper tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    /// Frequency in Hz
    pub frequency_hz: u32,
    /// Duration in seconds
    pub seconds: f64,
}

impl Tone {
    /// Create a tone.
    pub const fn new(frequency_hz: u32, seconds: f64) -> Self {
        Self {
            frequency_hz,
            seconds,
        }
    }
}

/// Tones played by the meter when it has been armed.
pub const ARMED_TONES: [Tone; 5] = [
    Tone::new(1000, 0.1),
    Tone::new(2000, 0.1),
    Tone::new(3000, 0.1),
    Tone::new(2000, 0.1),
    Tone::new(1000, 0.1),
];

/// Tone played by the load when the DUT reports setup complete.
pub const SETUP_TONE: Tone = Tone::new(1000, 0.2);

/// Tones played by the meter when the DUT reports test complete.
pub const COMPLETE_TONES: [Tone; 5] = [
    Tone::new(1000, 0.2),
    Tone::new(1500, 0.2),
    Tone::new(2000, 0.2),
    Tone::new(1500, 0.2),
    Tone::new(1000, 0.2),
];

/// Behaviour shared by both roles.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Sound a tone on the instrument's beeper.
    async fn beep(&self, tone: Tone) -> Result<(), InstrumentError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), InstrumentError>;
}

/// Capability: precision voltage/current measurement into named buffers.
#[async_trait]
pub trait Meter: Instrument {
    /// Configure ranges and reading buffers.
    async fn arm(&self, profile: &MeterSettings) -> Result<(), InstrumentError>;

    /// Take a voltage reading; returns the raw response.
    async fn query_voltage(&self) -> Result<String, InstrumentError>;

    /// Take a current reading; returns the raw response.
    async fn query_current(&self) -> Result<String, InstrumentError>;
}

/// Capability: programmable electronic load.
#[async_trait]
pub trait Load: Instrument {
    /// Reset to a known state and apply the voltage/current limits.
    async fn arm(&self, profile: &LoadSettings) -> Result<(), InstrumentError>;

    /// Enable or disable the output.
    async fn set_output(&self, enabled: bool) -> Result<(), InstrumentError>;

    /// Read the live current; returns the raw response.
    async fn query_current(&self) -> Result<String, InstrumentError>;

    /// Read the live power; returns the raw response.
    async fn query_power(&self) -> Result<String, InstrumentError>;

    /// Leave the load safe: output off, then disconnect.
    ///
    /// The disconnect is attempted even if disabling the output failed; the
    /// first error is returned.
    async fn shutdown(&self) -> Result<(), InstrumentError> {
        let output = self.set_output(false).await;
        let closed = self.close().await;
        output.and(closed)
    }
}
