//! Rohde & Schwarz NGL201 driver (Load role)
//!
//! Raw SCPI socket on port 5025. Limits are per channel and apply to the
//! channel selected with `INST:NSEL`, so every limit is preceded by a select.

use crate::config::LoadSettings;
use crate::error::InstrumentError;
use crate::hardware::capabilities::{Instrument, Load, Tone};
use crate::hardware::scpi::ScpiTransport;
use async_trait::async_trait;

/// Tone the load plays when it has been armed.
const ARMED_TONE: Tone = Tone::new(1000, 1.0);

/// Load driver generic over its transport.
pub struct Ngl201<T: ScpiTransport> {
    transport: T,
}

impl<T: ScpiTransport> Ngl201<T> {
    /// Wrap a connected transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn select(&self, channel: u8) -> Result<(), InstrumentError> {
        self.transport.send(&format!("INST:NSEL {}", channel)).await
    }

    /// Apply the current limit on a channel.
    pub async fn set_current(&self, channel: u8, amps: f64) -> Result<(), InstrumentError> {
        self.select(channel).await?;
        self.transport.send(&format!("CURR {}", amps)).await
    }

    /// Apply the voltage limit on a channel.
    pub async fn set_voltage(&self, channel: u8, volts: f64) -> Result<(), InstrumentError> {
        self.select(channel).await?;
        self.transport.send(&format!("VOLT {}", volts)).await
    }
}

#[async_trait]
impl<T: ScpiTransport> Instrument for Ngl201<T> {
    async fn beep(&self, tone: Tone) -> Result<(), InstrumentError> {
        self.transport
            .send(&format!(":SYST:BEEP {}, {}", tone.frequency_hz, tone.seconds))
            .await
    }

    async fn close(&self) -> Result<(), InstrumentError> {
        self.transport.close().await
    }
}

#[async_trait]
impl<T: ScpiTransport> Load for Ngl201<T> {
    async fn arm(&self, profile: &LoadSettings) -> Result<(), InstrumentError> {
        self.transport.send("*RST;*WAI").await?;
        self.transport.send("MEAS:STAT:RES").await?;
        self.set_output(false).await?;
        self.set_current(profile.channel, profile.current_limit).await?;
        self.set_voltage(profile.channel, profile.voltage_limit).await?;
        if profile.output_on_arm {
            self.set_output(true).await?;
        }
        self.beep(ARMED_TONE).await?;
        tracing::info!(
            channel = profile.channel,
            voltage_limit = profile.voltage_limit,
            current_limit = profile.current_limit,
            output = profile.output_on_arm,
            "Load armed"
        );
        Ok(())
    }

    async fn set_output(&self, enabled: bool) -> Result<(), InstrumentError> {
        let command = if enabled { ":OUTP ON" } else { ":OUTP OFF" };
        self.transport.send(command).await
    }

    async fn query_current(&self) -> Result<String, InstrumentError> {
        self.transport.query("MEAS:CURR?").await
    }

    async fn query_power(&self) -> Result<String, InstrumentError> {
        self.transport.query("MEAS:POW?").await
    }
}
