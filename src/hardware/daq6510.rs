//! Keithley DAQ6510 driver (Meter role)
//!
//! Protocol Overview:
//! - Raw SCPI socket on port 5025, LF terminated
//! - Readings are taken into named reading buffers: `MEAS:VOLT? "<buf>", READ`
//! - `defbuffer1` / `defbuffer2` always exist and can only be cleared; any
//!   other buffer is deleted and re-created on arm
//!
//! Deleting a buffer that does not exist yet queues an error on the
//! instrument but produces no response. `*CLS` at the end of arming empties
//! the queue again, which is what makes repeated arming harmless.

use crate::config::MeterSettings;
use crate::error::InstrumentError;
use crate::hardware::capabilities::{Instrument, Meter, Tone, ARMED_TONES};
use crate::hardware::scpi::ScpiTransport;
use async_trait::async_trait;

/// Buffers built into the instrument.
const DEFAULT_BUFFERS: [&str; 2] = ["defbuffer1", "defbuffer2"];

/// Meter driver generic over its transport.
pub struct Daq6510<T: ScpiTransport> {
    transport: T,
    voltage_buffer: String,
    current_buffer: String,
}

impl<T: ScpiTransport> Daq6510<T> {
    /// Wrap a connected transport.
    ///
    /// The buffer names come from the profile so queries work even if `arm`
    /// is never called (e.g. when the instrument was armed by a previous run).
    pub fn new(transport: T, profile: &MeterSettings) -> Self {
        Self {
            transport,
            voltage_buffer: profile.voltage_buffer.clone(),
            current_buffer: profile.current_buffer.clone(),
        }
    }

    /// The command sequence `arm` sends for a profile.
    pub fn arm_commands(profile: &MeterSettings) -> Vec<String> {
        let mut commands = vec![
            format!(":SENS:VOLT:RANG {}", profile.voltage_range),
            format!(":SENS:CURR:RANG {}", profile.current_range),
        ];

        for buffer in [&profile.voltage_buffer, &profile.current_buffer] {
            if DEFAULT_BUFFERS.contains(&buffer.as_str()) {
                commands.push(format!(":TRAC:CLE '{}'", buffer));
            } else {
                commands.push(format!(":TRAC:DEL '{}'", buffer));
                commands.push(format!(
                    "TRAC:MAKE \"{}\", {}",
                    buffer, profile.buffer_capacity
                ));
            }
        }

        commands.push("*CLS".to_string());
        commands
    }
}

#[async_trait]
impl<T: ScpiTransport> Instrument for Daq6510<T> {
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
impl<T: ScpiTransport> Meter for Daq6510<T> {
    async fn arm(&self, profile: &MeterSettings) -> Result<(), InstrumentError> {
        for command in Self::arm_commands(profile) {
            self.transport.send(&command).await?;
        }
        for tone in ARMED_TONES {
            self.beep(tone).await?;
        }
        tracing::info!(
            voltage_range = profile.voltage_range,
            current_range = profile.current_range,
            "Meter armed"
        );
        Ok(())
    }

    async fn query_voltage(&self) -> Result<String, InstrumentError> {
        self.transport
            .query(&format!("MEAS:VOLT? \"{}\", READ", self.voltage_buffer))
            .await
    }

    async fn query_current(&self) -> Result<String, InstrumentError> {
        self.transport
            .query(&format!("MEAS:CURR? \"{}\", READ", self.current_buffer))
            .await
    }
}
