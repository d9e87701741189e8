//! Instrument hand-check
//!
//! Connects to the configured bench without a DUT: arm, one poll cycle, then
//! leave the load safe and disconnect. Useful for checking addresses and
//! buffer names before a long run.

use crate::config::Settings;
use crate::hardware::instruments::InstrumentSet;
use crate::measurement::MeasurementBundle;
use crate::session::{arm_instruments, poll_instruments, release_instruments, TeardownStep};

/// Result of a probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Meter status after the poll
    pub meter: String,
    /// Load status after the poll
    pub load: String,
    /// The readings taken
    pub bundle: MeasurementBundle,
    /// Release actions
    pub teardown: Vec<TeardownStep>,
}

/// Probe the instruments described by `settings`.
pub async fn probe(settings: &Settings) -> ProbeReport {
    let instruments = InstrumentSet::connect(settings).await;
    probe_instruments(instruments, settings).await
}

/// Probe an already connected set.
pub async fn probe_instruments(mut instruments: InstrumentSet, settings: &Settings) -> ProbeReport {
    arm_instruments(&mut instruments, settings).await;
    let bundle = poll_instruments(&mut instruments).await;
    tracing::info!(readings = %bundle, "Probe readings");

    let meter = instruments.meter.status();
    let load = instruments.load.status();
    let teardown = release_instruments(&instruments).await;
    ProbeReport {
        meter,
        load,
        bundle,
        teardown,
    }
}
