//! Session driver
//!
//! Owns the instrument set, the DUT stream and the log writer for one run:
//!
//! 1. connect and arm whatever instruments answer
//! 2. create the log file and open the stream
//! 3. read, evaluate, poll and write one line at a time until the terminal
//!    marker, a fatal stream error or an interrupt
//! 4. release everything, in a fixed order, exactly once
//!
//! Instrument failures never stop the loop. They turn into `-1` readings,
//! and a lost connection degrades that instrument for the rest of the run.

use crate::config::Settings;
use crate::error::{InstrumentError, InstrumentRole, LoggerResult};
use crate::hardware::capabilities::{Instrument, Load, Meter, COMPLETE_TONES, SETUP_TONE};
use crate::hardware::instruments::InstrumentSet;
use crate::log_writer::CorrelatedLogWriter;
use crate::markers::{Marker, MarkerMachine};
use crate::measurement::{MeasurementBundle, Reading};
use crate::stream::{self, LineSource};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop request, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// A signal that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trigger the signal on Ctrl-C.
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Interrupt received, stopping after the current line");
                    signal.trigger();
                }
                Err(err) => tracing::error!(error = %err, "Unable to listen for Ctrl-C"),
            }
        })
    }
}

/// How the read loop ended, when it ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The terminal marker was seen
    Completed,
    /// A stop was requested
    Interrupted,
}

/// One release action of the teardown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    /// What was released
    pub action: &'static str,
    /// Failure message, if the release failed
    pub error: Option<String>,
}

impl TeardownStep {
    fn record<E: fmt::Display>(action: &'static str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => {
                tracing::info!(action, "Teardown step done");
                Self {
                    action,
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(action, error = %err, "Teardown step failed");
                Self {
                    action,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Whether the release succeeded.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// How the loop ended
    pub outcome: SessionOutcome,
    /// Non-empty lines consumed
    pub lines: u64,
    /// Records written
    pub records: u64,
    /// Records carrying readings
    pub correlated: u64,
    /// Readings of the most recent poll
    pub last_bundle: Option<MeasurementBundle>,
    /// Log file written, when the log is backed by a file
    pub log_path: Option<PathBuf>,
    /// Release actions, in the order they ran
    pub teardown: Vec<TeardownStep>,
}

#[derive(Debug, Clone, Copy)]
enum Query {
    MeterVoltage,
    MeterCurrent,
    LoadCurrent,
    LoadPower,
}

impl Query {
    fn role(self) -> InstrumentRole {
        match self {
            Query::MeterVoltage | Query::MeterCurrent => InstrumentRole::Meter,
            Query::LoadCurrent | Query::LoadPower => InstrumentRole::Load,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::MeterVoltage => f.write_str("meter voltage"),
            Query::MeterCurrent => f.write_str("meter current"),
            Query::LoadCurrent => f.write_str("load current"),
            Query::LoadPower => f.write_str("load power"),
        }
    }
}

/// One logging session over a line source and a log writer.
pub struct Session<S: LineSource, W: Write> {
    settings: Settings,
    instruments: InstrumentSet,
    source: S,
    writer: CorrelatedLogWriter<W>,
    machine: MarkerMachine,
    shutdown: ShutdownSignal,
    lines: u64,
    last_bundle: Option<MeasurementBundle>,
}

impl<S: LineSource, W: Write> Session<S, W> {
    /// Assemble a session from prepared parts.
    pub fn new(
        settings: Settings,
        instruments: InstrumentSet,
        source: S,
        writer: CorrelatedLogWriter<W>,
    ) -> Self {
        let machine = MarkerMachine::new(&settings.markers);
        Self {
            settings,
            instruments,
            source,
            writer,
            machine,
            shutdown: ShutdownSignal::new(),
            lines: 0,
            last_bundle: None,
        }
    }

    /// Stop at the next loop iteration once `signal` is triggered.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    /// Run until the terminal marker, an interrupt or a fatal error.
    ///
    /// Teardown runs on every path before this returns. Stream and log file
    /// errors are returned after teardown.
    pub async fn run(mut self) -> LoggerResult<SessionReport> {
        tracing::info!(
            source = self.source.describe(),
            meter = %self.instruments.meter.status(),
            load = %self.instruments.load.status(),
            "Session started"
        );

        let result = self.drive().await;
        if let Err(err) = &result {
            tracing::error!(error = %err, line = ?self.machine.counter(), "Session aborted");
        }
        let teardown = self.teardown().await;
        let outcome = result?;

        let report = SessionReport {
            outcome,
            lines: self.lines,
            records: self.writer.records(),
            correlated: self.writer.correlated(),
            last_bundle: self.last_bundle,
            log_path: self.writer.path().map(Path::to_path_buf),
            teardown,
        };
        tracing::info!(
            outcome = ?report.outcome,
            lines = report.lines,
            records = report.records,
            correlated = report.correlated,
            "Session finished"
        );
        Ok(report)
    }

    async fn drive(&mut self) -> LoggerResult<SessionOutcome> {
        let read_timeout = self.settings.serial.read_timeout;
        loop {
            if self.shutdown.is_triggered() {
                return Ok(SessionOutcome::Interrupted);
            }
            let Some(line) = self.source.next_line(read_timeout).await? else {
                continue;
            };
            self.lines += 1;
            if self.settings.log.echo {
                tracing::info!(target: "dut", "{}", line);
            }

            let step = self.machine.advance(&line);
            if let Some(marker) = step.marker {
                tracing::info!(%marker, line = step.index, "Marker detected");
                self.on_marker(marker).await;
            }

            let bundle = if step.poll_due() {
                tracing::debug!(line = step.index, due = ?step.due, "Polling instruments");
                let bundle = poll_instruments(&mut self.instruments).await;
                self.last_bundle = Some(bundle.clone());
                Some(bundle)
            } else {
                None
            };
            self.writer.write(&line, bundle.as_ref())?;

            if self.machine.is_terminated() {
                return Ok(SessionOutcome::Completed);
            }
        }
    }

    async fn on_marker(&mut self, marker: Marker) {
        let acknowledge = self.settings.markers.acknowledge;
        match marker {
            Marker::SetupComplete if acknowledge => {
                if let Some(load) = self.instruments.load.usable() {
                    let result = load.beep(SETUP_TONE).await;
                    self.settle_action(InstrumentRole::Load, "setup tone", result);
                }
            }
            Marker::SetupComplete => {}
            Marker::Countdown => self.cycle_load().await,
            Marker::TestComplete if acknowledge => {
                for tone in COMPLETE_TONES {
                    let Some(meter) = self.instruments.meter.usable() else {
                        break;
                    };
                    let result = meter.beep(tone).await;
                    self.settle_action(InstrumentRole::Meter, "completion tone", result);
                }
            }
            Marker::TestComplete => {}
        }
    }

    /// Off, pause, on: a clean transient baseline for the VI curve.
    async fn cycle_load(&mut self) {
        let Some(load) = self.instruments.load.usable() else {
            tracing::debug!("No load present, skipping output cycle");
            return;
        };
        let result = load.set_output(false).await;
        if !self.settle_action(InstrumentRole::Load, "load output off", result) {
            return;
        }
        tokio::time::sleep(self.settings.markers.load_cycle_delay).await;
        if let Some(load) = self.instruments.load.usable() {
            let result = load.set_output(true).await;
            self.settle_action(InstrumentRole::Load, "load output on", result);
        }
    }

    fn settle_action(
        &mut self,
        role: InstrumentRole,
        action: &'static str,
        result: Result<(), InstrumentError>,
    ) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%role, action, error = %err, "Instrument action failed");
                self.instruments.note_failure(role, &err);
                false
            }
        }
    }

    async fn teardown(&mut self) -> Vec<TeardownStep> {
        let mut steps = release_instruments(&self.instruments).await;
        steps.push(TeardownStep::record(
            "close stream",
            self.source.close().await,
        ));
        steps
    }
}

/// One poll cycle in the fixed field order.
///
/// Missing or failing instruments yield unavailable readings; a lost
/// connection degrades the instrument before the next field is read.
pub async fn poll_instruments(instruments: &mut InstrumentSet) -> MeasurementBundle {
    MeasurementBundle {
        meter_voltage: read(instruments, Query::MeterVoltage).await,
        meter_current: read(instruments, Query::MeterCurrent).await,
        load_current: read(instruments, Query::LoadCurrent).await,
        load_power: read(instruments, Query::LoadPower).await,
    }
}

async fn read(instruments: &mut InstrumentSet, query: Query) -> Reading {
    let result = match query {
        Query::MeterVoltage | Query::MeterCurrent => {
            let Some(meter) = instruments.meter.usable() else {
                return Reading::Unavailable;
            };
            if matches!(query, Query::MeterVoltage) {
                meter.query_voltage().await
            } else {
                meter.query_current().await
            }
        }
        Query::LoadCurrent | Query::LoadPower => {
            let Some(load) = instruments.load.usable() else {
                return Reading::Unavailable;
            };
            if matches!(query, Query::LoadCurrent) {
                load.query_current().await
            } else {
                load.query_power().await
            }
        }
    };

    match result {
        Ok(raw) => Reading::from_response(&raw),
        Err(err) => {
            tracing::warn!(reading = %query, error = %err, "Reading unavailable");
            instruments.note_failure(query.role(), &err);
            Reading::Unavailable
        }
    }
}

/// Best-effort release: load output off, load closed, meter closed.
///
/// Degraded instruments are still attempted; every step runs regardless of
/// earlier failures.
pub async fn release_instruments(instruments: &InstrumentSet) -> Vec<TeardownStep> {
    let mut steps = Vec::new();
    if let Some(load) = instruments.load.handle() {
        steps.push(TeardownStep::record(
            "disable load output",
            load.set_output(false).await,
        ));
        steps.push(TeardownStep::record("close load", load.close().await));
    }
    if let Some(meter) = instruments.meter.handle() {
        steps.push(TeardownStep::record("close meter", meter.close().await));
    }
    steps
}

/// Arm every present instrument and wait for each to settle.
///
/// Failures are logged; an instrument whose connection drops while arming
/// is degraded.
pub async fn arm_instruments(instruments: &mut InstrumentSet, settings: &Settings) {
    if let Some(meter) = instruments.meter.usable() {
        match meter.arm(&settings.meter).await {
            Ok(()) => tokio::time::sleep(settings.meter.settle).await,
            Err(err) => {
                tracing::warn!(error = %err, "Meter arm failed");
                instruments.note_failure(InstrumentRole::Meter, &err);
            }
        }
    }
    if let Some(load) = instruments.load.usable() {
        match load.arm(&settings.load).await {
            Ok(()) => tokio::time::sleep(settings.load.settle).await,
            Err(err) => {
                tracing::warn!(error = %err, "Load arm failed");
                instruments.note_failure(InstrumentRole::Load, &err);
            }
        }
    }
}

/// Run a full session against the configured bench and serial port.
pub async fn run(settings: Settings, shutdown: ShutdownSignal) -> LoggerResult<SessionReport> {
    let mut instruments = InstrumentSet::connect(&settings).await;
    arm_instruments(&mut instruments, &settings).await;

    let path = settings.log.resolved_path();
    let writer = match CorrelatedLogWriter::create(&path) {
        Ok(writer) => writer,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "Unable to create log file");
            release_instruments(&instruments).await;
            return Err(err.into());
        }
    };
    let source = match stream::open_serial(&settings.serial) {
        Ok(source) => source,
        Err(err) => {
            tracing::error!(
                port = %settings.serial.port,
                error = %err,
                "Unable to open serial stream"
            );
            release_instruments(&instruments).await;
            return Err(err.into());
        }
    };

    Session::new(settings, instruments, source, writer)
        .with_shutdown(shutdown)
        .run()
        .await
}
