//! # Bench Logger Core Library
//!
//! Reads the console of a device under test line by line, watches for the
//! sentinel markers it prints at phase transitions, and polls the bench
//! instruments (a Keithley DAQ6510 meter and an R&S NGL201 electronic load)
//! when a measurement window opens. Every line is written to a log file,
//! with the readings appended to the lines that triggered a poll.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered settings (defaults, TOML file, environment).
//! - **`error`**: the error taxonomy shared by every module.
//! - **`hardware`**: SCPI transport, the Meter/Load capability traits, the
//!   two drivers, and a scripted mock transport.
//! - **`stream`**: the DUT line source (serial port or scripted).
//! - **`markers`**: the marker state machine that schedules polls.
//! - **`measurement`**: readings and the four-field bundle.
//! - **`log_writer`**: the flushed, one-record-per-line log.
//! - **`session`**: ties it all together and guarantees teardown.
//! - **`probe`**: one-shot instrument check without a DUT.
//! - **`tracing_setup`**: console logging.

pub mod config;
pub mod error;
pub mod hardware;
pub mod log_writer;
pub mod markers;
pub mod measurement;
pub mod probe;
pub mod session;
pub mod stream;
pub mod tracing_setup;

pub use config::Settings;
pub use error::{LoggerError, LoggerResult};
pub use session::{Session, SessionOutcome, SessionReport, ShutdownSignal};
