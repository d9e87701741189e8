//! Mock SCPI transport
//!
//! Simulates an instrument socket for testing the drivers and the session
//! without bench hardware:
//! - Scripted responses per query string
//! - Timeout and connection-loss injection per query
//! - A shared call log for asserting the exact command sequence
//!
//! # Example
//!
//! ```
//! use bench_logger::hardware::mock::MockScpi;
//! use bench_logger::hardware::scpi::ScpiTransport;
//!
//! # tokio_test::block_on(async {
//! let mock = MockScpi::new().with_response("MEAS:POW?", "2.0");
//! assert_eq!(mock.query("MEAS:POW?").await.unwrap(), "2.0");
//! assert_eq!(mock.call_log(), vec!["MEAS:POW?".to_string()]);
//! # })
//! ```

use crate::error::InstrumentError;
use crate::hardware::scpi::ScpiTransport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Call-log entry recorded when a mock connection is closed.
pub const CLOSE_ENTRY: &str = "<close>";

/// Injected failure for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The instrument never answers
    Timeout,
    /// The socket drops
    ConnectionLost,
}

#[derive(Default)]
struct MockState {
    responses: HashMap<String, String>,
    faults: HashMap<String, Fault>,
    calls: Vec<String>,
}

/// Scripted SCPI transport.
///
/// Clones share state, so a test can keep a handle for inspection after
/// handing another to a driver.
#[derive(Clone)]
pub struct MockScpi {
    state: Arc<Mutex<MockState>>,
    connected: Arc<AtomicBool>,
}

impl Default for MockScpi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScpi {
    /// Create a connected mock with no scripted responses.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Script the answer to a query.
    pub fn with_response(self, query: &str, response: &str) -> Self {
        self.set_response(query, response);
        self
    }

    /// Script the answer to a query on an existing mock.
    pub fn set_response(&self, query: &str, response: &str) {
        self.lock()
            .responses
            .insert(query.to_string(), response.to_string());
    }

    /// Make a query fail.
    pub fn inject_fault(&self, query: &str, fault: Fault) {
        self.lock().faults.insert(query.to_string(), fault);
    }

    /// Every command and query received, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of times a given command or query was received.
    pub fn count(&self, command: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == command).count()
    }

    /// Forget the call log.
    pub fn clear_call_log(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A test that panicked mid-call leaves usable state behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, command: &str) -> Result<(), InstrumentError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(InstrumentError::NotConnected);
        }
        self.lock().calls.push(command.to_string());
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for MockScpi {
    async fn send(&self, command: &str) -> Result<(), InstrumentError> {
        self.record(command)
    }

    async fn query(&self, query: &str) -> Result<String, InstrumentError> {
        self.record(query)?;
        let state = self.lock();
        match state.faults.get(query) {
            Some(Fault::Timeout) => Err(InstrumentError::Timeout {
                command: query.to_string(),
                after: Duration::from_secs(2),
            }),
            Some(Fault::ConnectionLost) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(InstrumentError::ConnectionLost("mock socket dropped".into()))
            }
            None => state.responses.get(query).cloned().ok_or_else(|| {
                InstrumentError::Timeout {
                    command: query.to_string(),
                    after: Duration::from_secs(2),
                }
            }),
        }
    }

    async fn close(&self) -> Result<(), InstrumentError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(InstrumentError::NotConnected);
        }
        self.lock().calls.push(CLOSE_ENTRY.to_string());
        Ok(())
    }
}
