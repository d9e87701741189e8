//! Device-under-test line stream
//!
//! The session consumes the DUT's console one decoded line at a time through
//! [`LineSource`]. [`LineReader`] implements it over any async byte stream
//! (the serial port in production, `tokio_test::io::Mock` in tests) and
//! [`ScriptedLines`] replays a fixed script for session tests.
//!
//! # Behaviour
//! - `next_line` waits at most the given timeout; `Ok(None)` means "no event"
//! - Bytes are decoded as lossy UTF-8 and trimmed, so `\r\n` endings vanish
//! - Blank lines are reported as `Ok(None)` and never reach the session
//! - End of stream is fatal; a partial line at end of stream is dropped

use crate::config::SerialSettings;
use crate::error::StreamError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

/// A source of decoded DUT lines.
#[async_trait]
pub trait LineSource: Send {
    /// Wait for the next complete line.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a complete line or
    /// the line was blank. Errors are fatal to the session.
    async fn next_line(&mut self, timeout: Duration) -> Result<Option<String>, StreamError>;

    /// Release the underlying device.
    async fn close(&mut self) -> Result<(), StreamError>;

    /// Human readable name of the source, for logs.
    fn describe(&self) -> &str;
}

/// Line reader over an async byte stream.
pub struct LineReader<R> {
    reader: Option<BufReader<R>>,
    // Survives timeouts so a line split across two waits is not lost.
    pending: Vec<u8>,
    name: String,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    /// Wrap a byte stream.
    pub fn new(inner: R, name: impl Into<String>) -> Self {
        Self {
            reader: Some(BufReader::new(inner)),
            pending: Vec::new(),
            name: name.into(),
        }
    }

    fn decode(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    fn classify(&self, err: std::io::Error) -> StreamError {
        match err.kind() {
            ErrorKind::NotFound => StreamError::NotFound(self.name.clone()),
            ErrorKind::PermissionDenied => StreamError::PermissionDenied(self.name.clone()),
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => {
                StreamError::Disconnected(format!("{}: {}", self.name, err))
            }
            _ => StreamError::Transport(err),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LineSource for LineReader<R> {
    async fn next_line(&mut self, timeout: Duration) -> Result<Option<String>, StreamError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| StreamError::Disconnected(format!("{} is closed", self.name)))?;

        let read = tokio::time::timeout(timeout, reader.read_until(b'\n', &mut self.pending)).await;
        match read {
            Err(_) => Ok(None),
            Ok(Err(err)) => Err(self.classify(err)),
            Ok(Ok(0)) => {
                self.pending.clear();
                Err(StreamError::Disconnected(format!("{}: end of stream", self.name)))
            }
            Ok(Ok(_)) if !self.pending.ends_with(b"\n") => {
                tracing::debug!(
                    bytes = self.pending.len(),
                    "Discarding partial line at end of stream"
                );
                self.pending.clear();
                Err(StreamError::Disconnected(format!("{}: end of stream", self.name)))
            }
            Ok(Ok(_)) => Ok(self.decode()),
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        if self.reader.take().is_some() {
            tracing::debug!(source = %self.name, "Stream closed");
        }
        Ok(())
    }

    fn describe(&self) -> &str {
        &self.name
    }
}

/// Open the DUT serial port.
pub fn open_serial(settings: &SerialSettings) -> Result<LineReader<SerialStream>, StreamError> {
    let port = tokio_serial::new(&settings.port, settings.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(settings.read_timeout)
        .open_native_async()
        .map_err(|err| serial_error(&settings.port, err))?;

    tracing::info!(
        port = %settings.port,
        baud_rate = settings.baud_rate,
        "Serial stream opened"
    );
    Ok(LineReader::new(port, settings.port.clone()))
}

fn serial_error(port: &str, err: tokio_serial::Error) -> StreamError {
    match err.kind() {
        tokio_serial::ErrorKind::NoDevice | tokio_serial::ErrorKind::Io(ErrorKind::NotFound) => {
            StreamError::NotFound(port.to_string())
        }
        tokio_serial::ErrorKind::Io(ErrorKind::PermissionDenied) => {
            StreamError::PermissionDenied(port.to_string())
        }
        _ => StreamError::Transport(std::io::Error::from(err)),
    }
}

/// Serial ports visible to the host, with a short description of each.
pub fn available_ports() -> Result<Vec<(String, String)>, StreamError> {
    let ports = tokio_serial::available_ports().map_err(std::io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let kind = match port.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "unknown".to_string(),
            };
            (port.port_name, kind.trim().to_string())
        })
        .collect())
}

/// One step of a [`ScriptedLines`] replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptItem {
    /// A raw line as the device would send it, before trimming
    Line(String),
    /// The read timeout elapses with no data
    Silence,
    /// The device disappears
    Disconnect(String),
}

/// Replays a fixed script of stream events.
///
/// When the script runs out the stream reports a disconnect, like a DUT
/// that was unplugged after its last line.
pub struct ScriptedLines {
    script: VecDeque<ScriptItem>,
    consumed: usize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedLines {
    /// Replay the given items in order.
    pub fn new(script: impl IntoIterator<Item = ScriptItem>) -> Self {
        Self {
            script: script.into_iter().collect(),
            consumed: 0,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replay plain lines.
    pub fn from_lines<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self::new(lines.into_iter().map(|l| ScriptItem::Line(l.into())))
    }

    /// Counter of `close` calls, readable after the source is moved.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    /// Items handed out so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn next_line(&mut self, _timeout: Duration) -> Result<Option<String>, StreamError> {
        let item = self
            .script
            .pop_front()
            .ok_or_else(|| StreamError::Disconnected("script exhausted".into()))?;
        self.consumed += 1;
        match item {
            ScriptItem::Line(raw) => {
                let line = raw.trim();
                Ok((!line.is_empty()).then(|| line.to_string()))
            }
            ScriptItem::Silence => Ok(None),
            ScriptItem::Disconnect(reason) => Err(StreamError::Disconnected(reason)),
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> &str {
        "scripted"
    }
}
