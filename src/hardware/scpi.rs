//! SCPI over TCP communication
//!
//! Both bench instruments expose a raw SCPI socket (port 5025). Commands are
//! newline terminated; queries answer with a single newline-terminated line.
//! The [`ScpiTransport`] trait is the seam the instrument drivers are written
//! against, so they can run over [`TcpScpiClient`] on the bench and over
//! [`MockScpi`](super::mock::MockScpi) in tests.

use crate::error::{InstrumentError, InstrumentRole};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default raw SCPI socket port
pub const DEFAULT_PORT: u16 = 5025;

/// Transport capable of carrying SCPI commands and queries.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command without expecting a response.
    async fn send(&self, command: &str) -> Result<(), InstrumentError>;

    /// Send a query and return the trimmed response line.
    async fn query(&self, query: &str) -> Result<String, InstrumentError>;

    /// Close the connection. Further calls fail with `NotConnected`.
    async fn close(&self) -> Result<(), InstrumentError>;
}

/// Async SCPI client over a raw TCP socket
pub struct TcpScpiClient {
    stream: Mutex<Option<BufReader<TcpStream>>>,
    timeout: Duration,
    address: String,
}

impl TcpScpiClient {
    /// Connect to an instrument.
    ///
    /// `timeout` bounds both the connect attempt and every later query.
    pub async fn connect(
        role: InstrumentRole,
        host: &str,
        port: u16,
        timeout_after: Duration,
    ) -> Result<Self, InstrumentError> {
        let address = format!("{}:{}", host, port);
        let connect_error = |source: std::io::Error| InstrumentError::Connect {
            role,
            address: address.clone(),
            source,
        };

        let stream = timeout(timeout_after, TcpStream::connect((host, port)))
            .await
            .map_err(|_| connect_error(std::io::ErrorKind::TimedOut.into()))?
            .map_err(connect_error)?;

        // Queries are tiny; don't let Nagle hold them back
        stream.set_nodelay(true)?;

        tracing::info!(%role, %address, "Connected to instrument");

        Ok(Self {
            stream: Mutex::new(Some(BufReader::new(stream))),
            timeout: timeout_after,
            address,
        })
    }

    /// `host:port` of the instrument.
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn write_line(
        stream: &mut BufReader<TcpStream>,
        command: &str,
    ) -> Result<(), InstrumentError> {
        let line = format!("{}\n", command);
        stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(lost)?;
        stream.get_mut().flush().await.map_err(lost)
    }

    /// Drop bytes left over from a query that timed out earlier, so a late
    /// answer is never mistaken for the response to the next query.
    async fn discard_stale(stream: &mut BufReader<TcpStream>) {
        let buffered = stream.buffer().len();
        if buffered > 0 {
            tracing::debug!("Discarding {} buffered stale bytes", buffered);
            stream.consume(buffered);
        }

        let mut discard = [0u8; 256];
        loop {
            match stream.get_mut().try_read(&mut discard) {
                Ok(0) => break,
                Ok(n) => tracing::debug!("Discarded {} stale bytes from socket", n),
                Err(_) => break,
            }
        }
    }
}

fn lost(err: std::io::Error) -> InstrumentError {
    InstrumentError::ConnectionLost(err.to_string())
}

#[async_trait]
impl ScpiTransport for TcpScpiClient {
    async fn send(&self, command: &str) -> Result<(), InstrumentError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(InstrumentError::NotConnected)?;

        tracing::debug!(address = %self.address, "SCPI write: {}", command);
        Self::write_line(stream, command).await
    }

    async fn query(&self, query: &str) -> Result<String, InstrumentError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(InstrumentError::NotConnected)?;

        Self::discard_stale(stream).await;

        tracing::debug!(address = %self.address, "SCPI query: {}", query);
        Self::write_line(stream, query).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(InstrumentError::ConnectionLost(
                "connection closed by instrument".into(),
            )),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!(address = %self.address, "SCPI response: {}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(lost(e)),
            Err(_) => Err(InstrumentError::Timeout {
                command: query.to_string(),
                after: self.timeout,
            }),
        }
    }

    async fn close(&self) -> Result<(), InstrumentError> {
        let mut guard = self.stream.lock().await;
        let mut stream = guard.take().ok_or(InstrumentError::NotConnected)?;
        let result = stream.get_mut().shutdown().await;
        tracing::info!(address = %self.address, "Instrument connection closed");
        result.map_err(InstrumentError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn bench_socket() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn query_round_trip_over_tcp() {
        let (listener, port) = bench_socket().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"MEAS:POW?\n");
            socket.write_all(b"2.000\n").await.unwrap();
        });

        let client =
            TcpScpiClient::connect(InstrumentRole::Load, "127.0.0.1", port, Duration::from_secs(1))
                .await
                .unwrap();
        assert_eq!(client.query("MEAS:POW?").await.unwrap(), "2.000");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_instrument_times_out() {
        let (listener, port) = bench_socket().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(socket);
        });

        let client = TcpScpiClient::connect(
            InstrumentRole::Meter,
            "127.0.0.1",
            port,
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let err = client.query("MEAS:VOLT?").await.unwrap_err();
        assert!(matches!(err, InstrumentError::Timeout { .. }));
        assert!(!err.is_connection_lost());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_client_reports_not_connected() {
        let (listener, port) = bench_socket().await;
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let client =
            TcpScpiClient::connect(InstrumentRole::Load, "127.0.0.1", port, Duration::from_secs(1))
                .await
                .unwrap();
        client.close().await.unwrap();
        assert!(matches!(
            client.send(":OUTP OFF").await,
            Err(InstrumentError::NotConnected)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_instrument_fails_to_connect() {
        let (listener, port) = bench_socket().await;
        drop(listener);

        let err = TcpScpiClient::connect(
            InstrumentRole::Meter,
            "127.0.0.1",
            port,
            Duration::from_millis(500),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            err,
            InstrumentError::Connect {
                role: InstrumentRole::Meter,
                ..
            }
        ));
    }
}
