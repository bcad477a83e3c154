//! Mock serial port for testing instrument drivers.
//!
//! [`MockSerialPort`] implements `AsyncRead`/`AsyncWrite` and is handed to the
//! code under test; [`MockDeviceHarness`] stays in the test and scripts the
//! instrument side. The two halves talk over a pair of unbounded channels.
//!
//! [`MockConnector`] wraps the port so drivers can be initialized through
//! their normal [`Connector`] path.
//!
//! # Example
//!
//! ```rust,ignore
//! use benchlink_core::mock_serial;
//!
//! let (connector, mut harness) = mock_serial::connector();
//! let mut incubator = OpenIncubate::new(Box::new(connector));
//! incubator.set_port("COM5")?;
//! incubator.initialize().await?;
//!
//! let (res, _) = tokio::join!(
//!     incubator.set("Setpoint [C]", 30.0.into()),
//!     harness.expect_and_respond(b"30.000000 !S\r\n", b"ok\r\n"),
//! );
//! res?;
//! ```

use crate::transport::{Connector, DynTransport, SerialTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// How long [`MockDeviceHarness::expect_write`] waits before failing the test.
const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// The client-facing side of the mock serial port.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// The test-facing side that plays the instrument.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
}

/// Creates a connected pair of [`MockSerialPort`] and [`MockDeviceHarness`].
pub fn new() -> (MockSerialPort, MockDeviceHarness) {
    let (client_to_harness_tx, client_to_harness_rx) = mpsc::unbounded_channel();
    let (harness_to_client_tx, harness_to_client_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: client_to_harness_tx,
        reads_rx: harness_to_client_rx,
        read_buffer: VecDeque::new(),
    };

    let harness = MockDeviceHarness {
        writes_rx: client_to_harness_rx,
        reads_tx: harness_to_client_tx,
        write_buffer: Vec::new(),
    };

    (port, harness)
}

/// Creates a [`MockConnector`] and the harness driving it.
pub fn connector() -> (MockConnector, MockDeviceHarness) {
    let (port, harness) = new();
    (MockConnector::new(port), harness)
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            match self.reads_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buffer.extend(chunk),
                // Harness dropped: end of file
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(_) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device harness disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    /// Sends bytes to the client as if the instrument transmitted them.
    ///
    /// # Errors
    /// Returns an error if the client port has been dropped.
    pub fn send_response(&self, data: &[u8]) -> Result<(), &'static str> {
        self.reads_tx
            .send(data.to_vec())
            .map_err(|_| "Failed to send response: client port disconnected")
    }

    /// Waits for the client to write `expected` and asserts it byte for byte.
    ///
    /// # Panics
    /// Panics if the bytes do not arrive within 2 seconds or differ.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        while self.write_buffer.len() < expected.len() {
            match tokio::time::timeout(EXPECT_TIMEOUT, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("Client-side port closed while expecting a write."),
                Err(_) => panic!(
                    "Timeout waiting for write. Expected `{:?}`, but only received `{:?}`.",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer),
                ),
            }
        }

        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "Mismatch in expected write. Expected `{:?}`, got `{:?}`.",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );

        self.write_buffer.drain(..expected.len());
    }

    /// Expects a write and answers it.
    pub async fn expect_and_respond(&mut self, expected: &[u8], response: &[u8]) {
        self.expect_write(expected).await;
        self.send_response(response)
            .expect("Failed to send response");
    }

    /// Asserts that the client wrote nothing within `window`.
    ///
    /// # Panics
    /// Panics if any bytes arrive.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(chunk)) = tokio::time::timeout(window, self.writes_rx.recv()).await {
            self.write_buffer.extend_from_slice(&chunk);
        }
        assert!(
            self.write_buffer.is_empty(),
            "Expected no writes, got `{:?}`",
            String::from_utf8_lossy(&self.write_buffer)
        );
    }

    /// Drains pending writes without asserting their content.
    pub async fn drain_writes(&mut self) {
        let short_timeout = Duration::from_millis(50);
        while let Ok(Some(chunk)) = tokio::time::timeout(short_timeout, self.writes_rx.recv()).await {
            self.write_buffer.extend_from_slice(&chunk);
        }
        self.write_buffer.clear();
    }
}

/// [`Connector`] that hands out one pre-made [`MockSerialPort`].
///
/// A second `connect` fails, matching a port that is already in use.
#[derive(Debug)]
pub struct MockConnector {
    port: Mutex<Option<MockSerialPort>>,
}

impl MockConnector {
    /// Wrap a mock port.
    pub fn new(port: MockSerialPort) -> Self {
        Self {
            port: Mutex::new(Some(port)),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, port: &str) -> anyhow::Result<DynTransport> {
        let mock = self
            .port
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("mock port {} already opened", port))?;
        Ok(Box::new(
            SerialTransport::new(port, Box::new(mock)).with_purge_window(Duration::from_millis(1)),
        ))
    }
}
