//! Serial Transport
//!
//! A line-oriented byte link with three primitives: purge stale input, write
//! one command line, read up to a delimiter within a timeout. The
//! [`Transport`] trait is what the executor drives; [`SerialTransport`]
//! implements it over any tokio `AsyncRead + AsyncWrite` stream so real ports
//! (`tokio_serial::SerialStream`), `tokio::io::DuplexStream` and the
//! channel-backed mock all share one code path.
//!
//! Opening a link from a logical port name is the job of a [`Connector`].
//!
//! # Example
//!
//! ```rust,ignore
//! use benchlink_core::transport::{Connector, SerialConnector};
//!
//! let connector = SerialConnector::new(9600);
//! let mut link = connector.connect("/dev/ttyACM0").await?;
//! link.purge().await;
//! ```

use crate::codec::Terminator;
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default time spent draining stale input before each command.
pub const DEFAULT_PURGE_WINDOW: Duration = Duration::from_millis(10);

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
/// - the mock in [`mock_serial`](crate::mock_serial)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Transport
// =============================================================================

/// Byte link consumed by the command executor.
///
/// Implementations are used by one executor at a time; every method takes
/// `&mut self`.
#[async_trait]
pub trait Transport: Send {
    /// Logical port name, for diagnostics.
    fn port(&self) -> &str;

    /// Discard any input already buffered or pending on the link.
    ///
    /// Returns the number of bytes thrown away.
    async fn purge(&mut self) -> usize;

    /// Write `line` followed by `terminator`.
    async fn write_line(&mut self, line: &str, terminator: Terminator) -> io::Result<()>;

    /// Read bytes up to and including `delimiter`.
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] when `timeout` elapses and with
    /// [`io::ErrorKind::UnexpectedEof`] when the link is closed.
    async fn read_until(&mut self, delimiter: u8, timeout: Duration) -> io::Result<Vec<u8>>;
}

/// Boxed transport handed out by connectors.
pub type DynTransport = Box<dyn Transport>;

/// [`Transport`] over a buffered async byte stream.
pub struct SerialTransport {
    port_name: String,
    reader: BufReader<DynSerial>,
    purge_window: Duration,
}

impl SerialTransport {
    /// Wrap an open stream.
    pub fn new(port_name: impl Into<String>, io: DynSerial) -> Self {
        Self {
            port_name: port_name.into(),
            reader: BufReader::new(io),
            purge_window: DEFAULT_PURGE_WINDOW,
        }
    }

    /// Change how long [`Transport::purge`] waits for trailing stale bytes.
    pub fn with_purge_window(mut self, window: Duration) -> Self {
        self.purge_window = window;
        self
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_name)
            .field("purge_window", &self.purge_window)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn port(&self) -> &str {
        &self.port_name
    }

    async fn purge(&mut self) -> usize {
        let buffered = self.reader.buffer().len();
        Pin::new(&mut self.reader).consume(buffered);

        let drained = drain_serial_buffer(self.reader.get_mut(), self.purge_window).await;
        let total = buffered + drained;
        if total > 0 {
            tracing::debug!(port = %self.port_name, bytes = total, "Discarded stale input");
        }
        total
    }

    async fn write_line(&mut self, line: &str, terminator: Terminator) -> io::Result<()> {
        let framed = format!("{}{}", line, terminator.as_str());
        let writer = self.reader.get_mut();
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await
    }

    async fn read_until(&mut self, delimiter: u8, timeout: Duration) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        match tokio::time::timeout(timeout, self.reader.read_until(delimiter, &mut buf)).await {
            Ok(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} closed", self.port_name),
            )),
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no data from {} within {:?}", self.port_name, timeout),
            )),
        }
    }
}

// =============================================================================
// Connectors
// =============================================================================

/// Opens a [`Transport`] for a logical port name.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the link named `port`.
    async fn connect(&self, port: &str) -> anyhow::Result<DynTransport>;
}

/// Opens real serial ports through `tokio-serial` (8N1, no flow control).
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
    purge_window: Duration,
}

#[cfg(feature = "serial")]
impl SerialConnector {
    /// Connector for the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            purge_window: DEFAULT_PURGE_WINDOW,
        }
    }

    /// Purge window used by opened transports.
    pub fn with_purge_window(mut self, window: Duration) -> Self {
        self.purge_window = window;
        self
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, port: &str) -> anyhow::Result<DynTransport> {
        let stream = open_serial_async(port, self.baud_rate).await?;
        tracing::info!(port, baud = self.baud_rate, "Opened serial port");
        Ok(Box::new(
            SerialTransport::new(port, Box::new(stream)).with_purge_window(self.purge_window),
        ))
    }
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using `spawn_blocking`.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or `spawn_blocking` fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open serial port {}", port_path_owned))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Drain stale data from a serial port.
///
/// Reads and discards until nothing arrives within `window`. Returns the
/// number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + window;
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break, // nothing more within the window
        }
    }

    total_discarded
}
