//! Command Executor
//!
//! Runs one request/reply exchange: purge, write, read until the reply is
//! complete, decode. The steps always happen in that order and none is
//! skipped. Nothing here retries; the first failure is returned.
//!
//! The executor owns its transport and every call takes `&mut self`, so two
//! exchanges can never overlap on one link.

use crate::codec::{Answer, Codec};
use crate::error::ExecError;
use crate::transport::DynTransport;
use std::io;
use std::time::Duration;
use tracing::instrument;

/// Answer timeout used when a driver does not configure one.
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serializes command round trips over one link.
pub struct CommandExecutor {
    transport: DynTransport,
    codec: Codec,
    answer_timeout: Duration,
}

impl CommandExecutor {
    /// Executor over `transport` using `codec` framing.
    pub fn new(transport: DynTransport, codec: Codec) -> Self {
        Self {
            transport,
            codec,
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
        }
    }

    /// Bound on how long one reply may take.
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = timeout;
        self
    }

    /// Codec used to frame and decode.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Port this executor talks to.
    pub fn port(&self) -> &str {
        self.transport.port()
    }

    /// Send `command` and return the decoded answer.
    #[instrument(skip(self), fields(port = %self.transport.port()), err)]
    pub async fn execute(&mut self, command: &str) -> Result<Answer, ExecError> {
        self.transport.purge().await;

        if let Err(source) = self
            .transport
            .write_line(command, self.codec.terminator())
            .await
        {
            tracing::warn!(cmd = %command, error = %source, "Command write failed");
            return Err(ExecError::TransportWrite {
                port: self.transport.port().to_string(),
                command: command.to_string(),
                source,
            });
        }

        let raw = self.read_response(command).await?;
        tracing::debug!(cmd = %command, response = %raw.escape_debug(), "Received reply");

        self.codec.decode(&raw, command).map_err(|e| {
            tracing::warn!(cmd = %command, response = %raw.escape_debug(), error = %e, "Reply rejected");
            ExecError::from(e)
        })
    }

    async fn read_response(&mut self, command: &str) -> Result<String, ExecError> {
        let deadline = tokio::time::Instant::now() + self.answer_timeout;
        let delimiter = self.codec.read_delimiter();
        let mut raw = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let chunk = match self.transport.read_until(delimiter, remaining).await {
                Ok(chunk) => chunk,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    tracing::warn!(cmd = %command, partial = %raw.escape_debug(), "Reply timed out");
                    return Err(ExecError::TransportTimeout {
                        port: self.transport.port().to_string(),
                        command: command.to_string(),
                        timeout_ms: self.answer_timeout.as_millis() as u64,
                    });
                }
                Err(source) => {
                    tracing::warn!(cmd = %command, error = %source, "Reply read failed");
                    return Err(ExecError::TransportRead {
                        port: self.transport.port().to_string(),
                        command: command.to_string(),
                        source,
                    });
                }
            };

            raw.push_str(&String::from_utf8_lossy(&chunk));
            if self.codec.response_complete(&raw) {
                return Ok(raw);
            }
        }
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("port", &self.transport.port())
            .field("codec", &self.codec)
            .field("answer_timeout", &self.answer_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CommandFormat, ResponseShape, Terminator, OK_SENTINEL};
    use crate::error::ProtocolError;
    use crate::mock_serial::{self, MockDeviceHarness};
    use crate::transport::SerialTransport;
    use tracing_test::traced_test;

    const SENTINEL: Codec = Codec::new(CommandFormat::Postfix, ResponseShape::Sentinel, Terminator::Cr)
        .with_response_end(OK_SENTINEL);
    const BARE: Codec = Codec::new(CommandFormat::Addressed, ResponseShape::Bare, Terminator::Lf)
        .with_error_prefix("Err:");

    fn executor(codec: Codec) -> (CommandExecutor, MockDeviceHarness) {
        let (port, harness) = mock_serial::new();
        let transport = SerialTransport::new("mock", Box::new(port))
            .with_purge_window(Duration::from_millis(1));
        let exec = CommandExecutor::new(Box::new(transport), codec)
            .with_answer_timeout(Duration::from_millis(200));
        (exec, harness)
    }

    #[tokio::test]
    async fn reads_through_echo_until_sentinel() {
        let (mut exec, mut harness) = executor(SENTINEL);

        let (answer, _) = tokio::join!(
            exec.execute("1 !P"),
            harness.expect_and_respond(b"1 !P\r", b"1 !P\r\nok\r\n")
        );

        assert!(answer.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sentinel_split_across_chunks() {
        let (mut exec, mut harness) = executor(SENTINEL);

        let (answer, _) = tokio::join!(exec.execute("!C"), async {
            harness.expect_write(b"!C\r").await;
            harness.send_response(b"!C\r\n").unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            harness.send_response(b"o").unwrap();
            harness.send_response(b"k\r\n").unwrap();
        });

        assert!(answer.is_ok());
    }

    #[tokio::test]
    async fn bare_reply_is_the_answer() {
        let (mut exec, mut harness) = executor(BARE);

        let (answer, _) = tokio::join!(
            exec.execute("0L?"),
            harness.expect_and_respond(b"0L?\n", b"200\r\n")
        );

        assert_eq!(answer.unwrap().to_int().unwrap(), 200);
    }

    #[tokio::test]
    async fn stale_bytes_are_purged_before_write() {
        let (mut exec, mut harness) = executor(BARE);

        // Left over from an earlier exchange that timed out
        harness.send_response(b"17\n").unwrap();
        tokio::task::yield_now().await;

        let (answer, _) = tokio::join!(
            exec.execute("0N?"),
            harness.expect_and_respond(b"0N?\n", b"8\n")
        );

        assert_eq!(answer.unwrap().as_str(), "8");
    }

    #[tokio::test]
    #[traced_test]
    async fn timeout_is_reported_and_logged_with_command() {
        let (mut exec, mut harness) = executor(SENTINEL);

        let (answer, _) = tokio::join!(exec.execute("125 !V"), harness.expect_write(b"125 !V\r"));

        assert!(matches!(
            answer,
            Err(ExecError::TransportTimeout { ref command, timeout_ms: 200, .. }) if command == "125 !V"
        ));
        assert!(logs_contain("Reply timed out"));
        assert!(logs_contain("125 !V"));
    }

    #[tokio::test]
    async fn device_error_line_ends_the_read() {
        let (mut exec, mut harness) = executor(BARE);

        let (answer, _) = tokio::join!(
            exec.execute("0X?"),
            harness.expect_and_respond(b"0X?\n", b"Err: unknown command\n")
        );

        assert!(matches!(
            answer,
            Err(ExecError::Protocol(ProtocolError::DeviceReportedError(ref m))) if m == "unknown command"
        ));
    }

    #[tokio::test]
    async fn write_failure_skips_the_read() {
        let (mut exec, harness) = executor(SENTINEL);
        drop(harness);

        let err = exec.execute("1 !P").await.unwrap_err();
        assert!(matches!(err, ExecError::TransportWrite { .. }));
    }

    #[tokio::test]
    async fn closed_link_mid_read_is_a_read_error() {
        let (mut exec, mut harness) = executor(SENTINEL);

        let (answer, _) = tokio::join!(exec.execute("1 !P"), async move {
            harness.expect_write(b"1 !P\r").await;
            harness.send_response(b"1 !P\r\n").unwrap();
            drop(harness);
        });

        assert!(matches!(answer, Err(ExecError::TransportRead { .. })));
    }
}
