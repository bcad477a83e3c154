//! Error types for the command/response protocol layer.
//!
//! Errors are layered the same way the protocol is:
//!
//! - **[`ProtocolError`]**: a response arrived but could not be correlated
//!   with the request or parsed. Produced by the [`Codec`](crate::codec::Codec).
//! - **[`ExecError`]**: one command round trip failed, either on the link
//!   itself (write, timeout, read) or because the codec rejected the reply.
//!   Produced by the [`CommandExecutor`](crate::executor::CommandExecutor).
//! - **[`ParameterError`]**: a parameter `get`/`set` failed. Local validation
//!   failures (`OutOfRange`, `Immutable`) are raised before any transport
//!   activity; everything else wraps an [`ExecError`].
//!
//! Every failure is local to the operation that triggered it. Nothing in this
//! layer retries; callers decide.

use thiserror::Error;

/// The instrument's reply could not be turned into an answer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The instrument rejected the command.
    ///
    /// The response started with the family's error prefix (`Err:` on the
    /// RGBW firmware). The message after the prefix is passed through.
    #[error("device reported error: {0}")]
    DeviceReportedError(String),

    /// The response did not echo the command that was sent.
    ///
    /// Only raised for families whose firmware echoes commands. Both the
    /// offset-0 and the offset-1 echo positions were checked.
    #[error("unexpected echo for command '{sent}': got '{response}'")]
    UnexpectedEcho {
        /// Command line that was sent (without terminator)
        sent: String,
        /// Raw response that failed to match
        response: String,
    },

    /// A numeric payload failed base-10 parsing.
    #[error("malformed value '{payload}', expected {expected}")]
    MalformedValue {
        /// Payload after echo/sentinel stripping
        payload: String,
        /// What the payload should have been ("integer", "float", ...)
        expected: &'static str,
    },
}

/// A single command round trip failed.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Writing the command to the link failed. No response was awaited.
    #[error("failed to write '{command}' to {port}: {source}")]
    TransportWrite {
        /// Port the command was addressed to
        port: String,
        /// Command line (without terminator)
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No complete response arrived within the answer timeout.
    #[error("timed out after {timeout_ms} ms waiting for reply to '{command}' on {port}")]
    TransportTimeout {
        /// Port the command was addressed to
        port: String,
        /// Command line (without terminator)
        command: String,
        /// Answer timeout that elapsed
        timeout_ms: u64,
    },

    /// The link failed or closed while the response was being read.
    #[error("failed reading reply to '{command}' on {port}: {source}")]
    TransportRead {
        /// Port the command was addressed to
        port: String,
        /// Command line (without terminator)
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The response arrived but the codec rejected it.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A parameter access failed.
///
/// Returned by both `get` and `set`; reads share the lookup and transport
/// failure modes of writes.
#[derive(Error, Debug)]
pub enum ParameterError {
    /// The requested value is outside the declared range or allowed set.
    #[error("value {value} is not allowed for '{name}' ({allowed})")]
    OutOfRange {
        /// Parameter name
        name: String,
        /// Rejected value, rendered for display
        value: String,
        /// Human-readable constraint description
        allowed: String,
    },

    /// The parameter cannot be written (read-only, or the port after init).
    #[error("parameter '{0}' cannot be changed")]
    Immutable(String),

    /// No parameter with this name exists on the device.
    #[error("unknown parameter '{0}'")]
    Unknown(String),

    /// The parameter needs hardware access but the device has no open link.
    #[error("parameter '{0}' requires an initialized device")]
    NotInitialized(String),

    /// The hardware round trip failed.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ParameterError {
    /// True when the failure came from the instrument or the link rather
    /// than from local validation.
    pub fn is_hardware(&self) -> bool {
        matches!(self, ParameterError::Exec(_))
    }

    /// The protocol error behind this failure, if any.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            ParameterError::Exec(ExecError::Protocol(p)) => Some(p),
            _ => None,
        }
    }
}
