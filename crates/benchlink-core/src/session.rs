//! Device lifecycle state shared by every family.
//!
//! A session holds the serial port name and the initialized flag. The port
//! may be changed freely until initialization; afterwards it is frozen.

use crate::error::ParameterError;

/// Name of the port property every device exposes.
pub const PORT: &str = "Port";

/// Port value before the host assigns one.
pub const UNDEFINED_PORT: &str = "Undefined";

/// Lifecycle state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    port: String,
    initialized: bool,
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self {
            port: UNDEFINED_PORT.to_string(),
            initialized: false,
        }
    }
}

impl DeviceSession {
    /// Fresh session with an undefined port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current port name.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// True once a port other than [`UNDEFINED_PORT`] is set.
    pub fn has_port(&self) -> bool {
        self.port != UNDEFINED_PORT
    }

    /// Change the port. Rejected after initialization; the old value stays.
    pub fn set_port(&mut self, port: &str) -> Result<(), ParameterError> {
        if self.initialized {
            return Err(ParameterError::Immutable(PORT.to_string()));
        }
        self.port = port.to_string();
        Ok(())
    }

    /// True between a successful initialize and shutdown.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Record a successful initialize.
    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Record a shutdown. Never talks to hardware.
    pub fn shutdown(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_write_once_after_init() {
        let mut session = DeviceSession::new();
        assert_eq!(session.port(), "Undefined");
        assert!(!session.has_port());

        session.set_port("COM3").unwrap();
        session.set_port("COM5").unwrap();
        session.mark_initialized();

        let err = session.set_port("COM7").unwrap_err();
        assert!(matches!(err, ParameterError::Immutable(ref name) if name == "Port"));
        assert_eq!(session.port(), "COM5");
    }

    #[test]
    fn shutdown_unfreezes_port() {
        let mut session = DeviceSession::new();
        session.set_port("COM5").unwrap();
        session.mark_initialized();
        session.shutdown();
        assert!(!session.is_initialized());
        session.set_port("COM6").unwrap();
        assert_eq!(session.port(), "COM6");
    }
}
