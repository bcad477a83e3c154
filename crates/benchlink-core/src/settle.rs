//! Busy/settling timer.
//!
//! After a command the instrument is considered busy for a fixed quiescence
//! window. There is no timer task: the state is computed from the elapsed
//! time whenever it is queried.

use std::time::Duration;
use tokio::time::Instant;

/// Settling state at the moment of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleState {
    /// Still inside the quiescence window.
    Settling,
    /// Window elapsed (or never started).
    Idle,
}

/// Tracks time since the last command.
#[derive(Debug, Clone)]
pub struct SettleTimer {
    window: Duration,
    last_command: Option<Instant>,
}

impl SettleTimer {
    /// Timer with a fixed quiescence `window`. A zero window is never busy.
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_command: None,
        }
    }

    /// Record that a command was just issued.
    pub fn touch(&mut self) {
        self.last_command = Some(Instant::now());
    }

    /// Configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current state.
    pub fn state(&self) -> SettleState {
        match self.last_command {
            Some(at) if at.elapsed() < self.window => SettleState::Settling,
            _ => SettleState::Idle,
        }
    }

    /// True while settling.
    pub fn is_busy(&self) -> bool {
        self.state() == SettleState::Settling
    }
}
