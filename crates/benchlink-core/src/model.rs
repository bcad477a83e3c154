//! Shared device plumbing.
//!
//! [`DeviceModel`] bundles what every instrument family needs: the session
//! (port and lifecycle), the parameter table, the settle timer and the
//! command executor once the link is open. Family drivers wrap one and add
//! their own initialize steps.

use crate::codec::{Codec, Value};
use crate::error::ParameterError;
use crate::executor::{CommandExecutor, DEFAULT_ANSWER_TIMEOUT};
use crate::parameter::{ParamSpec, ParameterTable};
use crate::session::{DeviceSession, PORT};
use crate::settle::SettleTimer;
use crate::transport::Connector;
use anyhow::Context;
use std::time::Duration;
use tokio::sync::watch;
use tracing::instrument;

/// Session, parameters, timer and link of one device.
pub struct DeviceModel {
    session: DeviceSession,
    params: ParameterTable,
    settle: SettleTimer,
    connector: Box<dyn Connector>,
    codec: Codec,
    answer_timeout: Duration,
    executor: Option<CommandExecutor>,
}

impl DeviceModel {
    /// Model over `specs`, opening links through `connector`.
    pub fn new(
        connector: Box<dyn Connector>,
        codec: Codec,
        specs: impl IntoIterator<Item = ParamSpec>,
        settle_window: Duration,
    ) -> Self {
        Self {
            session: DeviceSession::new(),
            params: ParameterTable::new(specs),
            settle: SettleTimer::new(settle_window),
            connector,
            codec,
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
            executor: None,
        }
    }

    /// Bound on how long one reply may take.
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = timeout;
        self
    }

    /// Lifecycle state.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Current port name.
    pub fn port(&self) -> &str {
        self.session.port()
    }

    /// Change the port. Rejected with `Immutable` once initialized.
    pub fn set_port(&mut self, port: &str) -> Result<(), ParameterError> {
        self.session.set_port(port)?;
        if self.executor.as_ref().is_some_and(|e| e.port() != port) {
            self.executor = None;
        }
        Ok(())
    }

    /// True between initialize and shutdown.
    pub fn is_initialized(&self) -> bool {
        self.session.is_initialized()
    }

    /// True while the settle window runs.
    pub fn busy(&self) -> bool {
        self.settle.is_busy()
    }

    /// The parameter table.
    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    /// `Port` followed by the table's parameters.
    pub fn property_names(&self) -> Vec<&'static str> {
        std::iter::once(PORT).chain(self.params.names()).collect()
    }

    /// Cached value of `name`, without hardware access.
    pub fn cached(&self, name: &str) -> Option<Value> {
        if name == PORT {
            return Some(Value::from(self.port()));
        }
        self.params.cached(name)
    }

    /// Receiver for changes of `name`.
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<Value>> {
        self.params.subscribe(name)
    }

    /// Parse user text for `name` according to its kind.
    pub fn parse_value(&self, name: &str, text: &str) -> Result<Value, ParameterError> {
        if name == PORT {
            return Ok(Value::from(text));
        }
        let spec = self
            .params
            .spec(name)
            .ok_or_else(|| ParameterError::Unknown(name.to_string()))?;
        spec.kind.parse_input(name, text)
    }

    /// Open the link if it is not open yet.
    #[instrument(skip(self), fields(port = %self.session.port()), err)]
    pub async fn open(&mut self) -> anyhow::Result<()> {
        if self.executor.is_some() {
            return Ok(());
        }
        anyhow::ensure!(self.session.has_port(), "serial port not set");

        let transport = self
            .connector
            .connect(self.session.port())
            .await
            .with_context(|| format!("Failed to open {}", self.session.port()))?;
        self.executor =
            Some(CommandExecutor::new(transport, self.codec).with_answer_timeout(self.answer_timeout));
        Ok(())
    }

    /// Mark the device initialized and start the settle window.
    pub fn finish_initialize(&mut self) {
        self.session.mark_initialized();
        self.settle.touch();
    }

    /// Open the link and finish initialization. Idempotent.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.open().await?;
        self.finish_initialize();
        Ok(())
    }

    /// Mark the device uninitialized. No command is sent.
    pub fn shutdown(&mut self) {
        self.session.shutdown();
    }

    /// Open executor, for family-specific exchanges.
    pub fn executor_mut(&mut self) -> Option<&mut CommandExecutor> {
        self.executor.as_mut()
    }

    /// Executor and timer, for tables owned outside the model.
    pub fn link_mut(&mut self) -> (Option<&mut CommandExecutor>, &mut SettleTimer) {
        (self.executor.as_mut(), &mut self.settle)
    }

    /// Read `name`.
    pub async fn get(&mut self, name: &str) -> Result<Value, ParameterError> {
        if name == PORT {
            return Ok(Value::from(self.port()));
        }
        self.params.get(name, self.executor.as_mut()).await
    }

    /// Write `name`, returning the value now cached.
    pub async fn set(&mut self, name: &str, value: Value) -> Result<Value, ParameterError> {
        if name == PORT {
            let port = value.to_string();
            self.set_port(&port)?;
            return Ok(Value::from(port));
        }
        self.params
            .set(name, value, self.executor.as_mut(), &mut self.settle)
            .await
    }
}

impl std::fmt::Debug for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceModel")
            .field("session", &self.session)
            .field("params", &self.params)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}
