//! Bartels QKPP piezo pump driver (QuadKey firmware).
//!
//! Per pump a runtime and a voltage, both selected with `N !P` first. The
//! `Dispensing` property starts or aborts a dispense and then reads back as
//! `Idle` again. `Continuous` switches between timed and continuous pumping;
//! the firmware only has a toggle command (`!C`), so it is sent only when the
//! mode actually changes.
//!
//! Protocol reference:
//! - Terminator: `\r` (CR)
//! - Replies end with `ok\r\n`; the payload is not used
//! - Busy for 100 ms after every command

use anyhow::{Context, Result};
use async_trait::async_trait;
use benchlink_core::codec::{Codec, CommandFormat, ResponseShape, Terminator, Value, OK_SENTINEL};
use benchlink_core::device::Device;
use benchlink_core::driver::{DriverFactory, LinkConfig};
use benchlink_core::error::ParameterError;
use benchlink_core::model::DeviceModel;
use benchlink_core::parameter::ParamSpec;
use benchlink_core::transport::Connector;
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::instrument;

/// Device name used for registration.
pub const DEVICE_NAME: &str = "Bartels QuadKey";

const DESCRIPTION: &str = "Bartels piezo pump - QuadKey";

/// Quiescence window after each command.
pub const SETTLE_WINDOW: Duration = Duration::from_millis(100);

const CODEC: Codec = Codec::new(CommandFormat::Postfix, ResponseShape::Sentinel, Terminator::Cr)
    .with_response_end(OK_SENTINEL);

const MAX_PUMPTIME_MS: i64 = 10_000;
const MAX_VOLTAGE: i64 = 250;

const fn runtime(name: &'static str, pump: i64) -> ParamSpec {
    ParamSpec::integer(name, 0, MAX_PUMPTIME_MS, 1000)
        .command("T")
        .selecting("P", pump)
}

const fn voltage(name: &'static str, pump: i64) -> ParamSpec {
    ParamSpec::integer(name, 0, MAX_VOLTAGE, MAX_VOLTAGE)
        .command("V")
        .selecting("P", pump)
}

const DISPENSE_CHOICES: &[&str] = &[
    "Abort",
    "Start Pump 1",
    "Start Pump 2",
    "Start Pump 3",
    "Start Pump 4",
    "Idle",
];

const DISPENSE_SEQUENCES: &[(&str, &[&str])] = &[
    ("Abort", &["*"]),
    ("Start Pump 1", &["1 !P", "/"]),
    ("Start Pump 2", &["2 !P", "/"]),
    ("Start Pump 3", &["3 !P", "/"]),
    ("Start Pump 4", &["4 !P", "/"]),
    ("Idle", &[""]),
];

const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::text("Name", DEVICE_NAME),
    ParamSpec::text("Description", DESCRIPTION),
    runtime("Pump 1 runtime [ms]", 1),
    runtime("Pump 2 runtime [ms]", 2),
    runtime("Pump 3 runtime [ms]", 3),
    runtime("Pump 4 runtime [ms]", 4),
    voltage("Pump 1 voltage [V]", 1),
    voltage("Pump 2 voltage [V]", 2),
    voltage("Pump 3 voltage [V]", 3),
    voltage("Pump 4 voltage [V]", 4),
    ParamSpec::choice("Dispensing", DISPENSE_CHOICES, "Idle").action(DISPENSE_SEQUENCES, "Idle"),
    ParamSpec::choice("Continuous", &["Continuous", "Timed"], "Timed").toggle("!C"),
];

/// QKPP piezo pump.
#[derive(Debug)]
pub struct Qkpp {
    model: DeviceModel,
}

impl Qkpp {
    /// Uninitialized pump opening its port through `connector`.
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            model: DeviceModel::new(connector, CODEC, PARAMETERS.iter().copied(), SETTLE_WINDOW),
        }
    }

    /// Bound on how long one reply may take.
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.model = self.model.with_answer_timeout(timeout);
        self
    }

    /// Assign the serial port. Only allowed before initialize.
    pub fn set_port(&mut self, port: &str) -> Result<(), ParameterError> {
        self.model.set_port(port)
    }

    /// Shared device state.
    pub fn model(&self) -> &DeviceModel {
        &self.model
    }

    /// Start dispensing on `pump` (1..=4).
    pub async fn dispense(&mut self, pump: u8) -> Result<(), ParameterError> {
        self.model
            .set("Dispensing", Value::Text(format!("Start Pump {}", pump)))
            .await
            .map(|_| ())
    }

    /// Abort any running dispense.
    pub async fn abort(&mut self) -> Result<(), ParameterError> {
        self.model
            .set("Dispensing", Value::from("Abort"))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Device for Qkpp {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    #[instrument(skip(self), fields(port = %self.model.port()), err)]
    async fn initialize(&mut self) -> Result<()> {
        self.model.initialize().await?;
        tracing::info!("QKPP pump ready");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.model.shutdown();
        Ok(())
    }

    fn busy(&self) -> bool {
        self.model.busy()
    }

    fn property_names(&self) -> Vec<&'static str> {
        self.model.property_names()
    }

    fn parse_value(&self, name: &str, text: &str) -> Result<Value, ParameterError> {
        self.model.parse_value(name, text)
    }

    async fn get_property(&mut self, name: &str) -> Result<Value, ParameterError> {
        self.model.get(name).await
    }

    async fn set_property(&mut self, name: &str, value: Value) -> Result<Value, ParameterError> {
        self.model.set(name, value).await
    }
}

/// Factory for [`Qkpp`] devices.
pub struct QkppFactory;

impl DriverFactory for QkppFactory {
    fn driver_type(&self) -> &'static str {
        "bartels_qkpp"
    }

    fn name(&self) -> &'static str {
        "Bartels QKPP Piezo Pump"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: LinkConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Box<dyn Device>>> {
        Box::pin(async move {
            let cfg: LinkConfig = config.try_into().context("Invalid QKPP config")?;
            let mut pump = Qkpp::new(cfg.connector()).with_answer_timeout(cfg.answer_timeout());
            pump.set_port(&cfg.port)?;
            Ok(Box::new(pump) as Box<dyn Device>)
        })
    }
}
