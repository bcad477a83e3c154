//! openIncubate temperature controller driver for benchlink.
//!
//! The controller regulates a stage-top incubator to a setpoint between 10
//! and 50 °C. Two things can be changed from the host: the setpoint
//! (`<value> !S`, rendered with six decimals) and the warning latch, cleared
//! through the `Debug indicator` action (`0 !R`).
//!
//! Protocol reference:
//! - Terminator: `\r\n` (CRLF)
//! - Replies end with `ok\r\n`; the payload is not used
//! - Busy for 100 ms after every command
//!
//! # Usage
//!
//! ```rust,ignore
//! use benchlink_driver_incubate::OpenIncubateFactory;
//!
//! registry.register(OpenIncubateFactory);
//! ```

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
pub const DEVICE_NAME: &str = "openIncubate";

const DESCRIPTION: &str = "openIncubate temperature controller";

/// Setpoint property, in °C.
pub const SETPOINT: &str = "Setpoint [C]";

/// Action property clearing the warning latch.
pub const DEBUG_INDICATOR: &str = "Debug indicator";

/// Quiescence window after each command.
pub const SETTLE_WINDOW: Duration = Duration::from_millis(100);

const CODEC: Codec = Codec::new(CommandFormat::Postfix, ResponseShape::Sentinel, Terminator::CrLf)
    .with_response_end(OK_SENTINEL);

const DEBUG_ACTIONS: &[(&str, &[&str])] = &[("Idle", &[]), ("Reset warnings", &["0 !R"])];

const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::text("Name", DEVICE_NAME),
    ParamSpec::text("Description", DESCRIPTION),
    ParamSpec::float(SETPOINT, 10.0, 50.0, 37.0).command("S"),
    ParamSpec::choice(DEBUG_INDICATOR, &["Idle", "Reset warnings"], "Idle").action(DEBUG_ACTIONS, "Idle"),
];

/// openIncubate controller.
#[derive(Debug)]
pub struct OpenIncubate {
    model: DeviceModel,
}

impl OpenIncubate {
    /// Uninitialized controller opening its port through `connector`.
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

    /// Last setpoint acknowledged by the controller.
    pub fn setpoint(&self) -> f64 {
        self.model
            .cached(SETPOINT)
            .and_then(|v| v.as_float())
            .unwrap_or_default()
    }

    /// Change the setpoint.
    pub async fn set_setpoint(&mut self, celsius: f64) -> Result<(), ParameterError> {
        self.model
            .set(SETPOINT, Value::Float(celsius))
            .await
            .map(|_| ())
    }

    /// Clear latched warnings.
    pub async fn reset_warnings(&mut self) -> Result<(), ParameterError> {
        self.model
            .set(DEBUG_INDICATOR, Value::from("Reset warnings"))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Device for OpenIncubate {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    #[instrument(skip(self), fields(port = %self.model.port()), err)]
    async fn initialize(&mut self) -> Result<()> {
        self.model.initialize().await?;
        tracing::info!("openIncubate ready");
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

/// Factory for [`OpenIncubate`] devices.
pub struct OpenIncubateFactory;

impl DriverFactory for OpenIncubateFactory {
    fn driver_type(&self) -> &'static str {
        "open_incubate"
    }

    fn name(&self) -> &'static str {
        "openIncubate Temperature Controller"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: LinkConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Box<dyn Device>>> {
        Box::pin(async move {
            let cfg: LinkConfig = config.try_into().context("Invalid openIncubate config")?;
            let mut incubator =
                OpenIncubate::new(cfg.connector()).with_answer_timeout(cfg.answer_timeout());
            incubator.set_port(&cfg.port)?;
            Ok(Box::new(incubator) as Box<dyn Device>)
        })
    }
}

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<OpenIncubateFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlink_core::error::ExecError;
    use benchlink_core::mock_serial::{self, MockDeviceHarness};

    async fn incubator() -> (OpenIncubate, MockDeviceHarness) {
        let (connector, harness) = mock_serial::connector();
        let mut incubator =
            OpenIncubate::new(Box::new(connector)).with_answer_timeout(Duration::from_millis(150));
        incubator.set_port("COM5").unwrap();
        incubator.initialize().await.unwrap();
        (incubator, harness)
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = OpenIncubateFactory;
        assert_eq!(factory.driver_type(), "open_incubate");
    }

    #[tokio::test]
    async fn test_factory_build_assigns_port() {
        let factory = OpenIncubateFactory;
        let config = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
        });
        let mut device = factory.build(config).await.unwrap();
        assert_eq!(device.name(), "openIncubate");
        assert_eq!(
            device.get_property("Port").await.unwrap(),
            Value::from("/dev/ttyUSB0")
        );
    }

    #[tokio::test]
    async fn test_setpoint_renders_six_decimals() {
        let (mut incubator, mut harness) = incubator().await;

        let (res, _) = tokio::join!(
            incubator.set_setpoint(37.0),
            harness.expect_and_respond(b"37.000000 !S\r\n", b"37.000000 !S\r\nok\r\n")
        );
        res.unwrap();

        let (res, _) = tokio::join!(
            incubator.set_setpoint(32.25),
            harness.expect_and_respond(b"32.250000 !S\r\n", b"ok\r\n")
        );
        res.unwrap();
        assert_eq!(incubator.setpoint(), 32.25);
        assert!(incubator.busy());
    }

    #[tokio::test]
    async fn test_setpoint_limits() {
        let (mut incubator, mut harness) = incubator().await;

        for celsius in [9.99, 50.01] {
            let err = incubator.set_setpoint(celsius).await.unwrap_err();
            assert!(matches!(err, ParameterError::OutOfRange { .. }));
        }
        harness.expect_silence(Duration::from_millis(20)).await;
        assert_eq!(incubator.setpoint(), 37.0);
    }

    #[tokio::test]
    async fn test_setpoint_timeout_keeps_previous() {
        let (mut incubator, mut harness) = incubator().await;

        let (res, _) = tokio::join!(
            incubator.set_setpoint(25.0),
            harness.expect_write(b"25.000000 !S\r\n")
        );
        assert!(matches!(
            res,
            Err(ParameterError::Exec(ExecError::TransportTimeout { .. }))
        ));
        assert_eq!(incubator.setpoint(), 37.0);
    }

    #[tokio::test]
    async fn test_reset_warnings_returns_to_idle() {
        let (mut incubator, mut harness) = incubator().await;

        let (res, _) = tokio::join!(
            incubator.reset_warnings(),
            harness.expect_and_respond(b"0 !R\r\n", b"ok\r\n")
        );
        res.unwrap();
        assert_eq!(
            incubator.get_property(DEBUG_INDICATOR).await.unwrap(),
            Value::from("Idle")
        );

        // Idle is a no-op
        incubator
            .set_property(DEBUG_INDICATOR, Value::from("Idle"))
            .await
            .unwrap();
        harness.expect_silence(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_port_locked_after_initialize() {
        let (mut incubator, _harness) = incubator().await;

        let err = incubator
            .set_property("Port", Value::from("COM6"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParameterError::Immutable(_)));
        assert_eq!(incubator.model().port(), "COM5");
    }

    #[tokio::test]
    async fn test_shutdown_sends_nothing() {
        let (mut incubator, mut harness) = incubator().await;
        incubator.shutdown().await.unwrap();
        assert!(!incubator.model().is_initialized());
        harness.expect_silence(Duration::from_millis(20)).await;
    }
}
