//! Bartels QuadKey driver (Arduino pump controller).
//!
//! Four pump channels, each with a drive voltage. Setting a voltage selects
//! the pump with `N !P` and then sends the voltage, truncated to whole volts,
//! with `V !V`. The firmware echoes each command and ends every reply with
//! `ok\r\n`.
//!
//! Protocol reference:
//! - Terminator: `\r` (CR)
//! - Replies: echoed command, optional payload, `ok\r\n`
//! - No settle window: the controller is never reported busy

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
pub const DEVICE_NAME: &str = "Bartels_QuadKey";

const DESCRIPTION: &str = "Arduino Bartels pump controller";

const CODEC: Codec = Codec::new(CommandFormat::Postfix, ResponseShape::Echoed, Terminator::Cr)
    .with_response_end(OK_SENTINEL);

const fn voltage(name: &'static str, pump: i64) -> ParamSpec {
    ParamSpec::float(name, 0.0, 250.0, 0.0)
        .command("V")
        .selecting("P", pump)
        .truncated()
}

const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::text("Name", DEVICE_NAME),
    ParamSpec::text("Description", DESCRIPTION),
    ParamSpec::integer("Selected pumps", 0, 3, 0),
    voltage("Pump 1 voltage (V)", 1),
    voltage("Pump 2 voltage (V)", 2),
    voltage("Pump 3 voltage (V)", 3),
    voltage("Pump 4 voltage (V)", 4),
];

/// QuadKey pump controller.
#[derive(Debug)]
pub struct QuadKey {
    model: DeviceModel,
}

impl QuadKey {
    /// Uninitialized controller opening its port through `connector`.
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            model: DeviceModel::new(connector, CODEC, PARAMETERS.iter().copied(), Duration::ZERO),
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
}

#[async_trait]
impl Device for QuadKey {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    #[instrument(skip(self), fields(port = %self.model.port()), err)]
    async fn initialize(&mut self) -> Result<()> {
        self.model.initialize().await?;
        tracing::info!("QuadKey ready");
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

/// Factory for [`QuadKey`] devices.
pub struct QuadKeyFactory;

impl DriverFactory for QuadKeyFactory {
    fn driver_type(&self) -> &'static str {
        "bartels_quadkey"
    }

    fn name(&self) -> &'static str {
        "Bartels QuadKey Arduino Pump Controller"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: LinkConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Box<dyn Device>>> {
        Box::pin(async move {
            let cfg: LinkConfig = config.try_into().context("Invalid QuadKey config")?;
            let mut pump = QuadKey::new(cfg.connector()).with_answer_timeout(cfg.answer_timeout());
            pump.set_port(&cfg.port)?;
            Ok(Box::new(pump) as Box<dyn Device>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlink_core::mock_serial;

    #[test]
    fn test_property_table() {
        let (connector, _harness) = mock_serial::connector();
        let pump = QuadKey::new(Box::new(connector));
        assert_eq!(
            pump.property_names(),
            vec![
                "Port",
                "Name",
                "Description",
                "Selected pumps",
                "Pump 1 voltage (V)",
                "Pump 2 voltage (V)",
                "Pump 3 voltage (V)",
                "Pump 4 voltage (V)",
            ]
        );
        assert_eq!(pump.model().cached("Name"), Some(Value::from("Bartels_QuadKey")));
        assert_eq!(pump.model().cached("Pump 3 voltage (V)"), Some(Value::Float(0.0)));
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = QuadKeyFactory;
        assert_eq!(factory.driver_type(), "bartels_quadkey");
    }

    #[tokio::test]
    async fn test_factory_validate_and_build() {
        let factory = QuadKeyFactory;

        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyACM0"
        });
        assert!(factory.validate(&valid).is_ok());

        let invalid = toml::Value::Table(toml::toml! {
            baud_rate = 9600
        });
        assert!(factory.validate(&invalid).is_err());

        let mut device = factory.build(valid).await.unwrap();
        assert_eq!(device.name(), "Bartels_QuadKey");
        assert_eq!(
            device.get_property("Port").await.unwrap(),
            Value::from("/dev/ttyACM0")
        );
    }
}
