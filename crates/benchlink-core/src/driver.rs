//! Driver factories and their registry.
//!
//! Each driver crate exposes one [`DriverFactory`] per instrument family. The
//! host registers them in a [`DriverRegistry`] and builds devices from the
//! `[[devices]]` entries of its configuration:
//!
//! ```toml
//! [[devices]]
//! id = "incubator"
//! type = "open_incubate"
//!
//! [devices.config]
//! port = "/dev/ttyACM0"
//! ```
//!
//! Factories receive the `config` table as a `toml::Value` and deserialize it
//! into their own typed config with `try_into`.

use crate::device::Device;
use crate::executor::DEFAULT_ANSWER_TIMEOUT;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Baud rate used when a config does not name one.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Builds devices of one family from configuration.
///
/// Factories are registered once and live for the program's lifetime.
/// `build` must not open the port; that happens in [`Device::initialize`].
pub trait DriverFactory: Send + Sync + 'static {
    /// Value of the `type` field this factory handles.
    fn driver_type(&self) -> &'static str;

    /// Human-readable family name.
    fn name(&self) -> &'static str;

    /// Check `config` without building anything.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Build an uninitialized device with its port assigned.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Box<dyn Device>>>;
}

/// Serial link settings shared by every family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM5")
    pub port: String,
    /// Baud rate (default 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Optional answer timeout in milliseconds (default 1000)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl LinkConfig {
    /// Answer timeout, falling back to the default.
    pub fn answer_timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ANSWER_TIMEOUT)
    }

    /// Connector opening real serial ports at the configured baud rate.
    #[cfg(feature = "serial")]
    pub fn connector(&self) -> Box<dyn crate::transport::Connector> {
        Box::new(crate::transport::SerialConnector::new(self.baud_rate))
    }
}

/// Registered driver factories keyed by driver type.
#[derive(Default)]
pub struct DriverRegistry {
    factories: RwLock<HashMap<&'static str, Arc<dyn DriverFactory>>>,
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory`, replacing any factory with the same type.
    pub fn register(&self, factory: impl DriverFactory) {
        let driver_type = factory.driver_type();
        if self
            .factories
            .write()
            .insert(driver_type, Arc::new(factory))
            .is_some()
        {
            tracing::warn!(driver_type, "Replaced previously registered driver factory");
        }
    }

    /// Factory for `driver_type`.
    pub fn get(&self, driver_type: &str) -> Option<Arc<dyn DriverFactory>> {
        self.factories.read().get(driver_type).cloned()
    }

    /// Registered `(type, name)` pairs, sorted by type.
    pub fn driver_types(&self) -> Vec<(&'static str, &'static str)> {
        let mut types: Vec<_> = self
            .factories
            .read()
            .values()
            .map(|f| (f.driver_type(), f.name()))
            .collect();
        types.sort_unstable();
        types
    }

    /// Validate `config` with the factory for `driver_type`.
    pub fn validate(&self, driver_type: &str, config: &toml::Value) -> Result<()> {
        self.lookup(driver_type)?.validate(config)
    }

    /// Validate and build a device of `driver_type`.
    pub async fn build(&self, driver_type: &str, config: toml::Value) -> Result<Box<dyn Device>> {
        let factory = self.lookup(driver_type)?;
        factory.validate(&config)?;
        factory.build(config).await
    }

    fn lookup(&self, driver_type: &str) -> Result<Arc<dyn DriverFactory>> {
        self.get(driver_type)
            .ok_or_else(|| anyhow!("unknown driver type '{}'", driver_type))
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("driver_types", &self.driver_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFactory;

    impl DriverFactory for NullFactory {
        fn driver_type(&self) -> &'static str {
            "null"
        }

        fn name(&self) -> &'static str {
            "Null device"
        }

        fn validate(&self, config: &toml::Value) -> Result<()> {
            let _: LinkConfig = config.clone().try_into()?;
            Ok(())
        }

        fn build(&self, _config: toml::Value) -> BoxFuture<'static, Result<Box<dyn Device>>> {
            Box::pin(async { Err(anyhow!("null devices cannot be built")) })
        }
    }

    #[test]
    fn link_config_defaults() {
        let config = toml::Value::Table(toml::toml! {
            port = "/dev/ttyACM0"
        });
        let link: LinkConfig = config.try_into().unwrap();
        assert_eq!(link.baud_rate, 9600);
        assert_eq!(link.answer_timeout(), Duration::from_millis(1000));

        let config = toml::Value::Table(toml::toml! {
            port = "COM5"
            baud_rate = 115200
            timeout_ms = 250
        });
        let link: LinkConfig = config.try_into().unwrap();
        assert_eq!(link.baud_rate, 115_200);
        assert_eq!(link.answer_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn registry_lists_and_validates() {
        let registry = DriverRegistry::new();
        registry.register(NullFactory);

        assert_eq!(registry.driver_types(), vec![("null", "Null device")]);
        assert!(registry.get("null").is_some());

        let valid = toml::Value::Table(toml::toml! { port = "COM5" });
        let missing_port = toml::Value::Table(toml::toml! { baud_rate = 9600 });
        assert!(registry.validate("null", &valid).is_ok());
        assert!(registry.validate("null", &missing_port).is_err());
        assert!(registry.validate("nope", &valid).is_err());
    }

    #[tokio::test]
    async fn build_reports_unknown_type_and_factory_errors() {
        let registry = DriverRegistry::new();
        registry.register(NullFactory);

        let config = toml::Value::Table(toml::toml! { port = "COM5" });
        let err = registry.build("nope", config.clone()).await.err().unwrap();
        assert!(err.to_string().contains("unknown driver type"));

        let err = registry.build("null", config).await.err().unwrap();
        assert!(err.to_string().contains("cannot be built"));
    }
}
