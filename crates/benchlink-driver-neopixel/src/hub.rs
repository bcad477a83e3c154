//! NeoPixel RGBW strip hub.
//!
//! The hub owns the serial link to the Arduino driving the strip. During
//! initialize it waits out the bootloader, asks the firmware how many pixels
//! the strip has (`0N?`) and creates one pixel child per index.
//!
//! Protocol reference:
//! - Terminator: `\n` (LF), replies are one line
//! - Query: `<target><code>?`, set: `<target><code><value>`
//! - Every reply carries the value the firmware actually applied
//! - Errors come back as `Err: <message>`

use crate::pixel::{PixelMut, PixelSlot, PIXEL_PREFIX};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use benchlink_core::codec::{Codec, CommandFormat, ResponseShape, Terminator, Value};
use benchlink_core::device::{Device, Hub};
use benchlink_core::driver::{DriverFactory, LinkConfig};
use benchlink_core::error::ParameterError;
use benchlink_core::model::DeviceModel;
use benchlink_core::parameter::ParamSpec;
use benchlink_core::transport::Connector;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// Device name used for registration.
pub const HUB_NAME: &str = "RGBW Hub";

const HUB_DESCRIPTION: &str = "Hub for a strip of Neopixel RGBW LEDs";

/// Read-only property holding the strip length.
pub const PIXEL_NUMBER: &str = "Pixel number";

/// Global brightness property.
pub const BRIGHTNESS: &str = "Brightness level";

/// Time the Arduino spends in its bootloader after the port opens.
pub const DEFAULT_BOOT_DELAY: Duration = Duration::from_secs(2);

const CODEC: Codec = Codec::new(CommandFormat::Addressed, ResponseShape::Bare, Terminator::Lf)
    .with_error_prefix("Err:");

const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::text("Name", HUB_NAME),
    ParamSpec::text("Description", HUB_DESCRIPTION),
    ParamSpec::integer(PIXEL_NUMBER, 0, u16::MAX as i64, 0)
        .at(0)
        .queried("N")
        .read_only(),
    ParamSpec::integer(BRIGHTNESS, 0, u8::MAX as i64, 0)
        .at(0)
        .command("L")
        .queried("L"),
];

/// RGBW strip hub with its pixel children.
#[derive(Debug)]
pub struct RgbwHub {
    model: DeviceModel,
    boot_delay: Duration,
    pixels: Vec<PixelSlot>,
}

impl RgbwHub {
    /// Uninitialized hub opening its port through `connector`.
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            model: DeviceModel::new(connector, CODEC, PARAMETERS.iter().copied(), Duration::ZERO),
            boot_delay: DEFAULT_BOOT_DELAY,
            pixels: Vec::new(),
        }
    }

    /// Bound on how long one reply may take.
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.model = self.model.with_answer_timeout(timeout);
        self
    }

    /// Wait after opening the port before the first command.
    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    /// Assign the serial port. Only allowed before initialize.
    pub fn set_port(&mut self, port: &str) -> Result<(), ParameterError> {
        self.model.set_port(port)
    }

    /// Shared hub state.
    pub fn model(&self) -> &DeviceModel {
        &self.model
    }

    /// Number of pixels discovered during initialize.
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// Handle to pixel `index`, sending through this hub's link.
    pub fn pixel(&mut self, index: usize) -> Option<PixelMut<'_>> {
        let slot = self.pixels.get(index)?;
        Some(PixelMut::new(index, slot, &mut self.model))
    }

    fn missing_pixel(index: usize) -> ParameterError {
        ParameterError::Unknown(format!("{}{}", PIXEL_PREFIX, index))
    }
}

#[async_trait]
impl Device for RgbwHub {
    fn name(&self) -> &str {
        HUB_NAME
    }

    fn description(&self) -> &str {
        HUB_DESCRIPTION
    }

    #[instrument(skip(self), fields(port = %self.model.port()), err)]
    async fn initialize(&mut self) -> Result<()> {
        if self.model.is_initialized() {
            return Ok(());
        }

        self.model.open().await?;
        tokio::time::sleep(self.boot_delay).await;

        let count = self
            .model
            .get(PIXEL_NUMBER)
            .await
            .context("Failed to read pixel count")?;
        let count = count
            .as_int()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| anyhow!("invalid pixel count {}", count))?;

        self.pixels = (0..count).map(|index| PixelSlot::new(index, count)).collect();
        self.model.finish_initialize();
        tracing::info!(pixels = count, "RGBW hub ready");
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

    fn as_hub(&mut self) -> Option<&mut dyn Hub> {
        Some(self)
    }
}

#[async_trait]
impl Hub for RgbwHub {
    fn child_count(&self) -> usize {
        self.pixel_count()
    }

    fn child_name(&self, index: usize) -> Option<String> {
        self.pixels.get(index).map(|slot| slot.name().to_string())
    }

    fn child_property_names(&self) -> Vec<&'static str> {
        let mut names = vec![crate::pixel::PIXEL_INDEX];
        names.extend(crate::pixel::CHANNELS);
        names
    }

    fn parse_child_value(&self, index: usize, name: &str, text: &str) -> Result<Value, ParameterError> {
        let slot = self.pixels.get(index).ok_or_else(|| Self::missing_pixel(index))?;
        slot.parse_value(name, text)
    }

    async fn get_child_property(&mut self, index: usize, name: &str) -> Result<Value, ParameterError> {
        let mut pixel = self.pixel(index).ok_or_else(|| Self::missing_pixel(index))?;
        pixel.get(name).await
    }

    async fn set_child_property(
        &mut self,
        index: usize,
        name: &str,
        value: Value,
    ) -> Result<Value, ParameterError> {
        let mut pixel = self.pixel(index).ok_or_else(|| Self::missing_pixel(index))?;
        pixel.set(name, value).await
    }
}

/// Configuration for the RGBW hub driver.
#[derive(Debug, Clone, Deserialize)]
pub struct RgbwHubConfig {
    /// Serial link settings
    #[serde(flatten)]
    pub link: LinkConfig,
    /// Optional bootloader wait in milliseconds (default: 2000)
    #[serde(default)]
    pub boot_delay_ms: Option<u64>,
}

/// Factory for [`RgbwHub`] devices.
pub struct RgbwHubFactory;

impl DriverFactory for RgbwHubFactory {
    fn driver_type(&self) -> &'static str {
        "neopixel_rgbw"
    }

    fn name(&self) -> &'static str {
        "NeoPixel RGBW LED Strip Hub"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: RgbwHubConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Box<dyn Device>>> {
        Box::pin(async move {
            let cfg: RgbwHubConfig = config.try_into().context("Invalid RGBW hub config")?;
            let boot_delay = cfg
                .boot_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BOOT_DELAY);
            let mut hub = RgbwHub::new(cfg.link.connector())
                .with_answer_timeout(cfg.link.answer_timeout())
                .with_boot_delay(boot_delay);
            hub.set_port(&cfg.link.port)?;
            Ok(Box::new(hub) as Box<dyn Device>)
        })
    }
}
