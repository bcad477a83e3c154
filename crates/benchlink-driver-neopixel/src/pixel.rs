//! Single LEDs of an RGBW strip.
//!
//! Pixels have no link of their own. The hub keeps one [`ParameterTable`]
//! per pixel and hands out [`PixelMut`] handles that borrow the hub and send
//! through its executor.

use benchlink_core::codec::Value;
use benchlink_core::error::ParameterError;
use benchlink_core::model::DeviceModel;
use benchlink_core::parameter::{ParamSpec, ParameterTable};

/// Name prefix of pixel children; the index follows (`RGBW0`, `RGBW1`, ...).
pub const PIXEL_PREFIX: &str = "RGBW";

/// Description shared by all pixels.
pub const PIXEL_DESCRIPTION: &str = "single Neopixel RGBW LED from the strip Hub";

/// Read-only property holding the pixel's position on the strip.
pub const PIXEL_INDEX: &str = "Pixel index";

/// Colour channels, in firmware order. Each is also the command code.
pub const CHANNELS: [&str; 4] = ["R", "G", "B", "W"];

const fn channel(code: &'static str, index: u32) -> ParamSpec {
    ParamSpec::integer(code, 0, u8::MAX as i64, 0)
        .at(index)
        .command(code)
        .queried(code)
}

fn pixel_parameters(index: u32, count: u32) -> Vec<ParamSpec> {
    let mut specs = vec![ParamSpec::integer(PIXEL_INDEX, 0, i64::from(count), i64::from(index)).read_only()];
    specs.extend(CHANNELS.map(|code| channel(code, index)));
    specs
}

/// Arena slot for one pixel.
#[derive(Debug)]
pub(crate) struct PixelSlot {
    name: String,
    params: ParameterTable,
}

impl PixelSlot {
    pub(crate) fn new(index: u32, count: u32) -> Self {
        Self {
            name: format!("{}{}", PIXEL_PREFIX, index),
            params: ParameterTable::new(pixel_parameters(index, count)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn parse_value(&self, name: &str, text: &str) -> Result<Value, ParameterError> {
        let spec = self
            .params
            .spec(name)
            .ok_or_else(|| ParameterError::Unknown(name.to_string()))?;
        spec.kind.parse_input(name, text)
    }
}

/// Mutable handle to one pixel, borrowing its hub.
#[derive(Debug)]
pub struct PixelMut<'a> {
    index: usize,
    slot: &'a PixelSlot,
    hub: &'a mut DeviceModel,
}

impl<'a> PixelMut<'a> {
    pub(crate) fn new(index: usize, slot: &'a PixelSlot, hub: &'a mut DeviceModel) -> Self {
        Self { index, slot, hub }
    }

    /// Position on the strip.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Child name, e.g. `RGBW3`.
    pub fn name(&self) -> &str {
        self.slot.name()
    }

    /// Child description.
    pub fn description(&self) -> &str {
        PIXEL_DESCRIPTION
    }

    /// Property names.
    pub fn property_names(&self) -> Vec<&'static str> {
        self.slot.params.names().collect()
    }

    /// Cached value of a channel or the index.
    pub fn cached(&self, name: &str) -> Option<Value> {
        self.slot.params.cached(name)
    }

    /// Read a channel from the strip.
    pub async fn get(&mut self, name: &str) -> Result<Value, ParameterError> {
        let (exec, _) = self.hub.link_mut();
        self.slot.params.get(name, exec).await
    }

    /// Write a channel; the value the firmware reports back is cached.
    pub async fn set(&mut self, name: &str, value: Value) -> Result<Value, ParameterError> {
        let (exec, settle) = self.hub.link_mut();
        self.slot.params.set(name, value, exec, settle).await
    }

    /// Set all four channels, stopping at the first failure.
    pub async fn set_rgbw(&mut self, rgbw: [u8; 4]) -> Result<(), ParameterError> {
        for (code, level) in CHANNELS.iter().zip(rgbw) {
            self.set(code, Value::Int(i64::from(level))).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_table_is_built_from_template() {
        let slot = PixelSlot::new(3, 8);
        assert_eq!(slot.name(), "RGBW3");
        assert_eq!(
            slot.params.names().collect::<Vec<_>>(),
            vec!["Pixel index", "R", "G", "B", "W"]
        );
        assert_eq!(slot.params.cached(PIXEL_INDEX), Some(Value::Int(3)));

        let red = slot.params.spec("R").unwrap();
        assert_eq!(red.target, Some(3));
        assert!(red.is_hardware_authoritative());
        assert!(slot.params.spec(PIXEL_INDEX).unwrap().is_read_only());
    }

    #[test]
    fn channel_input_is_parsed_as_integer() {
        let slot = PixelSlot::new(0, 1);
        assert_eq!(slot.parse_value("G", "42").unwrap(), Value::Int(42));
        assert!(slot.parse_value("G", "bright").is_err());
        assert!(matches!(
            slot.parse_value("X", "1"),
            Err(ParameterError::Unknown(_))
        ));
    }
}
