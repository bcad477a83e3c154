//! NeoPixel RGBW LED strip driver for benchlink.
//!
//! One hub device owns the serial link; each LED on the strip is a pixel
//! child addressed by its index.
//!
//! # Usage
//!
//! ```rust,ignore
//! use benchlink_driver_neopixel::RgbwHub;
//!
//! let mut hub = RgbwHub::new(connector);
//! hub.set_port("/dev/ttyACM0")?;
//! hub.initialize().await?;
//!
//! if let Some(mut pixel) = hub.pixel(3) {
//!     pixel.set_rgbw([255, 0, 0, 32]).await?;
//! }
//! ```

mod hub;
mod pixel;

pub use hub::{RgbwHub, RgbwHubConfig, RgbwHubFactory, BRIGHTNESS, DEFAULT_BOOT_DELAY, PIXEL_NUMBER};
pub use pixel::{PixelMut, CHANNELS, PIXEL_INDEX};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<RgbwHubFactory>());
}
