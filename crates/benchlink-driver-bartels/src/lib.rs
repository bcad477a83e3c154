//! Bartels micropump drivers for benchlink.
//!
//! This crate provides drivers for two firmwares driving Bartels piezo
//! micropumps:
//! - QuadKey Arduino pump controller (echoing firmware, voltages only)
//! - QKPP piezo pump (runtimes, voltages, dispensing, continuous mode)
//!
//! # Usage
//!
//! Register the factories with your driver registry:
//!
//! ```rust,ignore
//! use benchlink_driver_bartels::{QkppFactory, QuadKeyFactory};
//!
//! registry.register(QuadKeyFactory);
//! registry.register(QkppFactory);
//! ```

mod qkpp;
mod quadkey;

pub use qkpp::{Qkpp, QkppFactory};
pub use quadkey::{QuadKey, QuadKeyFactory};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<QkppFactory>());
    std::hint::black_box(std::any::TypeId::of::<QuadKeyFactory>());
}
