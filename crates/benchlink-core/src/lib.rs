//! `benchlink-core`
//!
//! Command/response protocol core for serial bench instruments: pumps, LED
//! strips and incubators driven by small microcontroller firmwares that speak
//! one ASCII command per line.
//!
//! ## Layers
//!
//! - **[`codec`]**: pure command encoding and reply decoding per family
//! - **[`transport`]**: purge / write line / read until, over any async stream
//! - **[`executor`]**: one serialized round trip with an answer timeout
//! - **[`parameter`]**: declarative parameter tables with cached values
//! - **[`model`]**: session, parameters, settle timer and link of one device
//! - **[`device`]** / **[`driver`]**: the host surface and driver factories
//!
//! ## Example
//!
//! ```rust,ignore
//! use benchlink_core::codec::Value;
//! use benchlink_core::device::Device;
//!
//! device.set_property("Port", Value::from("/dev/ttyACM0")).await?;
//! device.initialize().await?;
//! device.set_property("Setpoint [C]", Value::Float(37.0)).await?;
//! ```

pub mod codec;
pub mod device;
pub mod driver;
pub mod error;
pub mod executor;
pub mod model;
pub mod parameter;
pub mod session;
pub mod settle;
pub mod transport;

/// Scriptable serial port for driver tests.
#[cfg(any(test, feature = "testing"))]
#[allow(clippy::panic, clippy::expect_used)]
pub mod mock_serial;

pub use codec::{Codec, Value};
pub use device::{Device, Hub};
pub use driver::{DriverFactory, DriverRegistry, LinkConfig};
pub use error::{ExecError, ParameterError, ProtocolError};
pub use executor::CommandExecutor;
pub use model::DeviceModel;
pub use parameter::{ParamSpec, ParameterTable};
pub use session::{DeviceSession, PORT};
