//! Host-facing device abstraction.
//!
//! Every instrument family implements [`Device`]. Hosts (the CLI, tests, an
//! acquisition engine) only ever see `Box<dyn Device>`. Families with child
//! devices additionally implement [`Hub`].

use crate::codec::Value;
use crate::error::ParameterError;
use async_trait::async_trait;

/// One instrument reachable over a serial link.
///
/// All mutating calls take `&mut self`, so a device never runs two
/// exchanges at once. Share it across tasks with `tokio::sync::Mutex`.
#[async_trait]
pub trait Device: Send {
    /// Device name as registered with the host.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    /// Open the link and run the family's handshake.
    ///
    /// Calling it on an initialized device is a no-op.
    async fn initialize(&mut self) -> anyhow::Result<()>;

    /// Mark the device uninitialized. No command is sent.
    async fn shutdown(&mut self) -> anyhow::Result<()>;

    /// True while the instrument is settling after a command.
    fn busy(&self) -> bool;

    /// Names of all properties, `Port` first.
    fn property_names(&self) -> Vec<&'static str>;

    /// Parse user input for `name` into a typed value.
    fn parse_value(&self, name: &str, text: &str) -> Result<Value, ParameterError>;

    /// Read a property.
    async fn get_property(&mut self, name: &str) -> Result<Value, ParameterError>;

    /// Write a property, returning the value now visible.
    async fn set_property(&mut self, name: &str, value: Value) -> Result<Value, ParameterError>;

    /// Hub view, for devices that own child devices.
    fn as_hub(&mut self) -> Option<&mut dyn Hub> {
        None
    }
}

/// A device that owns addressable children sharing its link.
#[async_trait]
pub trait Hub: Send {
    /// Number of children discovered during initialize.
    fn child_count(&self) -> usize;

    /// Name of child `index`.
    fn child_name(&self, index: usize) -> Option<String>;

    /// Property names of a child.
    fn child_property_names(&self) -> Vec<&'static str>;

    /// Parse user input for a child property.
    fn parse_child_value(&self, index: usize, name: &str, text: &str) -> Result<Value, ParameterError>;

    /// Read a child property through the hub's link.
    async fn get_child_property(&mut self, index: usize, name: &str) -> Result<Value, ParameterError>;

    /// Write a child property through the hub's link.
    async fn set_child_property(
        &mut self,
        index: usize,
        name: &str,
        value: Value,
    ) -> Result<Value, ParameterError>;
}
