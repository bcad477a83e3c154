//! Command-line host for benchlink instrument drivers.
//!
//! Devices are declared in `config/benchlink.toml`; every command that
//! touches hardware builds the named device, initializes it, runs one
//! exchange and shuts it down again.
//!
//! # Usage
//!
//! ```bash
//! benchlink list
//! benchlink ports
//! benchlink props incubator
//! benchlink set incubator "Setpoint [C]" 36.5
//! benchlink pixel-set strip 3 R 255
//! ```

mod config;
mod logging;

use anyhow::{anyhow, Context, Result};
use benchlink_core::device::Device;
use benchlink_core::driver::DriverRegistry;
use clap::{Parser, Subcommand};
use config::{BenchConfig, DEFAULT_CONFIG_PATH};
use logging::TracingConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Level;

#[derive(Parser)]
#[command(name = "benchlink")]
#[command(about = "Serial bench instrument control", long_about = None)]
struct Cli {
    /// Configuration file (TOML format)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level regardless of the configuration
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered drivers and configured devices
    List,

    /// List serial ports present on this machine
    Ports,

    /// Show every property of a device
    Props {
        /// Device ID from the configuration
        device: String,
    },

    /// Read one property
    Get {
        /// Device ID from the configuration
        device: String,
        /// Property name, e.g. "Setpoint [C]"
        property: String,
    },

    /// Write one property
    Set {
        /// Device ID from the configuration
        device: String,
        /// Property name
        property: String,
        /// New value, parsed according to the property's type
        value: String,
        /// Wait until the device stops settling
        #[arg(long)]
        wait: bool,
    },

    /// Read a property of one pixel of an RGBW hub
    PixelGet {
        /// Hub device ID
        device: String,
        /// Pixel index
        pixel: usize,
        /// Channel (R, G, B, W) or "Pixel index"
        property: String,
    },

    /// Write a property of one pixel of an RGBW hub
    PixelSet {
        /// Hub device ID
        device: String,
        /// Pixel index
        pixel: usize,
        /// Channel (R, G, B, W)
        property: String,
        /// New level, 0-255
        value: String,
    },
}

type SharedDevice = Arc<Mutex<Box<dyn Device>>>;

/// Devices built from the configuration, keyed by ID.
///
/// Building does not open any port; only the device a command names is
/// initialized.
struct Devices {
    devices: HashMap<String, SharedDevice>,
}

impl Devices {
    async fn build(registry: &DriverRegistry, config: &BenchConfig) -> Result<Self> {
        let mut devices = HashMap::new();
        for def in config.enabled_devices() {
            let device = registry
                .build(&def.r#type, def.config.clone())
                .await
                .with_context(|| format!("Failed to build device '{}'", def.id))?;
            tracing::debug!(id = %def.id, driver = %def.r#type, "Device built");
            devices.insert(def.id.clone(), Arc::new(Mutex::new(device)));
        }
        Ok(Self { devices })
    }

    /// Look up `id` and initialize it.
    async fn open(&self, id: &str) -> Result<SharedDevice> {
        let device = self
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("No enabled device '{}' in configuration", id))?;
        device
            .lock()
            .await
            .initialize()
            .await
            .with_context(|| format!("Failed to initialize '{}'", id))?;
        Ok(device)
    }
}

fn registry() -> DriverRegistry {
    benchlink_driver_bartels::link();
    benchlink_driver_neopixel::link();
    benchlink_driver_incubate::link();

    let registry = DriverRegistry::new();
    registry.register(benchlink_driver_bartels::QuadKeyFactory);
    registry.register(benchlink_driver_bartels::QkppFactory);
    registry.register(benchlink_driver_neopixel::RgbwHubFactory);
    registry.register(benchlink_driver_incubate::OpenIncubateFactory);
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BenchConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate()?;

    let mut tracing_config = TracingConfig::from_application(&config.application)?;
    if cli.verbose {
        tracing_config = tracing_config.with_level(Level::DEBUG);
    }
    logging::init(tracing_config)?;

    let registry = registry();
    for def in &config.devices {
        registry
            .validate(&def.r#type, &def.config)
            .with_context(|| format!("Invalid configuration for device '{}'", def.id))?;
    }

    match cli.command {
        Commands::List => list(&registry, &config),
        Commands::Ports => ports(),
        command => {
            let devices = Devices::build(&registry, &config).await?;
            run(&devices, command).await
        }
    }
}

fn list(registry: &DriverRegistry, config: &BenchConfig) -> Result<()> {
    println!("Drivers:");
    for (driver_type, name) in registry.driver_types() {
        println!("  {:<16} {}", driver_type, name);
    }

    println!("Devices:");
    for def in &config.devices {
        let state = if def.enabled { "" } else { " (disabled)" };
        println!("  {:<16} {}{}", def.id, def.r#type, state);
    }
    Ok(())
}

fn ports() -> Result<()> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let kind = match port.port_type {
            serialport::SerialPortType::UsbPort(info) => format!(
                "USB {:04x}:{:04x} {}",
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            serialport::SerialPortType::PciPort => "PCI".to_string(),
            serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            serialport::SerialPortType::Unknown => "unknown".to_string(),
        };
        println!("  {:<24} {}", port.port_name, kind);
    }
    Ok(())
}

async fn run(devices: &Devices, command: Commands) -> Result<()> {
    match command {
        Commands::Props { device } => {
            let shared = devices.open(&device).await?;
            let mut dev = shared.lock().await;
            println!("{} ({})", dev.name(), dev.description());
            for name in dev.property_names() {
                match dev.get_property(name).await {
                    Ok(value) => println!("  {:<24} {}", name, value),
                    Err(e) => println!("  {:<24} <{}>", name, e),
                }
            }
            if let Some(hub) = dev.as_hub() {
                let children: Vec<String> =
                    (0..hub.child_count()).filter_map(|i| hub.child_name(i)).collect();
                println!("  children: {}", children.join(", "));
            }
            dev.shutdown().await
        }
        Commands::Get { device, property } => {
            let shared = devices.open(&device).await?;
            let mut dev = shared.lock().await;
            let value = dev.get_property(&property).await?;
            println!("{}", value);
            dev.shutdown().await
        }
        Commands::Set {
            device,
            property,
            value,
            wait,
        } => {
            let shared = devices.open(&device).await?;
            let applied = {
                let mut dev = shared.lock().await;
                let value = dev.parse_value(&property, &value)?;
                dev.set_property(&property, value).await?
            };
            println!("{}", applied);
            if wait {
                wait_idle(&shared).await;
            }
            let result = shared.lock().await.shutdown().await;
            result
        }
        Commands::PixelGet {
            device,
            pixel,
            property,
        } => {
            let shared = devices.open(&device).await?;
            let mut dev = shared.lock().await;
            let hub = dev
                .as_hub()
                .ok_or_else(|| anyhow!("Device '{}' has no pixels", device))?;
            let value = hub.get_child_property(pixel, &property).await?;
            println!("{}", value);
            dev.shutdown().await
        }
        Commands::PixelSet {
            device,
            pixel,
            property,
            value,
        } => {
            let shared = devices.open(&device).await?;
            let mut dev = shared.lock().await;
            let hub = dev
                .as_hub()
                .ok_or_else(|| anyhow!("Device '{}' has no pixels", device))?;
            let value = hub.parse_child_value(pixel, &property, &value)?;
            let applied = hub.set_child_property(pixel, &property, value).await?;
            println!("{}", applied);
            dev.shutdown().await
        }
        Commands::List | Commands::Ports => Ok(()),
    }
}

/// Poll `busy()` without holding the lock between polls.
async fn wait_idle(device: &SharedDevice) {
    const POLL: std::time::Duration = std::time::Duration::from_millis(10);
    while device.lock().await.busy() {
        tokio::time::sleep(POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_every_family() {
        let types: Vec<_> = registry().driver_types().into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            types,
            vec!["bartels_qkpp", "bartels_quadkey", "neopixel_rgbw", "open_incubate"]
        );
    }

    #[test]
    fn test_cli_parses_pixel_set() {
        let cli = Cli::try_parse_from(["benchlink", "pixel-set", "strip", "3", "R", "255"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::PixelSet { pixel: 3, ref property, .. } if property == "R"
        ));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[tokio::test]
    async fn test_devices_build_without_opening_ports() {
        let config: BenchConfig = toml::from_str(
            r#"
            [[devices]]
            id = "incubator"
            type = "open_incubate"
            [devices.config]
            port = "/dev/does-not-exist"

            [[devices]]
            id = "strip"
            type = "neopixel_rgbw"
            enabled = false
            [devices.config]
            port = "/dev/does-not-exist"
            "#,
        )
        .unwrap();

        let devices = Devices::build(&registry(), &config).await.unwrap();
        assert_eq!(devices.devices.len(), 1);
        assert!(devices.open("strip").await.is_err());
    }
}
