//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/cornerstone130.toml` (base configuration)
//! 2. Environment variables prefixed with `CS130_`, nested keys separated by `__`
//!    (e.g. `CS130_DEVICE__POLLING_PERIOD_MS=250`)
//!
//! # Example
//! ```no_run
//! use cornerstone130::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Transport: {}", config.transport.resource);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::device::{FilterDefinition, GratingDefinition};
use crate::error::{AppResult, DeviceError};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/cornerstone130.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub application: ApplicationConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub gratings: Vec<GratingDefinition>,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Visa,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Visa => write!(f, "visa"),
        }
    }
}

/// Where and how to reach the instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Serial port path or VISA resource string.
    pub resource: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Bus-level timeout for one exchange.
    #[serde(default = "default_transport_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
}

/// Timing and behaviour of the control actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_polling_period")]
    pub polling_period_ms: u64,
    /// Pause between a write and the next read.
    #[serde(default = "default_read_delay")]
    pub read_delay_ms: u64,
    #[serde(default = "default_grating_delay")]
    pub grating_write_delay_ms: u64,
    #[serde(default = "default_filter_delay")]
    pub filter_write_delay_ms: u64,
    /// Settle time for a move across the whole wavelength range.
    #[serde(default = "default_wavelength_delay")]
    pub wavelength_write_delay_ms: u64,
    /// Wavelength span used for move-time estimation until a grating definition applies.
    #[serde(default = "default_wavelength_range")]
    pub wavelength_range: f64,
    /// How long a caller waits for the actor to acknowledge a command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_open_timeout")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Write configured grating and filter labels to the instrument on open.
    #[serde(default)]
    pub write_labels_on_open: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            polling_period_ms: default_polling_period(),
            read_delay_ms: default_read_delay(),
            grating_write_delay_ms: default_grating_delay(),
            filter_write_delay_ms: default_filter_delay(),
            wavelength_write_delay_ms: default_wavelength_delay(),
            wavelength_range: default_wavelength_range(),
            command_timeout_ms: default_command_timeout(),
            open_timeout_ms: default_open_timeout(),
            mailbox_capacity: default_mailbox_capacity(),
            write_labels_on_open: false,
        }
    }
}

impl DeviceConfig {
    pub fn polling_period(&self) -> Duration {
        Duration::from_millis(self.polling_period_ms)
    }

    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }

    pub fn grating_write_delay(&self) -> Duration {
        Duration::from_millis(self.grating_write_delay_ms)
    }

    pub fn filter_write_delay(&self) -> Duration {
        Duration::from_millis(self.filter_write_delay_ms)
    }

    pub fn wavelength_write_delay(&self) -> Duration {
        Duration::from_millis(self.wavelength_write_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_transport_timeout() -> u64 {
    1000
}

fn default_line_terminator() -> String {
    "\r\n".to_string()
}

fn default_polling_period() -> u64 {
    500
}

fn default_read_delay() -> u64 {
    50
}

fn default_grating_delay() -> u64 {
    12000
}

fn default_filter_delay() -> u64 {
    3000
}

fn default_wavelength_delay() -> u64 {
    5000
}

fn default_wavelength_range() -> f64 {
    1200.0
}

fn default_command_timeout() -> u64 {
    1000
}

fn default_open_timeout() -> u64 {
    5000
}

fn default_mailbox_capacity() -> usize {
    32
}

impl AppConfig {
    /// Load configuration from `config/cornerstone130.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, with `CS130_` environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CS130_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DeviceError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.transport.resource.trim().is_empty() {
            return Err(DeviceError::Configuration(
                "transport.resource must not be empty".to_string(),
            ));
        }

        let device = &self.device;
        if device.polling_period_ms == 0 {
            return Err(DeviceError::Configuration(
                "device.polling_period_ms must be greater than 0".to_string(),
            ));
        }
        if device.command_timeout_ms == 0 {
            return Err(DeviceError::Configuration(
                "device.command_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !(device.wavelength_range.is_finite() && device.wavelength_range > 0.0) {
            return Err(DeviceError::Configuration(format!(
                "Invalid wavelength_range {}. Must be positive",
                device.wavelength_range
            )));
        }
        if device.mailbox_capacity == 0 {
            return Err(DeviceError::Configuration(
                "device.mailbox_capacity must be greater than 0".to_string(),
            ));
        }

        let mut numbers = HashSet::new();
        for grating in &self.gratings {
            if !numbers.insert(grating.number) {
                return Err(DeviceError::Configuration(format!(
                    "Duplicate grating number: {}",
                    grating.number
                )));
            }
            if grating.min_wavelength >= grating.max_wavelength {
                return Err(DeviceError::Configuration(format!(
                    "Grating {}: min_wavelength {} must be below max_wavelength {}",
                    grating.number, grating.min_wavelength, grating.max_wavelength
                )));
            }
        }

        let mut numbers = HashSet::new();
        for filter in &self.filters {
            if !numbers.insert(filter.number) {
                return Err(DeviceError::Configuration(format!(
                    "Duplicate filter number: {}",
                    filter.number
                )));
            }
        }

        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DeviceError::Configuration(e.to_string()))
    }
}
