//! Command encoder
//!
//! Every command is a fixed-format ASCII string. Numeric parameters are formatted with a
//! fixed number of decimals; text parameters (labels) are inserted verbatim with no
//! escaping, so a label containing a line terminator will corrupt the exchange. Callers
//! are expected to keep labels single-line and short (the instrument rejects long labels
//! with error 9).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

pub const GET_GRATING_NUMBER: &str = "GRAT?";
pub const GET_FILTER_NUMBER: &str = "FILTER?";
pub const GET_WAVELENGTH: &str = "WAVE?";
pub const GET_SHUTTER: &str = "SHUTTER?";
pub const SET_SHUTTER_OPEN: &str = "SHUTTER O";
pub const SET_SHUTTER_CLOSED: &str = "SHUTTER C";
pub const ABORT: &str = "ABORT";
pub const GET_INFO: &str = "INFO?";
pub const GET_STATUS_BYTE: &str = "STB?";
pub const GET_ERROR: &str = "ERROR?";

/// Shutter position as reported by `SHUTTER?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShutterState {
    Open,
    Closed,
    /// Nothing read yet.
    #[default]
    Unknown,
}

impl fmt::Display for ShutterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutterState::Open => write!(f, "open"),
            ShutterState::Closed => write!(f, "closed"),
            ShutterState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Operating unit for wavelength values (`UNITS` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingUnit {
    Nanometers,
    Micrometers,
    Wavenumbers,
}

impl OperatingUnit {
    /// Two-character code sent on the wire.
    pub fn code(self) -> &'static str {
        match self {
            OperatingUnit::Nanometers => "NM",
            OperatingUnit::Micrometers => "UM",
            OperatingUnit::Wavenumbers => "WN",
        }
    }
}

impl FromStr for OperatingUnit {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NM" => Ok(OperatingUnit::Nanometers),
            "UM" => Ok(OperatingUnit::Micrometers),
            // "WM" shows up in older operator notes for wavenumbers
            "WN" | "WM" => Ok(OperatingUnit::Wavenumbers),
            other => Err(DeviceError::Configuration(format!(
                "Unknown operating unit '{other}'. Must be one of: NM, UM, WN"
            ))),
        }
    }
}

pub fn set_grating_number(number: u16) -> String {
    format!("GRAT {number}")
}

pub fn get_grating_label(number: u16) -> String {
    format!("GRAT{number}LABEL?")
}

pub fn set_grating_label(number: u16, label: &str) -> String {
    format!("GRAT{number}LABEL {label}")
}

pub fn set_filter_number(number: u16) -> String {
    format!("FILTER {number}")
}

pub fn get_filter_label(number: u16) -> String {
    format!("FILTER{number}LABEL?")
}

pub fn set_filter_label(number: u16, label: &str) -> String {
    format!("FILTER{number}LABEL {label}")
}

/// `GOWAVE` takes the target in the current operating unit, six decimals.
pub fn go_wavelength(wavelength: f64) -> String {
    format!("GOWAVE {wavelength:.6}")
}

pub fn set_shutter(state: ShutterState) -> Option<&'static str> {
    match state {
        ShutterState::Open => Some(SET_SHUTTER_OPEN),
        ShutterState::Closed => Some(SET_SHUTTER_CLOSED),
        ShutterState::Unknown => None,
    }
}

pub fn set_unit(unit: OperatingUnit) -> String {
    format!("UNITS {:>2}", unit.code())
}

/// Serial links only: `HANDSHAKE 0` disables the per-command status handshake line.
pub fn set_handshake(enabled: bool) -> String {
    format!("HANDSHAKE {}", u8::from(enabled))
}
