//! Response decoder
//!
//! Instrument answers carry trailing `\r\n` and sometimes padding; everything that is
//! whitespace or an ASCII control character is stripped from both ends before parsing.

use crate::error::{AppResult, DeviceError};
use crate::protocol::command::ShutterState;

/// Strip surrounding whitespace and control characters.
pub fn trim(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_control())
}

pub fn parse_integer(command: &str, raw: &str) -> AppResult<i64> {
    let value = trim(raw);
    value
        .parse::<i64>()
        .map_err(|_| DeviceError::protocol(command, format!("expected an integer, got '{value}'")))
}

/// Accessory positions (grating, filter) are small non-negative integers. `GRAT?` answers
/// `number,lines/mm,label`; only the leading field is the position.
pub fn parse_position(command: &str, raw: &str) -> AppResult<u16> {
    let leading = trim(raw).split(',').next().unwrap_or_default();
    let value = parse_integer(command, leading)?;
    u16::try_from(value)
        .map_err(|_| DeviceError::protocol(command, format!("position {value} out of range")))
}

/// Status byte and error codes are non-negative.
pub fn parse_code(command: &str, raw: &str) -> AppResult<u32> {
    let value = parse_integer(command, raw)?;
    u32::try_from(value)
        .map_err(|_| DeviceError::protocol(command, format!("code {value} out of range")))
}

pub fn parse_float(command: &str, raw: &str) -> AppResult<f64> {
    let value = trim(raw);
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(DeviceError::protocol(
            command,
            format!("expected a number, got '{value}'"),
        )),
    }
}

pub fn parse_shutter(command: &str, raw: &str) -> AppResult<ShutterState> {
    match trim(raw) {
        "O" => Ok(ShutterState::Open),
        "C" => Ok(ShutterState::Closed),
        other => Err(DeviceError::protocol(
            command,
            format!("unknown shutter token '{other}'"),
        )),
    }
}

/// Labels are returned as free text.
pub fn parse_label(raw: &str) -> String {
    trim(raw).to_string()
}
