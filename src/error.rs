//! Custom error types for the controller.
//!
//! This module defines `DeviceError`, the single error type returned by every public
//! operation of the crate. Using the `thiserror` crate, it provides a consistent way to
//! report the different ways a monochromator exchange can go wrong.
//!
//! ## Error Hierarchy
//!
//! - **`Internal`**: the transport was used before it was opened. A programming or
//!   configuration error, never expected in steady state.
//! - **`Transport`**: the request/response exchange failed at the communication layer
//!   (GPIB, serial, timeouts inside the transport).
//! - **`Protocol`**: the instrument answered, but the answer could not be parsed into the
//!   expected type, or an enumerated token was not recognized.
//! - **`Hardware`**: the instrument reported a non-zero status byte. The code is resolved
//!   to a description through the error table in [`crate::protocol::error_table`].
//! - **`Timeout`**: a caller's message was not acknowledged by the control actor in time.
//! - **`ActorUnavailable`**: the control actor task is gone (shut down or panicked).
//! - **`Configuration`** / **`FeatureNotEnabled`**: raised while building the controller.
//!
//! Transport implementations return `anyhow::Result`; their errors are converted into
//! `DeviceError::Transport` with the full cause chain flattened into the message.

use thiserror::Error;

/// Convenience alias for results using the controller error type.
pub type AppResult<T> = std::result::Result<T, DeviceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Request aborted - {0}")]
    Internal(String),

    #[error("Transport error on '{command}': {message}")]
    Transport { command: String, message: String },

    #[error("Protocol error on '{command}': {message}")]
    Protocol { command: String, message: String },

    #[error("Monochromator error {code}: {description}")]
    Hardware { code: u32, description: String },

    #[error("No acknowledgement for {operation} within {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Control actor is not running")]
    ActorUnavailable,

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DeviceError {
    /// Wrap a transport-level failure for `command`.
    pub fn transport(command: &str, err: &anyhow::Error) -> Self {
        DeviceError::Transport {
            command: command.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn protocol(command: &str, message: impl Into<String>) -> Self {
        DeviceError::Protocol {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Short description used when the error is folded into the device status string.
    pub fn reason(&self) -> String {
        match self {
            DeviceError::Hardware { description, .. } => description.clone(),
            other => other.to_string(),
        }
    }
}
