//! Monochromator control
//!
//! The [`Monochromator`] handle is the public face of the controller. Behind it a single
//! control actor task owns the transport session, the move-delay timer and the device
//! state machine:
//!
//! ```text
//! Initializing --open success--> Standby
//! Initializing --open failure--> Fault
//! Standby --set_* succeeds--> Moving        (settle delay armed)
//! Moving   --delay elapsed--> Standby
//! Moving   --abort--> Standby (status="User abort")
//! Standby|Moving --poll/read error or hardware error code--> Fault
//! Fault --next poll cycle succeeds--> Standby
//! ```
//!
//! Readers never talk to the actor: getters copy from the shared [`SharedSnapshot`].

pub mod access;
mod actor;
pub mod handle;
pub mod messages;
pub mod snapshot;
pub mod timing;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use access::{AccessKind, Attribute};
pub use handle::{Monochromator, MonochromatorBuilder};
pub use snapshot::{InstrumentSnapshot, SharedSnapshot};

/// Derived condition of the instrument. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Initializing,
    Standby,
    Moving,
    Fault,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Initializing => write!(f, "INIT"),
            DeviceState::Standby => write!(f, "STANDBY"),
            DeviceState::Moving => write!(f, "MOVING"),
            DeviceState::Fault => write!(f, "FAULT"),
        }
    }
}

/// A grating position of the turret, with the wavelength span it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GratingDefinition {
    pub number: u16,
    pub label: String,
    pub min_wavelength: f64,
    pub max_wavelength: f64,
}

impl GratingDefinition {
    pub fn range(&self) -> f64 {
        self.max_wavelength - self.min_wavelength
    }
}

/// A filter wheel position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub number: u16,
    pub label: String,
}

/// Status strings the controller reports.
pub(crate) mod status {
    pub const INITIALIZING: &str = "Device is initializing";
    pub const READY: &str = "Device is up and ready";
    pub const USER_ABORT: &str = "User abort";
    pub const WAVELENGTH_MOVING: &str = "Wave length change in progress...";
    pub const GRATING_MOVING: &str = "Grating change in progress...";
    pub const FILTER_MOVING: &str = "Filter change in progress...";

    pub fn ready(transport_state: impl std::fmt::Display) -> String {
        format!("Transport state: {transport_state}\n{READY}")
    }

    pub fn hardware_error(transport_state: impl std::fmt::Display, description: &str) -> String {
        format!("Transport state: {transport_state}\nMonochromator error: {description}")
    }

    pub fn read_error(reason: &str) -> String {
        format!("Periodic read error: {reason}")
    }

    pub fn open_error(reason: &str) -> String {
        format!("Device open error: {reason}")
    }
}
