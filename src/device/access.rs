//! Access predicates
//!
//! Control frameworks ask before every attribute access whether it is currently allowed.
//! Reads always are. Writes need a working instrument, so they are refused while the
//! device is initializing or faulted. Abort stays available whenever the device has been
//! brought up, including during a fault.

use std::fmt;

use super::DeviceState;

/// Externally visible attributes of the monochromator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Wavelength,
    GratingNumber,
    GratingLabel,
    GratingMinWavelength,
    GratingMaxWavelength,
    FilterNumber,
    FilterLabel,
    Shutter,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::Wavelength,
        Attribute::GratingNumber,
        Attribute::GratingLabel,
        Attribute::GratingMinWavelength,
        Attribute::GratingMaxWavelength,
        Attribute::FilterNumber,
        Attribute::FilterLabel,
        Attribute::Shutter,
    ];

    /// Grating limits come from configuration and cannot be written.
    pub fn is_writable(self) -> bool {
        !matches!(
            self,
            Attribute::GratingMinWavelength | Attribute::GratingMaxWavelength
        )
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Attribute::Wavelength => "wavelength",
            Attribute::GratingNumber => "gratingNumber",
            Attribute::GratingLabel => "gratingLabel",
            Attribute::GratingMinWavelength => "gratingMinWavelength",
            Attribute::GratingMaxWavelength => "gratingMaxWavelength",
            Attribute::FilterNumber => "filterNumber",
            Attribute::FilterLabel => "filterLabel",
            Attribute::Shutter => "shutter",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

pub fn is_allowed(state: DeviceState, attribute: Attribute, kind: AccessKind) -> bool {
    match kind {
        AccessKind::Read => true,
        AccessKind::Write => {
            attribute.is_writable()
                && !matches!(state, DeviceState::Initializing | DeviceState::Fault)
        }
    }
}

pub fn is_abort_allowed(state: DeviceState) -> bool {
    state != DeviceState::Initializing
}
