//! # CornerStone130 Monochromator Controller
//!
//! Control library for the Oriel CornerStone130 monochromator. All hardware access is
//! funnelled through one asynchronous control actor that serializes instrument exchanges,
//! tracks the device state machine, models move latency without blocking callers and
//! publishes a consistent snapshot for any number of concurrent readers.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based configuration (TOML file + `CS130_` environment).
//! - **`device`**: the [`Monochromator`] handle, the control actor, the state snapshot,
//!   move-delay model and access predicates.
//! - **`error`**: the [`DeviceError`] enum returned by every public operation.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`protocol`**: command encoder, response decoder and the error-code table.
//! - **`transport`**: the [`Transport`] trait and its scripted, serial and VISA
//!   implementations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cornerstone130::{Monochromator, ScriptedTransport, DeviceConfig};
//!
//! let device = Monochromator::spawn(Box::new(ScriptedTransport::healthy()), DeviceConfig::default());
//! device.open().await?;
//! device.set_wavelength(600.0).await?;
//! println!("{:?}", device.get_state_and_status());
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use config::{AppConfig, DeviceConfig};
pub use device::{
    AccessKind, Attribute, DeviceState, FilterDefinition, GratingDefinition, InstrumentSnapshot,
    Monochromator,
};
pub use error::{AppResult, DeviceError};
pub use protocol::{OperatingUnit, ShutterState};
pub use transport::{ScriptedTransport, Transport, TransportState};
