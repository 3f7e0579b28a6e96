//! Shared instrument snapshot
//!
//! The last-known instrument values sit behind one `parking_lot::RwLock`. Readers take the
//! read lock only long enough to copy; the control actor gathers everything it reads from
//! the hardware first and commits it in a single write section, so a reader sees either
//! the whole previous cycle or the whole new one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::{status, DeviceState};
use crate::protocol::ShutterState;

/// Copy of the last known instrument condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentSnapshot {
    pub wavelength: f64,
    /// Wavelength span of the current grating, used to estimate move times.
    pub wavelength_unit_range: f64,
    pub grating_number: u16,
    pub grating_label: String,
    pub filter_number: u16,
    pub filter_label: String,
    pub shutter: ShutterState,
    pub state: DeviceState,
    pub status_message: String,
    /// `INFO?` answer captured at open.
    pub identification: String,
    /// Time of the last successful poll.
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstrumentSnapshot {
    pub fn new(wavelength_unit_range: f64) -> Self {
        Self {
            wavelength: 0.0,
            wavelength_unit_range,
            grating_number: 0,
            grating_label: String::new(),
            filter_number: 0,
            filter_label: String::new(),
            shutter: ShutterState::Unknown,
            state: DeviceState::Initializing,
            status_message: status::INITIALIZING.to_string(),
            identification: String::new(),
            updated_at: None,
        }
    }
}

/// Cloneable handle to the guarded snapshot.
#[derive(Debug, Clone)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<InstrumentSnapshot>>,
}

impl SharedSnapshot {
    pub fn new(initial: InstrumentSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Full consistent copy.
    pub fn read(&self) -> InstrumentSnapshot {
        self.inner.read().clone()
    }

    pub fn state_and_status(&self) -> (DeviceState, String) {
        let guard = self.inner.read();
        (guard.state, guard.status_message.clone())
    }

    /// Copy out a single field under the read lock.
    pub fn with<T>(&self, f: impl FnOnce(&InstrumentSnapshot) -> T) -> T {
        f(&self.inner.read())
    }

    /// Apply `f` inside one write section.
    pub(crate) fn update(&self, f: impl FnOnce(&mut InstrumentSnapshot)) {
        f(&mut self.inner.write());
    }
}
