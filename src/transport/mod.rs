//! Transport layer
//!
//! A [`Transport`] is a request/response channel to the instrument: given a command string
//! it either writes it (set commands) or writes it and returns the single answer line
//! (queries). Framing, connection management and bus-level timeouts live behind this trait.
//!
//! The controller never uses a transport directly. It goes through a [`Link`], which owns
//! the transport behind one `tokio::sync::Mutex`. Holding a [`LinkSession`] is what makes
//! a command sequence (write, status check, pacing delay) atomic with respect to every
//! other hardware access.
//!
//! Implementations:
//! - [`ScriptedTransport`]: in-memory response table for tests
//! - [`SerialTransport`]: RS-232 link (port opening requires feature `tokio_serial`)
//! - `VisaTransport`: GPIB/USB/Ethernet through VISA (feature `instrument_visa`)

pub mod scripted;
pub mod serial;
#[cfg(feature = "instrument_visa")]
pub mod visa;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{AppResult, DeviceError};
use crate::protocol::{classify, command, response};

pub use scripted::ScriptedTransport;
pub use serial::{SerialTransport, SerialTransportBuilder};
#[cfg(feature = "instrument_visa")]
pub use visa::VisaTransport;

/// Connection condition of a transport, reported in the device status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connected,
    /// The last exchange failed at the bus level.
    Fault,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Disconnected => write!(f, "DISCONNECTED"),
            TransportState::Connected => write!(f, "CONNECTED"),
            TransportState::Fault => write!(f, "FAULT"),
        }
    }
}

/// Request/response channel to one instrument.
///
/// Implementations do not need internal locking: the [`Link`] guarantees that at most one
/// call is in flight at any time.
#[async_trait]
pub trait Transport: Send {
    /// Open the underlying connection. Calling it on a connected transport reconnects.
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Send a command that produces no answer.
    async fn write(&mut self, command: &str) -> Result<()>;

    /// Send a query and return the raw answer line.
    async fn write_read(&mut self, command: &str) -> Result<String>;

    fn state(&self) -> TransportState;

    /// Human-readable description of the endpoint.
    fn info(&self) -> String;
}

/// Shared handle to the instrument transport.
#[derive(Clone)]
pub struct Link {
    inner: Arc<Mutex<Box<dyn Transport>>>,
    read_delay: Duration,
}

impl Link {
    /// `read_delay` is the pacing delay the instrument needs between a write and the next
    /// read.
    pub fn new(transport: Box<dyn Transport>, read_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
            read_delay,
        }
    }

    /// Wait for exclusive access to the transport.
    pub async fn session(&self) -> LinkSession<'_> {
        LinkSession {
            transport: self.inner.lock().await,
            read_delay: self.read_delay,
        }
    }

    pub fn read_delay(&self) -> Duration {
        self.read_delay
    }
}

/// Exclusive access to the transport for the lifetime of the guard.
pub struct LinkSession<'a> {
    transport: MutexGuard<'a, Box<dyn Transport>>,
    read_delay: Duration,
}

impl LinkSession<'_> {
    pub async fn connect(&mut self) -> AppResult<()> {
        self.transport
            .connect()
            .await
            .map_err(|e| DeviceError::transport("connect", &e))
    }

    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.transport
            .disconnect()
            .await
            .map_err(|e| DeviceError::transport("disconnect", &e))
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn info(&self) -> String {
        self.transport.info()
    }

    fn ensure_connected(&self) -> AppResult<()> {
        match self.transport.state() {
            TransportState::Disconnected => Err(DeviceError::Internal(
                "transport not initialized".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub async fn send(&mut self, command: &str) -> AppResult<()> {
        self.ensure_connected()?;
        debug!(command = %command, "write");
        self.transport
            .write(command)
            .await
            .map_err(|e| DeviceError::transport(command, &e))
    }

    pub async fn query(&mut self, command: &str) -> AppResult<String> {
        self.ensure_connected()?;
        let answer = self
            .transport
            .write_read(command)
            .await
            .map_err(|e| DeviceError::transport(command, &e))?;
        debug!(command = %command, answer = %answer.trim(), "query");
        Ok(answer)
    }

    /// Sleep for the read-after-write pacing delay.
    ///
    /// Takes `&mut self`: the session is `Send` but not `Sync`, so a shared borrow held
    /// across the sleep would make the caller's future `!Send`.
    pub async fn pace(&mut self) {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
    }

    /// Query the status byte; on a non-zero value read and classify the error code.
    pub async fn check_status(&mut self) -> AppResult<()> {
        self.pace().await;
        let raw = self.query(command::GET_STATUS_BYTE).await?;
        let status = response::parse_code(command::GET_STATUS_BYTE, &raw)?;
        if status == 0 {
            trace!("status byte clear");
            return Ok(());
        }

        self.pace().await;
        let raw = self.query(command::GET_ERROR).await?;
        let code = response::parse_code(command::GET_ERROR, &raw)?;
        Err(DeviceError::Hardware {
            code,
            description: classify(code).to_string(),
        })
    }
}
