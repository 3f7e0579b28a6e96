//! Public controller handle
//!
//! [`Monochromator`] is cheap to clone and safe to use from any number of tasks. Getters
//! copy from the shared snapshot and never touch the hardware. Move commands, shutter and
//! abort go through the control actor's mailbox and wait, bounded by the command timeout,
//! for the actor to report the outcome. Refresh requests use a separate queue that the
//! actor only drains when the mailbox is empty. Unit and label writes bypass the actor but
//! are still serialized with every other exchange by the transport lock.
//!
//! # Example
//!
//! ```rust,ignore
//! let device = Monochromator::builder(Box::new(transport))
//!     .config(config.device.clone())
//!     .gratings(config.gratings.clone())
//!     .spawn();
//!
//! device.open().await?;
//! device.set_wavelength(600.0).await?;
//! let (state, status) = device.get_state_and_status();
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};

use super::access::{self, AccessKind, Attribute};
use super::actor::ControlActor;
use super::messages::{ControlMessage, Envelope, Priority};
use super::snapshot::{InstrumentSnapshot, SharedSnapshot};
use super::timing::WavelengthRange;
use super::{DeviceState, FilterDefinition, GratingDefinition};
use crate::config::{AppConfig, DeviceConfig};
use crate::error::{AppResult, DeviceError};
use crate::protocol::{command, OperatingUnit, ShutterState};
use crate::transport::{Link, Transport};

/// Builder for [`Monochromator`].
pub struct MonochromatorBuilder {
    transport: Box<dyn Transport>,
    config: DeviceConfig,
    gratings: Vec<GratingDefinition>,
    filters: Vec<FilterDefinition>,
}

impl MonochromatorBuilder {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            config: DeviceConfig::default(),
            gratings: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn config(mut self, config: DeviceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn gratings(mut self, gratings: Vec<GratingDefinition>) -> Self {
        self.gratings = gratings;
        self
    }

    pub fn filters(mut self, filters: Vec<FilterDefinition>) -> Self {
        self.filters = filters;
        self
    }

    /// Start the control actor. Must be called from within a tokio runtime.
    pub fn spawn(self) -> Monochromator {
        let config = self.config;
        let link = Link::new(self.transport, config.read_delay());
        let snapshot = SharedSnapshot::new(InstrumentSnapshot::new(config.wavelength_range));
        let range = WavelengthRange::new(config.wavelength_range);
        let (mailbox, inbox) = mpsc::channel(config.mailbox_capacity.max(1));
        let (refresh_queue, refreshes) = mpsc::channel(config.mailbox_capacity.max(1));

        let actor = ControlActor::new(
            link.clone(),
            snapshot.clone(),
            config.clone(),
            self.gratings.clone(),
            self.filters,
            range.clone(),
        );
        let task = tokio::spawn(
            actor
                .run(inbox, refreshes)
                .instrument(info_span!("cs130_actor")),
        );

        Monochromator {
            mailbox,
            refresh_queue,
            snapshot,
            range,
            link,
            gratings: Arc::new(self.gratings),
            command_timeout: config.command_timeout(),
            open_timeout: config.open_timeout(),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Handle to a running CornerStone130 controller.
#[derive(Clone)]
pub struct Monochromator {
    mailbox: mpsc::Sender<Envelope>,
    refresh_queue: mpsc::Sender<Envelope>,
    snapshot: SharedSnapshot,
    range: WavelengthRange,
    link: Link,
    gratings: Arc<Vec<GratingDefinition>>,
    command_timeout: Duration,
    open_timeout: Duration,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Monochromator {
    pub fn builder(transport: Box<dyn Transport>) -> MonochromatorBuilder {
        MonochromatorBuilder::new(transport)
    }

    /// Spawn with default timing and no grating or filter definitions.
    pub fn spawn(transport: Box<dyn Transport>, config: DeviceConfig) -> Self {
        MonochromatorBuilder::new(transport).config(config).spawn()
    }

    pub fn from_app_config(transport: Box<dyn Transport>, config: &AppConfig) -> Self {
        MonochromatorBuilder::new(transport)
            .config(config.device.clone())
            .gratings(config.gratings.clone())
            .filters(config.filters.clone())
            .spawn()
    }

    /// Enqueue `message` and wait for the actor's verdict.
    async fn request(&self, message: ControlMessage, timeout: Duration) -> AppResult<()> {
        let operation = message.name();
        let queue = match message.priority() {
            Priority::High => &self.mailbox,
            Priority::Low => &self.refresh_queue,
        };
        let (envelope, reply) = Envelope::new(message);

        let exchange = async {
            queue
                .send(envelope)
                .await
                .map_err(|_| DeviceError::ActorUnavailable)?;
            reply.await.map_err(|_| DeviceError::ActorUnavailable)?
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(operation, "no acknowledgement before timeout");
                Err(DeviceError::Timeout {
                    operation,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Connect and identify the instrument. `Initializing -> Standby` on success,
    /// `-> Fault` on failure.
    pub async fn open(&self) -> AppResult<()> {
        self.request(ControlMessage::Init, self.open_timeout).await
    }

    pub fn get_state_and_status(&self) -> (DeviceState, String) {
        self.snapshot.state_and_status()
    }

    pub fn state(&self) -> DeviceState {
        self.snapshot.with(|s| s.state)
    }

    pub fn get_wavelength(&self) -> f64 {
        self.snapshot.with(|s| s.wavelength)
    }

    pub fn get_grating_number(&self) -> u16 {
        self.snapshot.with(|s| s.grating_number)
    }

    pub fn get_grating_label(&self) -> String {
        self.snapshot.with(|s| s.grating_label.clone())
    }

    pub fn get_filter_number(&self) -> u16 {
        self.snapshot.with(|s| s.filter_number)
    }

    pub fn get_filter_label(&self) -> String {
        self.snapshot.with(|s| s.filter_label.clone())
    }

    pub fn get_shutter_state(&self) -> ShutterState {
        self.snapshot.with(|s| s.shutter)
    }

    pub fn snapshot(&self) -> InstrumentSnapshot {
        self.snapshot.read()
    }

    /// Move to `wavelength` (current operating unit). Returns once the command is written;
    /// the device reports `Moving` until the estimated settle time has passed.
    pub async fn set_wavelength(&self, wavelength: f64) -> AppResult<()> {
        self.request(ControlMessage::SetWavelength(wavelength), self.command_timeout)
            .await
    }

    pub async fn set_grating_number(&self, number: u16) -> AppResult<()> {
        self.request(ControlMessage::SetGrating(number), self.command_timeout)
            .await
    }

    pub async fn set_filter_number(&self, number: u16) -> AppResult<()> {
        self.request(ControlMessage::SetFilter(number), self.command_timeout)
            .await
    }

    pub async fn set_shutter_state(&self, shutter: ShutterState) -> AppResult<()> {
        self.request(ControlMessage::SetShutter(shutter), self.command_timeout)
            .await
    }

    /// Stop the current motion. The next poll reports `Standby` with "User abort".
    pub async fn abort(&self) -> AppResult<()> {
        self.request(ControlMessage::Abort, self.command_timeout)
            .await
    }

    /// Ask the actor for a poll cycle. Queued commands are handled first.
    pub async fn refresh(&self) -> AppResult<()> {
        self.request(ControlMessage::PeriodicTick, self.command_timeout)
            .await
    }

    /// Range used for the next wavelength move-time estimate. Shows up in the snapshot
    /// after the next poll.
    pub fn set_grating_wavelength_range(&self, range: f64) {
        self.range.set(range);
    }

    pub async fn set_unit(&self, unit: OperatingUnit) -> AppResult<()> {
        self.direct_write(&command::set_unit(unit)).await
    }

    pub async fn set_grating_label(&self, number: u16, label: &str) -> AppResult<()> {
        self.direct_write(&command::set_grating_label(number, label))
            .await
    }

    pub async fn set_filter_label(&self, number: u16, label: &str) -> AppResult<()> {
        self.direct_write(&command::set_filter_label(number, label))
            .await
    }

    /// Write, check the status byte, then honour the pacing delay.
    async fn direct_write(&self, cmd: &str) -> AppResult<()> {
        let mut session = self.link.session().await;
        session.send(cmd).await?;
        session.check_status().await?;
        session.pace().await;
        Ok(())
    }

    /// Configured wavelength limits of the current grating.
    pub fn grating_limits(&self) -> Option<(f64, f64)> {
        let number = self.get_grating_number();
        self.gratings
            .iter()
            .find(|g| g.number == number)
            .map(|g| (g.min_wavelength, g.max_wavelength))
    }

    pub fn is_allowed(&self, attribute: Attribute, kind: AccessKind) -> bool {
        access::is_allowed(self.state(), attribute, kind)
    }

    pub fn is_abort_allowed(&self) -> bool {
        access::is_abort_allowed(self.state())
    }

    /// Stop the control actor and wait for it to release the transport.
    pub async fn shutdown(&self) -> AppResult<()> {
        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };
        let requested = self
            .request(ControlMessage::Shutdown, self.command_timeout)
            .await;
        if requested.is_err() {
            task.abort();
        }
        // an aborted task reports a JoinError, which is expected here
        let _ = task.await;
        match requested {
            Err(DeviceError::ActorUnavailable) => Ok(()),
            other => other,
        }
    }
}
