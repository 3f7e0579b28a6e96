//! Control actor
//!
//! A single tokio task that owns every mutable piece of instrument state and performs all
//! hardware I/O through the [`Link`]. It selects between the command mailbox, the refresh
//! queue and the polling interval, in that order of precedence.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::messages::{ControlMessage, Envelope};
use super::snapshot::SharedSnapshot;
use super::timing::{wavelength_move_delay, MoveDelay, WavelengthRange};
use super::{status, DeviceState, FilterDefinition, GratingDefinition};
use crate::config::DeviceConfig;
use crate::error::{AppResult, DeviceError};
use crate::protocol::{command, response, ShutterState};
use crate::transport::{Link, LinkSession};

/// Values gathered by one poll cycle before they are committed.
#[derive(Debug)]
struct Readings {
    wavelength: f64,
    grating_number: u16,
    grating_label: Option<String>,
    filter_number: u16,
    filter_label: Option<String>,
    shutter: ShutterState,
}

pub(crate) struct ControlActor {
    link: Link,
    snapshot: SharedSnapshot,
    config: DeviceConfig,
    gratings: Vec<GratingDefinition>,
    filters: Vec<FilterDefinition>,
    range: WavelengthRange,
    state: DeviceState,
    delay: MoveDelay,
    /// Set by the first successful open; a fault before that is not polled.
    opened: bool,
    /// Last committed positions. `None` forces a label read on the next poll.
    last_grating: Option<u16>,
    last_filter: Option<u16>,
}

impl ControlActor {
    pub(crate) fn new(
        link: Link,
        snapshot: SharedSnapshot,
        config: DeviceConfig,
        gratings: Vec<GratingDefinition>,
        filters: Vec<FilterDefinition>,
        range: WavelengthRange,
    ) -> Self {
        Self {
            link,
            snapshot,
            config,
            gratings,
            filters,
            range,
            state: DeviceState::Initializing,
            delay: MoveDelay::default(),
            opened: false,
            last_grating: None,
            last_filter: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<Envelope>,
        mut refreshes: mpsc::Receiver<Envelope>,
    ) {
        // interval_at panics on a zero period
        let period = self.config.polling_period().max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(polling_period_ms = period.as_millis() as u64, "control actor started");

        loop {
            tokio::select! {
                biased;

                envelope = mailbox.recv() => {
                    let Some(Envelope { message, reply }) = envelope else {
                        debug!("all handles dropped");
                        break;
                    };
                    let stop = message == ControlMessage::Shutdown;
                    let result = self.handle(message).await;
                    // the caller may have timed out already
                    let _ = reply.send(result);
                    if stop {
                        break;
                    }
                }
                envelope = refreshes.recv() => {
                    let Some(Envelope { message, reply }) = envelope else {
                        break;
                    };
                    let result = self.handle(message).await;
                    let _ = reply.send(result);
                }
                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }

        if let Err(e) = self.link.session().await.disconnect().await {
            warn!(error = %e, "transport disconnect failed");
        }
        info!("control actor stopped");
    }

    async fn handle(&mut self, message: ControlMessage) -> AppResult<()> {
        debug!(message = ?message, state = ?self.state, "handling");
        match message {
            ControlMessage::Init => self.open().await,
            ControlMessage::SetWavelength(target) => self.set_wavelength(target).await,
            ControlMessage::SetGrating(number) => self.set_grating(number).await,
            ControlMessage::SetFilter(number) => self.set_filter(number).await,
            ControlMessage::SetShutter(shutter) => self.set_shutter(shutter).await,
            ControlMessage::Abort => self.abort().await,
            ControlMessage::PeriodicTick => {
                self.poll().await;
                Ok(())
            }
            ControlMessage::Shutdown => Ok(()),
        }
    }

    fn set_state(&mut self, state: DeviceState, status_message: String) {
        if state != self.state {
            info!(from = ?self.state, to = ?state, "state change");
        }
        self.state = state;
        self.snapshot.update(|s| {
            s.state = state;
            s.status_message = status_message;
        });
    }

    async fn open(&mut self) -> AppResult<()> {
        let link = self.link.clone();
        let mut session = link.session().await;
        let outcome = self.open_sequence(&mut session).await;
        let transport_state = session.state();
        drop(session);

        match outcome {
            Ok(identification) => {
                self.opened = true;
                self.delay.clear();
                self.last_grating = None;
                self.last_filter = None;
                info!(
                    identification = %identification,
                    transport_state = %transport_state,
                    "monochromator open"
                );
                self.snapshot
                    .update(|s| s.identification = identification.clone());
                self.set_state(DeviceState::Standby, status::READY.to_string());
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to open monochromator");
                self.set_state(DeviceState::Fault, status::open_error(&e.reason()));
                Err(e)
            }
        }
    }

    async fn open_sequence(&self, session: &mut LinkSession<'_>) -> AppResult<String> {
        session.connect().await?;
        let info = session.query(command::GET_INFO).await?;
        session.check_status().await?;
        session.pace().await;

        if self.config.write_labels_on_open {
            for grating in &self.gratings {
                let cmd = command::set_grating_label(grating.number, &grating.label);
                session.send(&cmd).await?;
                session.check_status().await?;
                session.pace().await;
            }
            for filter in &self.filters {
                let cmd = command::set_filter_label(filter.number, &filter.label);
                session.send(&cmd).await?;
                session.check_status().await?;
                session.pace().await;
            }
        }

        Ok(response::parse_label(&info))
    }

    /// Write a move command; on success arm the settle delay and enter `Moving`.
    async fn start_move(&mut self, cmd: &str, settle: Duration, status_message: &str) -> AppResult<()> {
        self.link.session().await.send(cmd).await?;
        self.delay.arm(settle);
        debug!(command = %cmd, settle_ms = settle.as_millis() as u64, "move started");
        self.set_state(DeviceState::Moving, status_message.to_string());
        Ok(())
    }

    async fn set_wavelength(&mut self, target: f64) -> AppResult<()> {
        if !target.is_finite() {
            return Err(DeviceError::protocol(
                "GOWAVE",
                format!("target wavelength must be finite, got {target}"),
            ));
        }
        let current = self.snapshot.with(|s| s.wavelength);
        let range = self.range.get();
        let settle = wavelength_move_delay(
            current,
            target,
            self.config.wavelength_write_delay(),
            range,
        );
        self.start_move(&command::go_wavelength(target), settle, status::WAVELENGTH_MOVING)
            .await
    }

    async fn set_grating(&mut self, number: u16) -> AppResult<()> {
        let settle = self.config.grating_write_delay();
        self.start_move(&command::set_grating_number(number), settle, status::GRATING_MOVING)
            .await
    }

    async fn set_filter(&mut self, number: u16) -> AppResult<()> {
        let settle = self.config.filter_write_delay();
        self.start_move(&command::set_filter_number(number), settle, status::FILTER_MOVING)
            .await
    }

    async fn set_shutter(&mut self, shutter: ShutterState) -> AppResult<()> {
        let cmd = command::set_shutter(shutter).ok_or_else(|| {
            DeviceError::protocol("SHUTTER", "shutter can only be commanded open or closed")
        })?;

        let link = self.link.clone();
        let mut session = link.session().await;
        session.send(cmd).await?;
        let checked = session.check_status().await;
        let transport_state = session.state();
        if checked.is_ok() {
            session.pace().await;
        }
        drop(session);

        if let Err(DeviceError::Hardware { description, .. }) = &checked {
            warn!(command = %cmd, error = %description, "shutter command rejected");
            self.set_state(
                DeviceState::Fault,
                status::hardware_error(transport_state, description),
            );
        }
        checked
    }

    async fn abort(&mut self) -> AppResult<()> {
        let link = self.link.clone();
        let mut session = link.session().await;
        session.send(command::ABORT).await?;
        self.delay.clear();
        session.pace().await;
        info!(state = ?self.state, "abort sent");
        Ok(())
    }

    async fn poll(&mut self) {
        match self.state {
            DeviceState::Initializing => return,
            DeviceState::Fault if !self.opened => return,
            DeviceState::Moving => {
                if !self.delay.is_started() {
                    self.set_state(DeviceState::Standby, status::USER_ABORT.to_string());
                    return;
                }
                if !self.delay.is_elapsed() {
                    return;
                }
                debug!(settle_ms = self.delay.duration().as_millis() as u64, "move settled");
                self.delay.clear();
            }
            DeviceState::Standby | DeviceState::Fault => {}
        }

        let link = self.link.clone();
        let mut session = link.session().await;
        let readings = match self.read_instrument(&mut session).await {
            Ok(readings) => readings,
            Err(e) => {
                drop(session);
                warn!(error = %e, "periodic read failed");
                self.set_state(DeviceState::Fault, status::read_error(&e.reason()));
                return;
            }
        };
        let checked = session.check_status().await;
        let transport_state = session.state();
        drop(session);

        let (state, status_message) = match checked {
            Ok(()) => (DeviceState::Standby, status::ready(transport_state)),
            Err(DeviceError::Hardware { code, description }) => {
                warn!(code, error = %description, "monochromator reports an error");
                (
                    DeviceState::Fault,
                    status::hardware_error(transport_state, &description),
                )
            }
            Err(e) => {
                warn!(error = %e, "status query failed");
                self.set_state(DeviceState::Fault, status::read_error(&e.reason()));
                return;
            }
        };
        self.commit(readings, state, status_message);
    }

    async fn read_instrument(&self, session: &mut LinkSession<'_>) -> AppResult<Readings> {
        let raw = session.query(command::GET_WAVELENGTH).await?;
        let wavelength = response::parse_float(command::GET_WAVELENGTH, &raw)?;

        let raw = session.query(command::GET_GRATING_NUMBER).await?;
        let grating_number = response::parse_position(command::GET_GRATING_NUMBER, &raw)?;
        let grating_label = if self.last_grating != Some(grating_number) {
            let raw = session
                .query(&command::get_grating_label(grating_number))
                .await?;
            Some(response::parse_label(&raw))
        } else {
            None
        };

        let raw = session.query(command::GET_FILTER_NUMBER).await?;
        let filter_number = response::parse_position(command::GET_FILTER_NUMBER, &raw)?;
        let filter_label = if self.last_filter != Some(filter_number) {
            let raw = session
                .query(&command::get_filter_label(filter_number))
                .await?;
            Some(response::parse_label(&raw))
        } else {
            None
        };

        let raw = session.query(command::GET_SHUTTER).await?;
        let shutter = response::parse_shutter(command::GET_SHUTTER, &raw)?;

        Ok(Readings {
            wavelength,
            grating_number,
            grating_label,
            filter_number,
            filter_label,
            shutter,
        })
    }

    /// Publish one poll cycle in a single write section.
    fn commit(&mut self, readings: Readings, state: DeviceState, status_message: String) {
        let grating_changed = self.last_grating != Some(readings.grating_number);
        if grating_changed {
            if let Some(range) = self
                .gratings
                .iter()
                .find(|g| g.number == readings.grating_number)
                .map(GratingDefinition::range)
            {
                self.range.set(range);
            }
        }
        let range = self.range.get();
        self.last_grating = Some(readings.grating_number);
        self.last_filter = Some(readings.filter_number);

        if state != self.state {
            info!(from = ?self.state, to = ?state, "state change");
        }
        self.state = state;

        self.snapshot.update(|s| {
            s.wavelength = readings.wavelength;
            s.grating_number = readings.grating_number;
            if let Some(label) = readings.grating_label {
                s.grating_label = label;
            }
            s.wavelength_unit_range = range;
            s.filter_number = readings.filter_number;
            if let Some(label) = readings.filter_label {
                s.filter_label = label;
            }
            s.shutter = readings.shutter;
            s.state = state;
            s.status_message = status_message;
            s.updated_at = Some(Utc::now());
        });
    }
}
