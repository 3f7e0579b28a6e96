//! Messages understood by the control actor

use tokio::sync::oneshot;

use crate::error::AppResult;
use crate::protocol::ShutterState;

/// One unit of work for the control actor, consumed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    SetWavelength(f64),
    SetFilter(u16),
    SetGrating(u16),
    SetShutter(ShutterState),
    Abort,
    /// Refresh the snapshot from the hardware.
    PeriodicTick,
    /// Connect and identify the instrument.
    Init,
    Shutdown,
}

/// Scheduling class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    High,
}

impl ControlMessage {
    /// Which queue the message travels on. High-priority messages use the mailbox; the
    /// actor drains the low-priority refresh queue only when the mailbox is empty.
    pub fn priority(&self) -> Priority {
        match self {
            ControlMessage::PeriodicTick => Priority::Low,
            _ => Priority::High,
        }
    }

    /// Operation name used in logs and timeout errors.
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::SetWavelength(_) => "set_wavelength",
            ControlMessage::SetFilter(_) => "set_filter_number",
            ControlMessage::SetGrating(_) => "set_grating_number",
            ControlMessage::SetShutter(_) => "set_shutter_state",
            ControlMessage::Abort => "abort",
            ControlMessage::PeriodicTick => "poll",
            ControlMessage::Init => "open",
            ControlMessage::Shutdown => "shutdown",
        }
    }
}

/// A message plus the channel its outcome is reported on.
#[derive(Debug)]
pub struct Envelope {
    pub message: ControlMessage,
    pub reply: oneshot::Sender<AppResult<()>>,
}

impl Envelope {
    pub fn new(message: ControlMessage) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (reply, rx) = oneshot::channel();
        (Self { message, reply }, rx)
    }
}
