//! Move delay model
//!
//! The instrument gives no completion signal for motion. After a move command the
//! controller assumes the mechanics are busy for a fixed time (grating, filter) or for a
//! time proportional to the travelled distance (wavelength), and suppresses polling until
//! it has passed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// Settle timer armed after a successful move command.
#[derive(Debug, Clone, Copy)]
pub struct MoveDelay {
    started: bool,
    start_time: Instant,
    duration: Duration,
}

impl Default for MoveDelay {
    fn default() -> Self {
        Self {
            started: false,
            start_time: Instant::now(),
            duration: Duration::ZERO,
        }
    }
}

impl MoveDelay {
    pub fn arm(&mut self, duration: Duration) {
        self.started = true;
        self.start_time = Instant::now();
        self.duration = duration;
    }

    pub fn clear(&mut self) {
        self.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// True once the armed duration has passed. An idle timer is never elapsed.
    pub fn is_elapsed(&self) -> bool {
        self.started && self.start_time.elapsed() >= self.duration
    }
}

/// Wavelength span used for move-time estimation.
///
/// Kept outside the snapshot so a caller can override it without taking the snapshot's
/// write lock. The actor mirrors it into the snapshot on every commit.
#[derive(Debug, Clone)]
pub struct WavelengthRange(Arc<AtomicU64>);

impl WavelengthRange {
    pub fn new(range: f64) -> Self {
        Self(Arc::new(AtomicU64::new(range.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, range: f64) {
        self.0.store(range.to_bits(), Ordering::Relaxed);
    }
}

/// `|to - from| * constant / range`
///
/// `range` is the wavelength span of the current grating in the operating unit. A
/// non-positive or non-finite range falls back to the full constant, as does a distance
/// too large to express as a `Duration`.
pub fn wavelength_move_delay(from: f64, to: f64, constant: Duration, range: f64) -> Duration {
    if !(range.is_finite() && range > 0.0) {
        warn!(range, "invalid wavelength range, using full settle delay");
        return constant;
    }
    let secs = (to - from).abs() * constant.as_secs_f64() / range;
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
        warn!(from, to, range, "move time not representable, using full settle delay");
        constant
    })
}
