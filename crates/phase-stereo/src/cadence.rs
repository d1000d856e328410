use std::time::{Duration, Instant};

use crate::error::StereoError;

/// A fixed wall-clock cadence without catch-up.
///
/// The first call to [`Cadence::due`] fires immediately. When the host falls
/// behind, missed ticks are dropped and counted instead of fired in a burst.
#[derive(Clone, Debug)]
pub struct Cadence {
    interval: Duration,
    next: Option<Instant>,
    missed: u64,
}

impl Cadence {
    /// Create a cadence firing `rate_hz` times per second.
    pub fn new(rate_hz: f32) -> Result<Self, StereoError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(StereoError::InvalidConfig(format!(
                "read rate must be positive, got {rate_hz}"
            )));
        }
        let interval = Duration::try_from_secs_f64(1.0 / rate_hz as f64)
            .map_err(|e| StereoError::InvalidConfig(format!("read rate {rate_hz}: {e}")))?;
        Self::from_interval(interval)
    }

    /// Create a cadence firing once per `interval`.
    pub fn from_interval(interval: Duration) -> Result<Self, StereoError> {
        if interval.is_zero() {
            return Err(StereoError::InvalidConfig(
                "cadence interval must not be zero".to_string(),
            ));
        }
        Ok(Self {
            interval,
            next: None,
            missed: 0,
        })
    }

    /// Returns true if a tick is due at `now`.
    pub fn due(&mut self, now: Instant) -> bool {
        let Some(next) = self.next else {
            self.next = Some(now + self.interval);
            return true;
        };

        if now < next {
            return false;
        }

        let behind = now.duration_since(next).as_nanos();
        let interval = self.interval.as_nanos();
        let skipped = (behind / interval) as u64;
        if skipped > 0 {
            log::debug!("cadence fell behind, dropping {skipped} ticks");
            self.missed += skipped;
        }

        let phase = Duration::from_nanos((behind % interval) as u64);
        self.next = Some(now + self.interval - phase);
        true
    }

    /// The interval between ticks.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks dropped because the host fell behind.
    #[inline]
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Fire on the next call again.
    pub fn reset(&mut self) {
        self.next = None;
    }
}
