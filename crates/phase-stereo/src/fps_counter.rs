use std::time::Instant;

/// The smoothing factor for the FPS calculation.
const SMOOTHING: f32 = 0.95;

/// Counts processed depth frames and tracks a smoothed frame rate.
///
/// # Examples
///
/// ```
/// use phase_stereo::fps_counter::FpsCounter;
///
/// let mut fps_counter = FpsCounter::new();
///
/// for _ in 0..100 {
///    fps_counter.update();
/// }
///
/// assert_eq!(fps_counter.frame_count(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct FpsCounter {
    last_time: Option<Instant>,
    frame_count: u64,
    fps: f32,
}

impl FpsCounter {
    /// Creates a new `FpsCounter`.
    pub fn new() -> Self {
        Self {
            last_time: None,
            frame_count: 0,
            fps: 0.0,
        }
    }

    /// Returns the current FPS.
    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Returns the number of frames counted.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Counts a frame now.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Counts a frame presented at `now`.
    ///
    /// The rate is only updated from the second frame on.
    pub fn update_at(&mut self, now: Instant) {
        self.frame_count += 1;

        let Some(last) = self.last_time.replace(now) else {
            return;
        };

        let elapsed = now.saturating_duration_since(last).as_secs_f32();
        if elapsed <= 0.0 {
            return;
        }

        let instant_fps = 1.0 / elapsed;
        self.fps = if self.fps == 0.0 {
            instant_fps
        } else {
            self.fps * SMOOTHING + instant_fps * (1.0 - SMOOTHING)
        };
    }

    /// Forget all counted frames.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use std::time::{Duration, Instant};

    #[test]
    fn test_fps_counter() {
        let t0 = Instant::now();
        let mut fps_counter = super::FpsCounter::new();

        fps_counter.update_at(t0);
        assert_eq!(fps_counter.fps(), 0.0);

        fps_counter.update_at(t0 + Duration::from_millis(100));
        assert_relative_eq!(fps_counter.fps(), 10.0, epsilon = 1e-3);

        fps_counter.update_at(t0 + Duration::from_millis(150));
        assert_relative_eq!(fps_counter.fps(), 10.0 * 0.95 + 20.0 * 0.05, epsilon = 1e-3);
        assert_eq!(fps_counter.frame_count(), 3);

        fps_counter.reset();
        assert_eq!(fps_counter.frame_count(), 0);
    }
}
