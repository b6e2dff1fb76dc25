//! Frame timing.

use std::time::{Duration, Instant};

/// Measures the time between consecutive frames.
///
/// The first [`FrameTimer::tick`] reports the time since construction.
#[derive(Debug)]
pub struct FrameTimer {
    /// Start of the run, for totals and averages.
    start: Instant,
    /// Time of the previous tick.
    last_tick: Instant,
    frames: u64,
}

impl FrameTimer {
    /// Starts timing now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
        }
    }

    /// Total time since the timer was created or last reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Advance to the next frame, returning the seconds since the previous tick.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        delta.as_secs_f32()
    }

    /// Number of ticks since creation or last reset.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Average frames per second over the whole run, zero before any time has passed.
    pub fn average_fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    /// Restarts timing, e.g. once initialization has finished.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.frames = 0;
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tick_reports_elapsed_frame_time() {
        let mut timer = FrameTimer::new();
        thread::sleep(Duration::from_millis(5));
        let dt = timer.tick();
        assert!(dt >= 0.005);
        assert_eq!(timer.frame_count(), 1);
    }

    #[test]
    fn test_reset_clears_frame_count() {
        let mut timer = FrameTimer::new();
        timer.tick();
        timer.tick();
        timer.reset();
        assert_eq!(timer.frame_count(), 0);
    }
}
