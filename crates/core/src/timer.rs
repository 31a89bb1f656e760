//! High-resolution timer for frame timing and profiling.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed and per-frame time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    smoothed_delta: f32,
}

/// Smoothing factor for the running frame-time average.
const DELTA_SMOOTHING: f32 = 0.05;

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            smoothed_delta: 0.0,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()`.
    /// This is useful for calculating delta time in a frame loop.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.smoothed_delta +=
            (delta.as_secs_f32() - self.smoothed_delta) * DELTA_SMOOTHING;
        delta
    }

    /// Get the delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Exponentially smoothed frame time in seconds, for display.
    pub fn smoothed_delta_secs(&self) -> f32 {
        self.smoothed_delta
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.smoothed_delta = 0.0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_monotonic() {
        let timer = Timer::new();
        let first = timer.elapsed();
        let second = timer.elapsed();
        assert!(second >= first);
    }

    #[test]
    fn test_reset_clears_smoothing() {
        let mut timer = Timer::new();
        timer.tick();
        timer.reset();
        assert_eq!(timer.smoothed_delta_secs(), 0.0);
    }
}
