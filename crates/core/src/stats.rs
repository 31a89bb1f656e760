//! Per-frame statistics counters.
//!
//! Counters live in an explicit value owned by whichever stage of the frame
//! is currently recording, and are reset by the frame driver at the start of
//! every frame. They are intentionally not global: the logic and render
//! threads exchange ownership of the frame, never the counters themselves.

use std::time::Duration;

/// Counters accumulated while recording and executing one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Number of draw calls recorded (direct and indirect).
    pub draw_calls: u64,
    /// Number of triangles requested by direct draw calls.
    pub triangles: u64,
    /// Number of compute dispatches recorded.
    pub dispatches: u64,
    /// Number of pipeline binds actually issued (after elision).
    pub pipeline_binds: u64,
    /// Number of descriptor set binds actually issued (after elision).
    pub descriptor_binds: u64,
    /// Time spent waiting for the frame slot's fences.
    pub fence_wait: Duration,
    /// Time spent waiting for the next swapchain image.
    pub acquire_wait: Duration,
}

impl FrameStats {
    /// Zeroed counters for the start of a frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all counters. Called once per frame by the driver.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold another set of counters into this one.
    ///
    /// The driver merges the per-recorder counters of every submission queue
    /// into the frame's totals.
    pub fn merge(&mut self, other: &FrameStats) {
        self.draw_calls += other.draw_calls;
        self.triangles += other.triangles;
        self.dispatches += other.dispatches;
        self.pipeline_binds += other.pipeline_binds;
        self.descriptor_binds += other.descriptor_binds;
        self.fence_wait += other.fence_wait;
        self.acquire_wait += other.acquire_wait;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_zeroes_counters() {
        let mut stats = FrameStats::new();
        stats.draw_calls = 12;
        stats.triangles = 36_000;
        stats.fence_wait = Duration::from_millis(2);
        stats.reset();
        assert_eq!(stats, FrameStats::default());
    }

    #[test]
    fn test_merge_accumulates() {
        let mut a = FrameStats {
            draw_calls: 3,
            triangles: 300,
            ..Default::default()
        };
        let b = FrameStats {
            draw_calls: 2,
            triangles: 100,
            dispatches: 1,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.draw_calls, 5);
        assert_eq!(a.triangles, 400);
        assert_eq!(a.dispatches, 1);
    }
}
