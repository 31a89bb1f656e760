//! Logic-thread / render-thread frame handoff.
//!
//! Explicit double-buffering of CPU work: the logic thread produces a
//! frame's worth of submissions, posts render-ready, and blocks on
//! logic-ready; the render thread mirrors this. A `single_loop`
//! configuration runs both halves inline on one thread by short-circuiting
//! the same four methods, so the two modes share one code path.

use ember_core::Semaphore;

/// The pair of counting semaphores coordinating the two frame threads.
pub struct FrameHandoff {
    render_ready: Semaphore,
    logic_ready: Semaphore,
    single_loop: bool,
}

impl FrameHandoff {
    /// Creates the handoff.
    ///
    /// The logic side starts with a permit so it can produce the first frame
    /// without waiting on a render pass that never ran.
    pub fn new(single_loop: bool) -> Self {
        Self {
            render_ready: Semaphore::new(0),
            logic_ready: Semaphore::new(1),
            single_loop,
        }
    }

    /// True when both halves run inline on one thread.
    #[inline]
    pub fn is_single_loop(&self) -> bool {
        self.single_loop
    }

    /// Logic thread: a frame's submissions are complete.
    pub fn post_render_ready(&self) {
        if self.single_loop {
            return;
        }
        self.render_ready.release();
    }

    /// Render thread: block until the logic thread produced a frame.
    pub fn wait_render_ready(&self) {
        if self.single_loop {
            return;
        }
        self.render_ready.acquire();
    }

    /// Render thread: the frame was consumed; the logic thread may reuse
    /// its half of the double buffer.
    pub fn post_logic_ready(&self) {
        if self.single_loop {
            return;
        }
        self.logic_ready.release();
    }

    /// Logic thread: block until the render thread consumed the previous
    /// frame.
    pub fn wait_logic_ready(&self) {
        if self.single_loop {
            return;
        }
        self.logic_ready.acquire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_single_loop_never_blocks() {
        let handoff = FrameHandoff::new(true);
        for _ in 0..3 {
            handoff.wait_logic_ready();
            handoff.post_render_ready();
            handoff.wait_render_ready();
            handoff.post_logic_ready();
        }
    }

    #[test]
    fn test_two_threads_alternate_frames() {
        let handoff = Arc::new(FrameHandoff::new(false));
        let produced = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));
        let frames = 10;

        let render = {
            let handoff = handoff.clone();
            let produced = produced.clone();
            let consumed = consumed.clone();
            std::thread::spawn(move || {
                for _ in 0..frames {
                    handoff.wait_render_ready();
                    // The logic thread is always at least one frame ahead.
                    assert!(produced.load(Ordering::SeqCst) > consumed.load(Ordering::SeqCst));
                    consumed.fetch_add(1, Ordering::SeqCst);
                    handoff.post_logic_ready();
                }
            })
        };

        for _ in 0..frames {
            handoff.wait_logic_ready();
            produced.fetch_add(1, Ordering::SeqCst);
            handoff.post_render_ready();
        }
        render.join().unwrap();

        assert_eq!(produced.load(Ordering::SeqCst), frames);
        assert_eq!(consumed.load(Ordering::SeqCst), frames);
    }
}
