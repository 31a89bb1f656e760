//! Pass registration and the per-frame state machine.
//!
//! Passes are registered eagerly on a [`FrameGraphBuilder`] and executed in
//! registration order every frame; there is no dependency inference. Each
//! pass names the submission queue it records into. The [`FrameDriver`]
//! owns one [`FrameContext`] per frame-in-flight slot and walks the same
//! sequence every frame:
//!
//! 1. acquire the next swapchain image on the slot's acquire semaphore
//! 2. wait for the slot's fences, then reset them (this is the guarantee
//!    that the CPU never rewrites a slot the GPU still reads)
//! 3. rewind the slot's transient allocators
//! 4. begin every queue's command buffer, run the pass callbacks, end them
//! 5. flush transient writes, then submit the queues in declared order with
//!    semaphore chaining (queue 0 waits on the acquire semaphore)
//! 6. present gated on the last queue's completion semaphore, run deferred
//!    post-submit work, and wait queue-idle
//!
//! The trailing queue-idle wait means submission never overlaps the next
//! frame's submission; a known throughput limitation, kept for simplicity.

use std::time::Instant;

use ash::vk;
use ember_core::FrameStats;
use ember_rhi::{RhiError, RhiResult};
use tracing::{debug, info, warn};

use crate::backend::{FrameTarget, QueueSubmit, RenderBackend};
use crate::frame::{FrameContext, QueueKind, TransientSet};

/// Everything a pass callback may touch while recording.
pub struct PassContext<'a, T: TransientSet> {
    /// The command buffer of the pass's submission queue.
    pub command_buffer: vk::CommandBuffer,
    /// Frame-in-flight slot currently being recorded.
    pub slot: usize,
    /// Swapchain image index acquired for this frame.
    pub image_index: u32,
    /// The frame's render target.
    pub target: FrameTarget,
    /// The slot's transient allocators.
    pub transients: &'a mut T,
    /// Frame counters; merge recorder stats here.
    pub stats: &'a mut FrameStats,
}

type PassCallback<T> = Box<dyn FnMut(&mut PassContext<'_, T>) -> RhiResult<()> + Send>;

struct PassDesc<T: TransientSet> {
    name: String,
    queue: QueueKind,
    callback: PassCallback<T>,
}

/// Eagerly built, author-ordered pass list.
pub struct FrameGraphBuilder<T: TransientSet> {
    passes: Vec<PassDesc<T>>,
}

impl<T: TransientSet> FrameGraphBuilder<T> {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Appends a pass. Passes run in registration order; `queue` selects the
    /// submission queue the pass records into.
    pub fn add_pass(
        mut self,
        name: impl Into<String>,
        queue: QueueKind,
        callback: impl FnMut(&mut PassContext<'_, T>) -> RhiResult<()> + Send + 'static,
    ) -> Self {
        self.passes.push(PassDesc {
            name: name.into(),
            queue,
            callback: Box::new(callback),
        });
        self
    }

    /// Submission queues in declared order (order of first appearance).
    fn queue_order(&self) -> Vec<QueueKind> {
        let mut queues = Vec::new();
        for pass in &self.passes {
            if !queues.contains(&pass.queue) {
                queues.push(pass.queue);
            }
        }
        queues
    }
}

impl<T: TransientSet> Default for FrameGraphBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives acquire → record → submit → present over N frame slots.
pub struct FrameDriver<B: RenderBackend> {
    backend: B,
    queues: Vec<QueueKind>,
    passes: Vec<PassDesc<B::Transients>>,
    contexts: Vec<FrameContext<B::Transients>>,
    slot: usize,
    image_index: u32,
    stats: FrameStats,
    post_submit: Vec<Box<dyn FnMut() + Send>>,
}

impl<B: RenderBackend> FrameDriver<B> {
    /// Creates the driver and one frame context per slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph registers no passes or slot resource
    /// creation fails.
    pub fn new(mut backend: B, graph: FrameGraphBuilder<B::Transients>) -> RhiResult<Self> {
        if graph.passes.is_empty() {
            return Err(RhiError::Configuration(
                "frame graph has no passes".to_string(),
            ));
        }

        let queues = graph.queue_order();
        let slot_count = backend.frame_slot_count().max(1);

        let mut contexts = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            contexts.push(FrameContext::new(&mut backend, &queues)?);
        }

        info!(
            "Frame driver created: {} slot(s), {} queue(s), {} pass(es)",
            slot_count,
            queues.len(),
            graph.passes.len()
        );

        Ok(Self {
            backend,
            queues,
            passes: graph.passes,
            contexts,
            slot: 0,
            image_index: 0,
            stats: FrameStats::new(),
            post_submit: Vec::new(),
        })
    }

    /// Returns the backend.
    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the backend mutably (swapchain recreation during resize).
    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Returns the slot the next frame will record into.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.slot
    }

    /// Returns the swapchain image index of the last acquired frame.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Returns the counters of the last completed frame.
    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Registers deferred work to run after every present (deferred
    /// resource releases and similar).
    pub fn add_post_submit(&mut self, callback: impl FnMut() + Send + 'static) {
        self.post_submit.push(Box::new(callback));
    }

    /// Runs one frame.
    ///
    /// Returns true when the swapchain is out of date or suboptimal and the
    /// caller should resize; the frame is skipped (acquire) or already
    /// presented (present) in that case.
    ///
    /// # Errors
    ///
    /// Returns the first backend or pass error encountered.
    pub fn render_frame(&mut self) -> RhiResult<bool> {
        self.stats.reset();
        let slot = self.slot;

        // 1. Acquire the next image on this slot's acquire semaphore.
        let acquire_semaphore = self.contexts[slot].acquire_semaphore;
        let started = Instant::now();
        let acquire = self.backend.acquire_image(acquire_semaphore)?;
        self.stats.acquire_wait = started.elapsed();
        if acquire.needs_resize {
            warn!("Swapchain needs recreation; skipping frame");
            return Ok(true);
        }
        self.image_index = acquire.image_index;
        let target = self.backend.frame_target(self.image_index);

        // 2. Wait until the GPU retired this slot's previous submissions.
        let started = Instant::now();
        for i in 0..self.contexts[slot].queues.len() {
            let fence = self.contexts[slot].queues[i].complete_fence;
            self.backend.wait_fence(fence)?;
            self.backend.reset_fence(fence)?;
        }
        self.stats.fence_wait = started.elapsed();

        // 3. The slot's transient data is no longer referenced; rewind.
        self.contexts[slot].transients.reset();

        // 4. Record every queue's command buffer through the pass list.
        for i in 0..self.contexts[slot].queues.len() {
            let command_buffer = self.contexts[slot].queues[i].command_buffer;
            self.backend.begin_commands(command_buffer)?;
        }

        for pass in &mut self.passes {
            let context = &mut self.contexts[slot];
            let Some(queue_index) = context.queues.iter().position(|q| q.kind == pass.queue)
            else {
                return Err(RhiError::Configuration(format!(
                    "pass '{}' targets unregistered queue {}",
                    pass.name, pass.queue
                )));
            };
            let command_buffer = context.queues[queue_index].command_buffer;

            let mut pass_context = PassContext {
                command_buffer,
                slot,
                image_index: self.image_index,
                target,
                transients: &mut context.transients,
                stats: &mut self.stats,
            };
            (pass.callback)(&mut pass_context)?;
            debug!("Recorded pass '{}'", pass.name);
        }

        for i in 0..self.contexts[slot].queues.len() {
            let command_buffer = self.contexts[slot].queues[i].command_buffer;
            self.backend.end_commands(command_buffer)?;
        }

        // 5. Make transient writes visible, then submit the queue chain.
        self.contexts[slot].transients.flush()?;

        let mut wait_semaphore = acquire_semaphore;
        for i in 0..self.contexts[slot].queues.len() {
            let queue = &self.contexts[slot].queues[i];
            let submit = QueueSubmit {
                queue: queue.kind,
                command_buffer: queue.command_buffer,
                wait_semaphore,
                wait_stage: queue.wait_stage,
                signal_semaphore: queue.complete_semaphore,
                fence: queue.complete_fence,
            };
            wait_semaphore = queue.complete_semaphore;
            self.backend.submit(&submit)?;
        }

        // 6. Present, run deferred work, and drain the queues.
        let suboptimal = self.backend.present(self.image_index, wait_semaphore)?;
        for callback in &mut self.post_submit {
            callback();
        }
        self.backend.wait_idle()?;

        self.slot = (self.slot + 1) % self.contexts.len();
        Ok(suboptimal)
    }

    /// Destroys and recreates every frame context.
    ///
    /// Called after the swapchain was recreated; the slot count may have
    /// changed with it. The caller must ensure the device is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if slot resource creation fails.
    pub fn rebuild_contexts(&mut self) -> RhiResult<()> {
        for context in self.contexts.drain(..) {
            context.destroy(&mut self.backend);
        }

        let slot_count = self.backend.frame_slot_count().max(1);
        for _ in 0..slot_count {
            self.contexts
                .push(FrameContext::new(&mut self.backend, &self.queues)?);
        }
        self.slot = 0;

        info!("Frame contexts rebuilt ({} slot(s))", slot_count);
        Ok(())
    }

    /// Blocks until all submitted GPU work completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&mut self) -> RhiResult<()> {
        self.backend.wait_idle()
    }
}

impl<B: RenderBackend> Drop for FrameDriver<B> {
    fn drop(&mut self) {
        // Shutdown drains in-flight work, never abandons it.
        if let Err(e) = self.backend.wait_idle() {
            tracing::error!("Failed to drain GPU work during shutdown: {:?}", e);
        }
        for context in self.contexts.drain(..) {
            context.destroy(&mut self.backend);
        }
    }
}
