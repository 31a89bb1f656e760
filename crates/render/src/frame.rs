//! Per-frame-slot resource bundles.
//!
//! One [`FrameContext`] exists per frame-in-flight slot. It owns the slot's
//! image-acquire semaphore, one [`SubmitQueueData`] per named submission
//! queue, and the slot's transient buffer managers. All contexts are created
//! when the swapchain size is known and recreated wholesale on resize; the
//! driver resets one of them every frame.
//!
//! The invariant the whole engine is built around: a context is only ever
//! touched by the thread currently processing its slot, and only after its
//! fences prove the GPU retired the slot's previous submission.

use std::sync::Arc;

use ash::vk;
use ember_rhi::RhiResult;
use ember_rhi::buffer::BufferUsage;
use ember_rhi::device::Device;
use ember_rhi::transient::{DEFAULT_BLOCK_SIZE, TransientBufferManager};

use crate::backend::RenderBackend;

/// Named submission queues, submitted in declared order with semaphore
/// chaining between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Work that must finish before the compute queue runs
    /// (shadow maps, G-buffer laydown).
    EarlyGraphics,
    /// Compute work between the graphics phases (light culling).
    Compute,
    /// The main forward/composite queue; its completion gates present.
    Graphics,
}

impl QueueKind {
    /// Returns a human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            QueueKind::EarlyGraphics => "early-graphics",
            QueueKind::Compute => "compute",
            QueueKind::Graphics => "graphics",
        }
    }

    /// Pipeline stage at which this queue's submission waits on the
    /// previous queue's completion semaphore.
    pub fn wait_stage(self) -> vk::PipelineStageFlags {
        match self {
            QueueKind::EarlyGraphics | QueueKind::Graphics => {
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            }
            QueueKind::Compute => vk::PipelineStageFlags::COMPUTE_SHADER,
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-queue resources of one frame slot.
pub struct SubmitQueueData {
    /// Which named queue this entry belongs to.
    pub kind: QueueKind,
    /// Command buffer re-recorded every frame.
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when this queue's submission completes; the next queue in
    /// the chain waits on it.
    pub complete_semaphore: vk::Semaphore,
    /// Signaled when this queue's submission retires; slot reuse waits on it.
    pub complete_fence: vk::Fence,
    /// Stage mask for the semaphore wait.
    pub wait_stage: vk::PipelineStageFlags,
}

/// The transient allocators owned by one frame slot.
///
/// Implemented by the real vertex/index/uniform manager trio and by the
/// no-op set the headless test backend provides.
pub trait TransientSet {
    /// Rewinds all allocators; called once the slot's fences are retired.
    fn reset(&mut self);

    /// Flushes all written ranges so GPU reads see coherent memory.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush fails.
    fn flush(&self) -> RhiResult<()>;
}

/// No-op transient set for backends without host-visible memory.
impl TransientSet for () {
    fn reset(&mut self) {}

    fn flush(&self) -> RhiResult<()> {
        Ok(())
    }
}

/// The vertex/index/uniform transient manager trio of one frame slot.
pub struct FrameTransients {
    /// Per-frame vertex data.
    pub vertex: TransientBufferManager,
    /// Per-frame index data.
    pub index: TransientBufferManager,
    /// Per-frame uniform data.
    pub uniform: TransientBufferManager,
}

impl FrameTransients {
    /// Creates the trio with default block sizes.
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            vertex: TransientBufferManager::new(
                device.clone(),
                BufferUsage::Vertex,
                DEFAULT_BLOCK_SIZE,
            ),
            index: TransientBufferManager::new(
                device.clone(),
                BufferUsage::Index,
                DEFAULT_BLOCK_SIZE,
            ),
            uniform: TransientBufferManager::new(
                device,
                BufferUsage::Uniform,
                DEFAULT_BLOCK_SIZE,
            ),
        }
    }
}

impl TransientSet for FrameTransients {
    fn reset(&mut self) {
        self.vertex.reset();
        self.index.reset();
        self.uniform.reset();
    }

    fn flush(&self) -> RhiResult<()> {
        self.vertex.flush()?;
        self.index.flush()?;
        self.uniform.flush()?;
        Ok(())
    }
}

/// All per-frame resources of one frame-in-flight slot.
pub struct FrameContext<T: TransientSet> {
    /// Signaled when the slot's acquired swapchain image is ready.
    pub acquire_semaphore: vk::Semaphore,
    /// One entry per named submission queue, in submission order.
    pub queues: Vec<SubmitQueueData>,
    /// The slot's transient allocators.
    pub transients: T,
}

impl<T: TransientSet> FrameContext<T> {
    /// Creates the slot's resources through the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource creation fails.
    pub fn new<B>(backend: &mut B, queue_kinds: &[QueueKind]) -> RhiResult<Self>
    where
        B: RenderBackend<Transients = T> + ?Sized,
    {
        let acquire_semaphore = backend.create_semaphore()?;

        let mut queues = Vec::with_capacity(queue_kinds.len());
        for &kind in queue_kinds {
            queues.push(SubmitQueueData {
                kind,
                command_buffer: backend.create_command_buffer()?,
                complete_semaphore: backend.create_semaphore()?,
                // Signaled so the first frame's slot wait does not block.
                complete_fence: backend.create_fence(true)?,
                wait_stage: kind.wait_stage(),
            });
        }

        let transients = backend.create_transients()?;

        Ok(Self {
            acquire_semaphore,
            queues,
            transients,
        })
    }

    /// Releases the slot's backend resources.
    pub fn destroy<B>(self, backend: &mut B)
    where
        B: RenderBackend<Transients = T> + ?Sized,
    {
        backend.destroy_semaphore(self.acquire_semaphore);
        for queue in self.queues {
            backend.destroy_semaphore(queue.complete_semaphore);
            backend.destroy_fence(queue.complete_fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_kind_names() {
        assert_eq!(QueueKind::EarlyGraphics.name(), "early-graphics");
        assert_eq!(QueueKind::Compute.name(), "compute");
        assert_eq!(QueueKind::Graphics.name(), "graphics");
    }

    #[test]
    fn test_compute_waits_at_compute_stage() {
        assert_eq!(
            QueueKind::Compute.wait_stage(),
            vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(
            QueueKind::Graphics.wait_stage(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
    }
}
