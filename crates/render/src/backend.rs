//! The device/swapchain facade the frame driver runs against.
//!
//! [`RenderBackend`] captures exactly the collaborator surface the driver
//! needs: frame-slot resource creation, fence wait/reset, image acquire,
//! command buffer begin/end, queue submission, and present. The production
//! implementation is [`VulkanBackend`]; the integration tests drive the
//! same state machine with a recording no-op backend.

use std::sync::Arc;

use ash::vk;
use ember_rhi::command::CommandPool;
use ember_rhi::device::Device;
use ember_rhi::swapchain::Swapchain;
use ember_rhi::sync::{Fence, Semaphore};
use ember_rhi::{RhiError, RhiResult};
use tracing::debug;

use crate::frame::{FrameTransients, QueueKind, TransientSet};

/// Result of acquiring the next swapchain image.
#[derive(Clone, Copy, Debug)]
pub struct ImageAcquire {
    /// Index of the acquired image.
    pub image_index: u32,
    /// The swapchain is out of date or suboptimal; the caller should
    /// request a resize. The acquired index is still valid when
    /// `image_index` is meaningful for the backend.
    pub needs_resize: bool,
}

/// The attachment a frame renders into.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameTarget {
    /// The swapchain image.
    pub image: vk::Image,
    /// Its color view.
    pub view: vk::ImageView,
    /// The image format.
    pub format: vk::Format,
    /// The image extent.
    pub extent: vk::Extent2D,
}

/// One queue submission in the per-frame chain.
#[derive(Clone, Copy, Debug)]
pub struct QueueSubmit {
    /// Target queue.
    pub queue: QueueKind,
    /// The recorded command buffer.
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore this submission waits on (the previous queue's completion
    /// semaphore, or the acquire semaphore for the first queue).
    pub wait_semaphore: vk::Semaphore,
    /// Stage mask for the wait.
    pub wait_stage: vk::PipelineStageFlags,
    /// Semaphore signaled on completion.
    pub signal_semaphore: vk::Semaphore,
    /// Fence signaled when the submission retires.
    pub fence: vk::Fence,
}

/// Device and swapchain operations the frame driver depends on.
pub trait RenderBackend {
    /// The transient allocator bundle of one frame slot.
    type Transients: TransientSet;

    /// Number of frame-in-flight slots (the swapchain image count).
    fn frame_slot_count(&self) -> usize;

    /// Creates an unsignaled binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    fn create_semaphore(&mut self) -> RhiResult<vk::Semaphore>;

    /// Creates a fence.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    fn create_fence(&mut self, signaled: bool) -> RhiResult<vk::Fence>;

    /// Allocates a primary command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    fn create_command_buffer(&mut self) -> RhiResult<vk::CommandBuffer>;

    /// Creates one frame slot's transient allocators.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    fn create_transients(&mut self) -> RhiResult<Self::Transients>;

    /// Destroys a semaphore created by this backend.
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);

    /// Destroys a fence created by this backend.
    fn destroy_fence(&mut self, fence: vk::Fence);

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    fn wait_fence(&mut self, fence: vk::Fence) -> RhiResult<()>;

    /// Resets a signaled fence.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()>;

    /// Acquires the next swapchain image, signaling `semaphore` when ready.
    ///
    /// # Errors
    ///
    /// Returns an error on device loss; out-of-date surfaces as
    /// `needs_resize`, not an error.
    fn acquire_image(&mut self, semaphore: vk::Semaphore) -> RhiResult<ImageAcquire>;

    /// Returns the render target of the acquired image.
    fn frame_target(&self, image_index: u32) -> FrameTarget;

    /// Resets and begins a command buffer for one-time submission.
    ///
    /// # Errors
    ///
    /// Returns an error if begin fails.
    fn begin_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Ends a command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if end fails.
    fn end_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Submits one queue's commands with the given synchronization.
    ///
    /// # Errors
    ///
    /// Returns an error if submission fails.
    fn submit(&mut self, submit: &QueueSubmit) -> RhiResult<()>;

    /// Presents the acquired image, waiting on `wait_semaphore`.
    ///
    /// Returns true when the swapchain should be recreated.
    ///
    /// # Errors
    ///
    /// Returns an error on device loss.
    fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore) -> RhiResult<bool>;

    /// Blocks until all submitted work completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    fn wait_idle(&mut self) -> RhiResult<()>;
}

/// The production backend: a logical device, its queues, and a swapchain.
///
/// Synchronization objects are created through the RHI wrappers and kept
/// here; the frame driver only ever sees their raw handles, and
/// `destroy_*` drops the owning wrapper.
pub struct VulkanBackend {
    device: Arc<Device>,
    swapchain: Swapchain,
    command_pool: CommandPool,
    semaphores: Vec<Semaphore>,
    fences: Vec<Fence>,
}

impl VulkanBackend {
    /// Creates the backend over an existing device and swapchain.
    ///
    /// # Errors
    ///
    /// Returns an error if the command pool cannot be created.
    pub fn new(device: Arc<Device>, swapchain: Swapchain) -> RhiResult<Self> {
        let graphics_family = device.queue_families().graphics_family.ok_or_else(|| {
            RhiError::Configuration("no queue family supports graphics".into())
        })?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        Ok(Self {
            device,
            swapchain,
            command_pool,
            semaphores: Vec::new(),
            fences: Vec::new(),
        })
    }

    fn owned_fence(&self, fence: vk::Fence) -> RhiResult<&Fence> {
        self.fences
            .iter()
            .find(|f| f.handle() == fence)
            .ok_or_else(|| {
                RhiError::InvalidHandle("fence is not owned by this backend".to_string())
            })
    }

    /// Returns the device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the swapchain.
    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Returns the swapchain mutably, for recreation during resize.
    #[inline]
    pub fn swapchain_mut(&mut self) -> &mut Swapchain {
        &mut self.swapchain
    }

    fn queue_for(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::EarlyGraphics | QueueKind::Graphics => self.device.graphics_queue(),
            QueueKind::Compute => self.device.compute_queue(),
        }
    }
}

impl RenderBackend for VulkanBackend {
    type Transients = FrameTransients;

    fn frame_slot_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn create_semaphore(&mut self) -> RhiResult<vk::Semaphore> {
        let semaphore = Semaphore::new(self.device.clone())?;
        let handle = semaphore.handle();
        self.semaphores.push(semaphore);
        Ok(handle)
    }

    fn create_fence(&mut self, signaled: bool) -> RhiResult<vk::Fence> {
        let fence = Fence::new(self.device.clone(), signaled)?;
        let handle = fence.handle();
        self.fences.push(fence);
        Ok(handle)
    }

    fn create_command_buffer(&mut self) -> RhiResult<vk::CommandBuffer> {
        self.command_pool.allocate_command_buffer()
    }

    fn create_transients(&mut self) -> RhiResult<FrameTransients> {
        Ok(FrameTransients::new(self.device.clone()))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        // Dropping the wrapper destroys the Vulkan object.
        self.semaphores.retain(|s| s.handle() != semaphore);
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.fences.retain(|f| f.handle() != fence);
    }

    fn wait_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        self.owned_fence(fence)?.wait(u64::MAX)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        self.owned_fence(fence)?.reset()
    }

    fn frame_target(&self, image_index: u32) -> FrameTarget {
        let index = image_index as usize;
        FrameTarget {
            image: self.swapchain.image(index),
            view: self.swapchain.image_view(index),
            format: self.swapchain.format(),
            extent: self.swapchain.extent(),
        }
    }

    fn acquire_image(&mut self, semaphore: vk::Semaphore) -> RhiResult<ImageAcquire> {
        match self.swapchain.acquire_next_image(semaphore) {
            Ok((image_index, suboptimal)) => Ok(ImageAcquire {
                image_index,
                needs_resize: suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire");
                Ok(ImageAcquire {
                    image_index: 0,
                    needs_resize: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn begin_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.device
                .handle()
                .begin_command_buffer(command_buffer, &begin_info)?;
        }
        Ok(())
    }

    fn end_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(command_buffer)?;
        }
        Ok(())
    }

    fn submit(&mut self, submit: &QueueSubmit) -> RhiResult<()> {
        let wait_semaphores = [submit.wait_semaphore];
        let wait_stages = [submit.wait_stage];
        let command_buffers = [submit.command_buffer];
        let signal_semaphores = [submit.signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.handle().queue_submit(
                self.queue_for(submit.queue),
                &[submit_info],
                submit.fence,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore) -> RhiResult<bool> {
        match self
            .swapchain
            .present(self.device.present_queue(), image_index, wait_semaphore)
        {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during present");
                Ok(true)
            }
            Err(vk::Result::SUBOPTIMAL_KHR) => {
                debug!("Swapchain suboptimal during present");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}
