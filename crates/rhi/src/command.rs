//! Command pool, command buffer, and frame recording.
//!
//! [`CommandPool`] and [`CommandBuffer`] are thin wrappers over the Vulkan
//! objects. [`CommandRecorder`] layers the per-frame recording state on top:
//! redundant pipeline and descriptor-set binds are elided through a
//! [`BindTracker`], and draw/dispatch calls accumulate into an explicit
//! [`FrameStats`] value the frame driver drains when recording ends.

use std::sync::Arc;

use ash::vk;
use ember_core::FrameStats;
use tracing::info;

use crate::device::Device;
use crate::error::RhiResult;
use crate::pipeline::Pipeline;
use crate::transient::TransientAlloc;

/// Vulkan command pool wrapper.
///
/// Each pool belongs to one queue family. Pools are not thread-safe; the
/// frame driver keeps one per recording thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a command pool for the given queue family.
    ///
    /// Created with `RESET_COMMAND_BUFFER` so individual buffers can be
    /// re-recorded each frame.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Creates a transient command pool for one-shot command buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new_transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn with_flags(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        info!("Command pool created for queue family {}", queue_family_index);

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family index this pool belongs to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates a primary command buffer from this pool.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers[0])
    }

    /// Returns a reference to the device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Vulkan command buffer wrapper.
///
/// Does not own the underlying handle; it is freed with the owning pool.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a new command buffer from the given pool.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_command_buffer()?;
        Ok(Self { device, buffer })
    }

    /// Wraps an existing command buffer handle.
    #[inline]
    pub fn from_handle(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording for one-time submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is already recording.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Ends recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not recording.
    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    /// Resets the buffer so it can be re-recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    /// Begins dynamic rendering.
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    /// Ends dynamic rendering.
    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    /// Sets the viewport.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    /// Sets the scissor rectangle.
    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// Updates push constant data from a byte slice.
    pub fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_push_constants(self.buffer, layout, stages, offset, data);
        }
    }

    /// Inserts a pipeline barrier with image barriers only.
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }

    /// Copies data between buffers.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }

    /// Copies data from a buffer to an image.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                dst_layout,
                regions,
            );
        }
    }

    /// Blits (scaled copy) between images.
    pub fn blit_image(
        &self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.device.handle().cmd_blit_image(
                self.buffer,
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
                filter,
            );
        }
    }

    /// Clears regions of a color image.
    pub fn clear_color_image(
        &self,
        image: vk::Image,
        image_layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device.handle().cmd_clear_color_image(
                self.buffer,
                image,
                image_layout,
                color,
                ranges,
            );
        }
    }
}

/// Maximum number of descriptor sets tracked for bind elision.
pub const MAX_BOUND_SETS: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CachedSet {
    set: vk::DescriptorSet,
    dynamic_offset: Option<u32>,
}

/// Tracks the currently bound pipeline and descriptor sets so redundant
/// binds can be skipped.
///
/// Binding a different pipeline clears the cached descriptor-set state: a
/// pipeline switch may invalidate set compatibility, so every set is
/// re-bound on first use afterwards.
#[derive(Debug, Default)]
pub struct BindTracker {
    pipeline: vk::Pipeline,
    sets: [CachedSet; MAX_BOUND_SETS],
}

impl BindTracker {
    /// Creates a tracker with nothing bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pipeline bind. Returns true when the underlying bind call
    /// must be issued.
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) -> bool {
        if self.pipeline == pipeline {
            return false;
        }
        self.pipeline = pipeline;
        self.sets = [CachedSet::default(); MAX_BOUND_SETS];
        true
    }

    /// Records a descriptor-set bind at `index`. Returns true when the
    /// underlying bind call must be issued.
    pub fn bind_descriptor_set(
        &mut self,
        index: usize,
        set: vk::DescriptorSet,
        dynamic_offset: Option<u32>,
    ) -> bool {
        let cached = CachedSet {
            set,
            dynamic_offset,
        };
        if index < MAX_BOUND_SETS && self.sets[index] == cached {
            return false;
        }
        if index < MAX_BOUND_SETS {
            self.sets[index] = cached;
        }
        true
    }

    /// Forgets all cached state; the next binds are issued unconditionally.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Records one submission queue's commands for one frame.
///
/// Owns the elision state and the statistics counters for the recording;
/// [`CommandRecorder::finish`] hands the counters back to the frame driver.
pub struct CommandRecorder<'a> {
    cmd: &'a CommandBuffer,
    tracker: BindTracker,
    stats: FrameStats,
}

impl<'a> CommandRecorder<'a> {
    /// Starts recording state on top of a begun command buffer.
    pub fn new(cmd: &'a CommandBuffer) -> Self {
        Self {
            cmd,
            tracker: BindTracker::new(),
            stats: FrameStats::new(),
        }
    }

    /// Returns the command buffer being recorded.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        self.cmd
    }

    /// Binds a pipeline, skipping the call when it is already bound.
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        if !self.tracker.bind_pipeline(pipeline.handle()) {
            return;
        }
        self.stats.pipeline_binds += 1;
        unsafe {
            self.cmd.device.handle().cmd_bind_pipeline(
                self.cmd.buffer,
                pipeline.bind_point(),
                pipeline.handle(),
            );
        }
    }

    /// Binds one descriptor set, skipping the call when the same set with
    /// the same dynamic offset is already bound at that index.
    pub fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        index: u32,
        set: vk::DescriptorSet,
        dynamic_offset: Option<u32>,
    ) {
        if !self
            .tracker
            .bind_descriptor_set(index as usize, set, dynamic_offset)
        {
            return;
        }
        self.stats.descriptor_binds += 1;

        let sets = [set];
        let offsets: &[u32] = match dynamic_offset.as_ref() {
            Some(offset) => std::slice::from_ref(offset),
            None => &[],
        };
        unsafe {
            self.cmd.device.handle().cmd_bind_descriptor_sets(
                self.cmd.buffer,
                bind_point,
                layout,
                index,
                &sets,
                offsets,
            );
        }
    }

    /// Binds a transient allocation as a vertex buffer.
    pub fn bind_vertex_alloc(&mut self, binding: u32, alloc: &TransientAlloc) {
        let buffers = [alloc.buffer];
        let offsets = [alloc.offset];
        unsafe {
            self.cmd.device.handle().cmd_bind_vertex_buffers(
                self.cmd.buffer,
                binding,
                &buffers,
                &offsets,
            );
        }
    }

    /// Binds a transient allocation as an index buffer.
    pub fn bind_index_alloc(&mut self, alloc: &TransientAlloc, index_type: vk::IndexType) {
        unsafe {
            self.cmd.device.handle().cmd_bind_index_buffer(
                self.cmd.buffer,
                alloc.buffer,
                alloc.offset,
                index_type,
            );
        }
    }

    /// Issues a non-indexed draw.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.stats.draw_calls += 1;
        self.stats.triangles += u64::from(vertex_count / 3) * u64::from(instance_count);
        unsafe {
            self.cmd.device.handle().cmd_draw(
                self.cmd.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Issues an indexed draw.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.stats.draw_calls += 1;
        self.stats.triangles += u64::from(index_count / 3) * u64::from(instance_count);
        unsafe {
            self.cmd.device.handle().cmd_draw_indexed(
                self.cmd.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Issues an indirect draw; the triangle count lives GPU-side and is not
    /// counted.
    pub fn draw_indirect(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        self.stats.draw_calls += u64::from(draw_count);
        unsafe {
            self.cmd.device.handle().cmd_draw_indirect(
                self.cmd.buffer,
                buffer,
                offset,
                draw_count,
                stride,
            );
        }
    }

    /// Dispatches compute work.
    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.stats.dispatches += 1;
        unsafe {
            self.cmd.device.handle().cmd_dispatch(
                self.cmd.buffer,
                group_count_x,
                group_count_y,
                group_count_z,
            );
        }
    }

    /// Dispatches compute work indirectly.
    pub fn dispatch_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.stats.dispatches += 1;
        unsafe {
            self.cmd
                .device
                .handle()
                .cmd_dispatch_indirect(self.cmd.buffer, buffer, offset);
        }
    }

    /// Ends the recording state and returns the accumulated counters.
    pub fn finish(self) -> FrameStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn pipeline(id: u64) -> vk::Pipeline {
        vk::Pipeline::from_raw(id)
    }

    fn set(id: u64) -> vk::DescriptorSet {
        vk::DescriptorSet::from_raw(id)
    }

    #[test]
    fn test_repeated_pipeline_bind_is_elided() {
        let mut tracker = BindTracker::new();
        assert!(tracker.bind_pipeline(pipeline(1)));
        assert!(!tracker.bind_pipeline(pipeline(1)));
    }

    #[test]
    fn test_alternating_pipeline_binds_all_issue() {
        let mut tracker = BindTracker::new();
        assert!(tracker.bind_pipeline(pipeline(1)));
        assert!(tracker.bind_pipeline(pipeline(2)));
        assert!(tracker.bind_pipeline(pipeline(1)));
    }

    #[test]
    fn test_descriptor_set_bind_is_elided_per_index() {
        let mut tracker = BindTracker::new();
        tracker.bind_pipeline(pipeline(1));
        assert!(tracker.bind_descriptor_set(0, set(10), None));
        assert!(!tracker.bind_descriptor_set(0, set(10), None));
        // Different index is independent state.
        assert!(tracker.bind_descriptor_set(1, set(10), None));
    }

    #[test]
    fn test_dynamic_offset_change_defeats_elision() {
        let mut tracker = BindTracker::new();
        assert!(tracker.bind_descriptor_set(0, set(10), Some(0)));
        assert!(!tracker.bind_descriptor_set(0, set(10), Some(0)));
        assert!(tracker.bind_descriptor_set(0, set(10), Some(256)));
        // Dropping the dynamic offset entirely also re-binds.
        assert!(tracker.bind_descriptor_set(0, set(10), None));
    }

    #[test]
    fn test_pipeline_change_clears_cached_sets() {
        let mut tracker = BindTracker::new();
        tracker.bind_pipeline(pipeline(1));
        assert!(tracker.bind_descriptor_set(0, set(10), None));
        assert!(!tracker.bind_descriptor_set(0, set(10), None));

        tracker.bind_pipeline(pipeline(2));
        assert!(tracker.bind_descriptor_set(0, set(10), None));
    }

    #[test]
    fn test_out_of_range_set_index_always_binds() {
        let mut tracker = BindTracker::new();
        assert!(tracker.bind_descriptor_set(MAX_BOUND_SETS, set(1), None));
        assert!(tracker.bind_descriptor_set(MAX_BOUND_SETS, set(1), None));
    }

    #[test]
    fn test_reset_forgets_state() {
        let mut tracker = BindTracker::new();
        tracker.bind_pipeline(pipeline(1));
        tracker.reset();
        assert!(tracker.bind_pipeline(pipeline(1)));
    }
}
