//! Named bindable resources and batched descriptor-set updates.
//!
//! A [`ResourceSet`] owns one descriptor set per frame-in-flight slot for a
//! single set layout. [`ResourceSet::bind`] only stages a write and marks
//! the binding dirty; nothing reaches the device until
//! [`ResourceSet::update_sets`] runs for a slot, which coalesces maximal
//! runs of contiguously dirty bindings into batched update calls.
//!
//! Resources are a tagged enum rather than trait objects: each variant
//! knows the descriptor-write shape it contributes, and binding a variant
//! incompatible with the declared descriptor type is a programmer error
//! caught by a debug assertion.

use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use ember_rhi::RhiResult;
use ember_rhi::buffer::{Buffer, BufferUsage};
use ember_rhi::descriptor::{
    DescriptorPoolManager, DescriptorSetAllocation, DescriptorSetLayout, update_descriptor_sets,
};
use ember_rhi::device::Device;
use tracing::debug;

/// A resource that can back a descriptor binding.
#[derive(Clone, Debug)]
pub enum BindableResource {
    /// Uniform buffer region.
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    /// Uniform buffer with a bind-time dynamic offset.
    DynamicUniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    /// Storage buffer region.
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    /// Storage buffer with a bind-time dynamic offset.
    DynamicStorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    /// Sampled image with its sampler.
    SampledImage {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    /// Storage image.
    StorageImage { view: vk::ImageView },
    /// Uniform texel buffer view.
    UniformTexelBuffer { view: vk::BufferView },
    /// Storage texel buffer view.
    StorageTexelBuffer { view: vk::BufferView },
    /// CPU-staged uniform data, realized as a per-slot uniform buffer at
    /// update time. Material parameters write into the staging vector
    /// directly; re-marking the binding dirty re-uploads and re-binds it.
    InlineUniform { data: Vec<u8> },
}

impl BindableResource {
    /// The descriptor type this resource contributes.
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            BindableResource::UniformBuffer { .. } | BindableResource::InlineUniform { .. } => {
                vk::DescriptorType::UNIFORM_BUFFER
            }
            BindableResource::DynamicUniformBuffer { .. } => {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            }
            BindableResource::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            BindableResource::DynamicStorageBuffer { .. } => {
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            }
            BindableResource::SampledImage { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindableResource::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
            BindableResource::UniformTexelBuffer { .. } => {
                vk::DescriptorType::UNIFORM_TEXEL_BUFFER
            }
            BindableResource::StorageTexelBuffer { .. } => {
                vk::DescriptorType::STORAGE_TEXEL_BUFFER
            }
        }
    }
}

/// Coalesces a dirty bit vector into maximal runs of contiguous set bits.
pub fn dirty_runs(dirty: &[bool]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    for (index, &bit) in dirty.iter().enumerate() {
        match (bit, start) {
            (true, None) => start = Some(index),
            (false, Some(s)) => {
                runs.push(s..index);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(s..dirty.len());
    }
    runs
}

struct SlotState {
    set: vk::DescriptorSet,
    dirty: Vec<bool>,
    staged: Vec<Option<BindableResource>>,
    inline_buffers: Vec<Option<Buffer>>,
}

/// Per-slot descriptor sets for one set layout, with dirty tracking.
pub struct ResourceSet {
    device: Arc<Device>,
    layout: Arc<DescriptorSetLayout>,
    allocation: Option<DescriptorSetAllocation>,
    slots: Vec<SlotState>,
}

impl ResourceSet {
    /// Allocates one descriptor set per frame slot from the pool manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool allocation fails.
    pub fn new(
        device: Arc<Device>,
        pool_manager: &DescriptorPoolManager,
        layout: Arc<DescriptorSetLayout>,
        slot_count: usize,
    ) -> RhiResult<Self> {
        let allocation = pool_manager.allocate_sets(&layout, slot_count as u32)?;
        let binding_count = layout.info().bindings.len();

        let slots = allocation
            .sets
            .iter()
            .map(|&set| SlotState {
                set,
                dirty: vec![false; binding_count],
                staged: std::iter::repeat_with(|| None).take(binding_count).collect(),
                inline_buffers: std::iter::repeat_with(|| None).take(binding_count).collect(),
            })
            .collect();

        debug!(
            "Resource set created: set {}, {} slot(s), {} binding(s)",
            layout.info().set,
            slot_count,
            binding_count
        );

        Ok(Self {
            device,
            layout,
            allocation: Some(allocation),
            slots,
        })
    }

    /// Returns the descriptor set handle for a frame slot.
    #[inline]
    pub fn handle(&self, slot: usize) -> vk::DescriptorSet {
        self.slots[slot].set
    }

    /// Returns the set layout.
    #[inline]
    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    fn binding_position(&self, binding: u32) -> Option<usize> {
        self.layout
            .info()
            .bindings
            .iter()
            .position(|b| b.binding == binding)
    }

    /// Stages `resource` for `binding` on every frame slot and marks it
    /// dirty. Does not touch the device.
    pub fn bind(&mut self, binding: u32, resource: BindableResource) {
        let Some(position) = self.binding_position(binding) else {
            debug_assert!(false, "binding {binding} is not part of the layout");
            return;
        };
        debug_assert_eq!(
            self.layout.info().bindings[position].ty,
            resource.descriptor_type(),
            "resource type does not match the declared descriptor type"
        );

        for slot in &mut self.slots {
            slot.staged[position] = Some(resource.clone());
            slot.dirty[position] = true;
        }
    }

    /// Stages `resource` for `binding` on a single frame slot.
    ///
    /// Used for resources that differ per slot (per-frame uniform buffers).
    pub fn bind_for_slot(&mut self, slot: usize, binding: u32, resource: BindableResource) {
        let Some(position) = self.binding_position(binding) else {
            debug_assert!(false, "binding {binding} is not part of the layout");
            return;
        };
        debug_assert_eq!(
            self.layout.info().bindings[position].ty,
            resource.descriptor_type(),
            "resource type does not match the declared descriptor type"
        );

        self.slots[slot].staged[position] = Some(resource);
        self.slots[slot].dirty[position] = true;
    }

    /// Replaces the staged inline-uniform data of `binding` on every slot
    /// and marks it dirty, triggering a re-upload and re-bind at the next
    /// update.
    pub fn set_inline_data(&mut self, binding: u32, data: &[u8]) {
        self.bind(
            binding,
            BindableResource::InlineUniform {
                data: data.to_vec(),
            },
        );
    }

    /// Pushes every staged write of the slot's dirty bindings to the device.
    ///
    /// Dirty bindings are coalesced into maximal contiguous runs, one
    /// batched update call per run.
    ///
    /// # Errors
    ///
    /// Returns an error if realizing an inline uniform buffer fails.
    pub fn update_sets(&mut self, slot: usize) -> RhiResult<()> {
        // Realize inline uniforms first so their buffers exist when the
        // write descriptors are built.
        let state = &mut self.slots[slot];
        for position in 0..state.dirty.len() {
            if !state.dirty[position] {
                continue;
            }
            if let Some(BindableResource::InlineUniform { data }) = &state.staged[position] {
                let needs_new = state.inline_buffers[position]
                    .as_ref()
                    .is_none_or(|b| b.size() < data.len() as vk::DeviceSize);
                if needs_new {
                    state.inline_buffers[position] = Some(Buffer::new(
                        self.device.clone(),
                        BufferUsage::Uniform,
                        (data.len() as vk::DeviceSize).max(16),
                    )?);
                }
                if let Some(buffer) = &state.inline_buffers[position] {
                    buffer.write_data(0, data)?;
                    buffer.flush_range(0, data.len() as vk::DeviceSize)?;
                }
            }
        }

        let state = &self.slots[slot];
        let bindings = &self.layout.info().bindings;

        for run in dirty_runs(&state.dirty) {
            let run_len = run.len();
            let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::with_capacity(run_len);
            let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::with_capacity(run_len);
            let mut texel_views: Vec<vk::BufferView> = Vec::with_capacity(run_len);

            enum InfoRef {
                Buffer(usize),
                Image(usize),
                Texel(usize),
            }
            let mut refs: Vec<(usize, InfoRef)> = Vec::with_capacity(run_len);

            for position in run.clone() {
                let Some(resource) = &state.staged[position] else {
                    continue;
                };
                match resource {
                    BindableResource::UniformBuffer {
                        buffer,
                        offset,
                        range,
                    }
                    | BindableResource::DynamicUniformBuffer {
                        buffer,
                        offset,
                        range,
                    }
                    | BindableResource::StorageBuffer {
                        buffer,
                        offset,
                        range,
                    }
                    | BindableResource::DynamicStorageBuffer {
                        buffer,
                        offset,
                        range,
                    } => {
                        buffer_infos.push(
                            vk::DescriptorBufferInfo::default()
                                .buffer(*buffer)
                                .offset(*offset)
                                .range(*range),
                        );
                        refs.push((position, InfoRef::Buffer(buffer_infos.len() - 1)));
                    }
                    BindableResource::InlineUniform { data } => {
                        let Some(buffer) = &state.inline_buffers[position] else {
                            continue;
                        };
                        buffer_infos.push(
                            vk::DescriptorBufferInfo::default()
                                .buffer(buffer.handle())
                                .offset(0)
                                .range((data.len() as vk::DeviceSize).max(16)),
                        );
                        refs.push((position, InfoRef::Buffer(buffer_infos.len() - 1)));
                    }
                    BindableResource::SampledImage {
                        view,
                        sampler,
                        layout,
                    } => {
                        image_infos.push(
                            vk::DescriptorImageInfo::default()
                                .sampler(*sampler)
                                .image_view(*view)
                                .image_layout(*layout),
                        );
                        refs.push((position, InfoRef::Image(image_infos.len() - 1)));
                    }
                    BindableResource::StorageImage { view } => {
                        image_infos.push(
                            vk::DescriptorImageInfo::default()
                                .image_view(*view)
                                .image_layout(vk::ImageLayout::GENERAL),
                        );
                        refs.push((position, InfoRef::Image(image_infos.len() - 1)));
                    }
                    BindableResource::UniformTexelBuffer { view }
                    | BindableResource::StorageTexelBuffer { view } => {
                        texel_views.push(*view);
                        refs.push((position, InfoRef::Texel(texel_views.len() - 1)));
                    }
                }
            }

            let mut writes: Vec<vk::WriteDescriptorSet> = Vec::with_capacity(refs.len());
            for (position, info_ref) in &refs {
                let binding = &bindings[*position];
                let resource = match &state.staged[*position] {
                    Some(resource) => resource,
                    None => continue,
                };
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(state.set)
                    .dst_binding(binding.binding)
                    .dst_array_element(0)
                    .descriptor_type(resource.descriptor_type());
                let write = match info_ref {
                    InfoRef::Buffer(i) => {
                        write.buffer_info(std::slice::from_ref(&buffer_infos[*i]))
                    }
                    InfoRef::Image(i) => write.image_info(std::slice::from_ref(&image_infos[*i])),
                    InfoRef::Texel(i) => {
                        write.texel_buffer_view(std::slice::from_ref(&texel_views[*i]))
                    }
                };
                writes.push(write);
            }

            update_descriptor_sets(&self.device, &writes);
        }

        for bit in &mut self.slots[slot].dirty {
            *bit = false;
        }
        Ok(())
    }

    /// Frees the descriptor sets back into their owning pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the device-side free fails.
    pub fn free(mut self, pool_manager: &DescriptorPoolManager) -> RhiResult<()> {
        if let Some(allocation) = self.allocation.take() {
            pool_manager.free_sets(allocation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_runs_empty() {
        assert!(dirty_runs(&[]).is_empty());
        assert!(dirty_runs(&[false, false]).is_empty());
    }

    #[test]
    fn test_dirty_runs_single_run() {
        assert_eq!(dirty_runs(&[true, true, false]), vec![0..2]);
        assert_eq!(dirty_runs(&[false, true, true]), vec![1..3]);
    }

    #[test]
    fn test_dirty_runs_coalesces_maximal_runs() {
        let dirty = [true, false, true, true, false, true];
        assert_eq!(dirty_runs(&dirty), vec![0..1, 2..4, 5..6]);
    }

    #[test]
    fn test_dirty_runs_all_set() {
        assert_eq!(dirty_runs(&[true; 5]), vec![0..5]);
    }

    #[test]
    fn test_descriptor_types() {
        let uniform = BindableResource::UniformBuffer {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        assert_eq!(
            uniform.descriptor_type(),
            vk::DescriptorType::UNIFORM_BUFFER
        );

        let dynamic = BindableResource::DynamicStorageBuffer {
            buffer: vk::Buffer::null(),
            offset: 0,
            range: 64,
        };
        assert_eq!(
            dynamic.descriptor_type(),
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        );

        let inline = BindableResource::InlineUniform { data: vec![0; 16] };
        assert_eq!(inline.descriptor_type(), vk::DescriptorType::UNIFORM_BUFFER);
    }
}
