//! GPU buffer management.
//!
//! [`Buffer`] wraps VkBuffer with gpu-allocator managed memory. Host-visible
//! buffers are persistently mapped; [`Buffer::flush_range`] makes writes
//! visible to the device when the backing memory is not host-coherent, which
//! the transient allocators rely on once per frame.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
///
/// Determines the Vulkan usage flags and the memory location strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Uniform buffer - stores shader uniform data
    Uniform,
    /// Storage buffer - general-purpose GPU storage
    Storage,
    /// Texel buffer - formatted data read through buffer views
    Texel,
    /// Indirect buffer - stores draw/dispatch parameters
    Indirect,
    /// Staging buffer - CPU-writable transfer source
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Texel => {
                vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
                    | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Indirect => {
                vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns the preferred memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            // Host-writable so transient data can be written directly
            BufferUsage::Vertex
            | BufferUsage::Index
            | BufferUsage::Uniform
            | BufferUsage::Texel
            | BufferUsage::Indirect
            | BufferUsage::Staging => MemoryLocation::CpuToGpu,
            BufferUsage::Storage => MemoryLocation::GpuOnly,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Texel => "texel",
            BufferUsage::Indirect => "indirect",
            BufferUsage::Staging => "staging",
        }
    }
}

/// GPU buffer wrapper with managed memory.
///
/// Memory is managed by gpu-allocator, which handles suballocation and
/// memory type selection. Host-visible buffers stay mapped for their whole
/// lifetime.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a new buffer with the specified size, in the usage's
    /// preferred memory location.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or buffer/memory allocation
    /// fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        let location = usage.memory_location();
        Self::new_in(device, usage, location, size)
    }

    /// Creates a new buffer in host-visible, persistently mapped memory
    /// regardless of the usage's preferred location.
    ///
    /// The transient allocators use this so even storage-usage backing
    /// buffers honor the write-immediately contract.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or buffer/memory allocation
    /// fails.
    pub fn new_mapped(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        Self::new_in(device, usage, MemoryLocation::CpuToGpu, size)
    }

    fn new_in(
        device: Arc<Device>,
        usage: BufferUsage,
        location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Creates a new buffer and initializes it with data.
    ///
    /// # Errors
    ///
    /// Returns an error if buffer creation or the initial write fails.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Writes data into the mapped buffer at the given offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not host-visible or the write would
    /// exceed the buffer size.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped_ptr.add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Returns the persistent mapping, if the buffer is host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr().cast())
    }

    /// Flushes a written range to the device.
    ///
    /// Needed because host-visible memory is not necessarily host-coherent.
    /// The range is expanded to `non_coherent_atom_size` granularity as the
    /// API requires.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        let Some(allocation) = self.allocation.as_ref() else {
            return Ok(());
        };
        if size == 0 || allocation.mapped_ptr().is_none() {
            return Ok(());
        }

        let atom = self.device.limits().non_coherent_atom_size.max(1);
        let start = allocation.offset() + offset;
        let aligned_start = start - (start % atom);
        let aligned_size = (start + size - aligned_start).div_ceil(atom) * atom;

        let range = vk::MappedMemoryRange::default()
            .memory(unsafe { allocation.memory() })
            .offset(aligned_start)
            .size(aligned_size);

        unsafe {
            self.device
                .handle()
                .flush_mapped_memory_ranges(std::slice::from_ref(&range))?;
        }
        Ok(())
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer usage type.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Free allocation first, then destroy the buffer
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free buffer allocation: {:?}", e);
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Texel
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER)
        );
        assert!(
            BufferUsage::Indirect
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDIRECT_BUFFER)
        );
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
    }

    #[test]
    fn test_host_writable_locations() {
        assert_eq!(
            BufferUsage::Uniform.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Texel.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Storage.memory_location(),
            MemoryLocation::GpuOnly
        );
    }
}
