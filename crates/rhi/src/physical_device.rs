//! Physical device selection and queue family discovery.
//!
//! Enumerates the available GPUs, rejects those missing a required queue
//! capability or Vulkan 1.3 support, scores the remainder, and snapshots the
//! device limits the rest of the engine needs (offset alignments, push
//! constant budget, non-coherent flush granularity).

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Queue family indices for the capabilities the engine submits to.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyIndices {
    /// Family supporting graphics operations.
    pub graphics_family: Option<u32>,
    /// Family supporting presentation to the surface.
    pub present_family: Option<u32>,
    /// Family supporting compute, preferring a dedicated (non-graphics) one.
    pub compute_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Returns true if all required families were found.
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the distinct family indices, for device queue creation.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = [
            self.graphics_family,
            self.present_family,
            self.compute_family,
        ]
        .iter()
        .flatten()
        .copied()
        .collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Device limits the engine consumes after device creation.
///
/// Snapshotting these up front keeps the transient allocators and pipeline
/// layout validation free of repeated property queries.
#[derive(Clone, Copy, Debug)]
pub struct DeviceLimits {
    /// Minimum offset alignment for uniform buffer bindings.
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    /// Minimum offset alignment for storage buffer bindings.
    pub min_storage_buffer_offset_alignment: vk::DeviceSize,
    /// Minimum offset alignment for texel buffer views.
    pub min_texel_buffer_offset_alignment: vk::DeviceSize,
    /// Flush granularity for host-visible, non-coherent memory.
    pub non_coherent_atom_size: vk::DeviceSize,
    /// Maximum total push constant size in bytes.
    pub max_push_constants_size: u32,
    /// Maximum number of descriptor sets bound simultaneously.
    pub max_bound_descriptor_sets: u32,
}

impl From<&vk::PhysicalDeviceLimits> for DeviceLimits {
    fn from(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            min_texel_buffer_offset_alignment: limits.min_texel_buffer_offset_alignment,
            non_coherent_atom_size: limits.non_coherent_atom_size,
            max_push_constants_size: limits.max_push_constants_size,
            max_bound_descriptor_sets: limits.max_bound_descriptor_sets,
        }
    }
}

/// Information about a selected physical device.
pub struct PhysicalDeviceInfo {
    /// The physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, type, limits).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported base features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heap and type information.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Discovered queue families.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown")
        }
    }

    /// Returns the snapshot of limits the engine consumes.
    pub fn limits(&self) -> DeviceLimits {
        DeviceLimits::from(&self.properties.limits)
    }

    /// Selects a memory type matching the given requirements.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no memory type in `type_bits`
    /// carries all the requested property flags.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32, RhiError> {
        for i in 0..self.memory_properties.memory_type_count {
            let supported = type_bits & (1 << i) != 0;
            let flags = self.memory_properties.memory_types[i as usize].property_flags;
            if supported && flags.contains(properties) {
                return Ok(i);
            }
        }
        Err(RhiError::Configuration(format!(
            "no memory type matches bits {:#x} with flags {:?}",
            type_bits, properties
        )))
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device for rendering.
///
/// Devices missing a graphics or present queue family, Vulkan 1.3 support,
/// or sampler anisotropy are rejected; the rest are scored with a strong
/// preference for discrete GPUs.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;
    for device in devices {
        let Some(info) = check_suitability(instance, device, surface, surface_loader) else {
            continue;
        };
        let score = rate_device(&info);
        debug!("GPU '{}' scored {}", info.device_name(), score);
        if best.as_ref().is_none_or(|(_, s)| score > *s) {
            best = Some((info, score));
        }
    }

    let Some((selected, score)) = best else {
        warn!("No GPU offers the required queue capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU '{}' (score {})",
        selected.device_name(),
        score
    );
    Ok(selected)
}

fn check_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("GPU skipped: missing graphics or present queue family");
        return None;
    }

    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU skipped: sampler anisotropy not supported");
        return None;
    }

    // Dynamic rendering requires 1.3
    let major = vk::api_version_major(properties.api_version);
    let minor = vk::api_version_minor(properties.api_version);
    if (major, minor) < (1, 3) {
        debug!("GPU skipped: Vulkan {}.{} < 1.3", major, minor);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();
    let mut dedicated_compute: Option<u32> = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_compute = family.queue_flags.contains(vk::QueueFlags::COMPUTE);

        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }

        if has_compute {
            if !has_graphics && dedicated_compute.is_none() {
                dedicated_compute = Some(i);
            } else if indices.compute_family.is_none() {
                indices.compute_family = Some(i);
            }
        }

        if indices.present_family.is_none() {
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            };
            if present_support {
                indices.present_family = Some(i);
            }
        }
    }

    if let Some(dedicated) = dedicated_compute {
        indices.compute_family = Some(dedicated);
    }
    if indices.compute_family.is_none() {
        // Graphics queues implicitly support compute
        indices.compute_family = indices.graphics_family;
    }

    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    // Dedicated compute queues allow the light-culling pass to overlap
    if info.queue_families.compute_family != info.queue_families.graphics_family {
        score += 500;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_families_dedups() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            compute_family: Some(1),
        };
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn test_incomplete_without_present() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            ..Default::default()
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_limits_snapshot() {
        let raw = vk::PhysicalDeviceLimits {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 64,
            min_texel_buffer_offset_alignment: 16,
            non_coherent_atom_size: 128,
            max_push_constants_size: 128,
            max_bound_descriptor_sets: 8,
            ..Default::default()
        };
        let limits = DeviceLimits::from(&raw);
        assert_eq!(limits.min_uniform_buffer_offset_alignment, 256);
        assert_eq!(limits.non_coherent_atom_size, 128);
        assert_eq!(limits.max_push_constants_size, 128);
    }
}
