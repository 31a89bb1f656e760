//! Shader module management and reflection data.
//!
//! [`Shader`] wraps VkShaderModule together with the reflection data the
//! pass layer consumes: the ordered list of descriptor bindings the stage
//! declares and its push-constant ranges. Reflection is produced by the
//! compilation front end and arrives here prepared; this module stores and
//! serves it verbatim.

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage
    Vertex,
    /// Fragment (pixel) shader stage
    Fragment,
    /// Geometry shader stage
    Geometry,
    /// Tessellation control shader stage
    TessControl,
    /// Tessellation evaluation shader stage
    TessEvaluation,
    /// Compute shader stage
    Compute,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One descriptor binding declared by a shader stage.
#[derive(Clone, Debug)]
pub struct ReflectedBinding {
    /// Descriptor set index.
    pub set: u32,
    /// Binding index within the set.
    pub binding: u32,
    /// Descriptor type.
    pub ty: vk::DescriptorType,
    /// Array size (1 for scalars).
    pub count: u32,
    /// Name declared in the shader.
    pub name: String,
}

/// One push-constant range declared by a shader stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReflectedPushConstants {
    /// Byte offset of the range.
    pub offset: u32,
    /// Size of the range in bytes.
    pub size: u32,
}

/// Reflection data for one compiled shader stage.
///
/// Supplied by the shader compilation front end; consumed by the pass
/// layout builder.
#[derive(Clone, Debug, Default)]
pub struct ShaderReflection {
    /// Declared descriptor bindings, in declaration order.
    pub bindings: Vec<ReflectedBinding>,
    /// Declared push-constant range, if any.
    pub push_constants: Option<ReflectedPushConstants>,
}

/// Vulkan shader module wrapper.
///
/// Immutable after creation; the pass layer shares it via `Arc`.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
    reflection: ShaderReflection,
}

impl Shader {
    /// Creates a shader module from a SPIR-V file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the module cannot be
    /// created.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
        reflection: ShaderReflection,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);
        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;
        Self::from_spirv_bytes(device, &bytes, stage, entry_point, reflection)
    }

    /// Creates a shader module from SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not 4-byte aligned, the entry point
    /// name is invalid, or module creation fails.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
        reflection: ShaderReflection,
    ) -> RhiResult<Self> {
        if !bytes.len().is_multiple_of(4) {
            return Err(RhiError::ShaderError(format!(
                "SPIR-V code must be 4-byte aligned, got {} bytes",
                bytes.len()
            )));
        }

        let code: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        info!(
            "Created {} shader module ({} declared binding(s))",
            stage,
            reflection.bindings.len()
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
            reflection,
        })
    }

    /// Returns the pipeline stage descriptor for pipeline creation.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }

    /// Returns the Vulkan module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the shader stage.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Returns the stage's reflection data.
    #[inline]
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_flags() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
        assert_eq!(
            ShaderStage::TessControl.to_vk_stage(),
            vk::ShaderStageFlags::TESSELLATION_CONTROL
        );
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_reflection_default_is_empty() {
        let reflection = ShaderReflection::default();
        assert!(reflection.bindings.is_empty());
        assert!(reflection.push_constants.is_none());
    }
}
