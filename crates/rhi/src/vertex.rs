//! Vertex input layouts and their structural identity.
//!
//! A [`VertexLayout`] describes the bindings and attributes a pipeline reads
//! its vertices through. Two layouts with the same structure must compare as
//! the same pipeline-cache key even when they were built independently, so
//! the cache key is a hash over the structural fields ([`VertexLayout::identity`]),
//! not the object's address.

use std::hash::{DefaultHasher, Hash, Hasher};

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// One vertex buffer binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    /// Binding slot.
    pub binding: u32,
    /// Distance in bytes between consecutive elements.
    pub stride: u32,
    /// Per-vertex or per-instance stepping.
    pub input_rate: vk::VertexInputRate,
}

/// One vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Binding slot the attribute reads from.
    pub binding: u32,
    /// Attribute format.
    pub format: vk::Format,
    /// Byte offset within the element.
    pub offset: u32,
}

/// A complete vertex input layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexLayout {
    bindings: Vec<VertexBinding>,
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Creates an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding.
    pub fn with_binding(mut self, binding: VertexBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, attribute: VertexAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Returns the structural identity used as the pipeline cache key.
    ///
    /// Never returns 0; that value is reserved for "no vertex layout"
    /// (e.g. fullscreen passes generating vertices in the shader).
    pub fn identity(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for binding in &self.bindings {
            binding.binding.hash(&mut hasher);
            binding.stride.hash(&mut hasher);
            binding.input_rate.as_raw().hash(&mut hasher);
        }
        for attribute in &self.attributes {
            attribute.location.hash(&mut hasher);
            attribute.binding.hash(&mut hasher);
            attribute.format.as_raw().hash(&mut hasher);
            attribute.offset.hash(&mut hasher);
        }
        hasher.finish().max(1)
    }

    /// Converts the bindings to Vulkan descriptions.
    pub fn vk_bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        self.bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: b.input_rate,
            })
            .collect()
    }

    /// Converts the attributes to Vulkan descriptions.
    pub fn vk_attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: a.format,
                offset: a.offset,
            })
            .collect()
    }
}

/// Simple vertex format with position and color, used by the demo app.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct BasicVertex {
    /// Position in clip space.
    pub position: [f32; 3],
    /// RGB color.
    pub color: [f32; 3],
}

impl BasicVertex {
    /// Creates a new vertex.
    #[inline]
    pub const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }

    /// Returns the vertex layout for this format.
    pub fn layout() -> VertexLayout {
        VertexLayout::new()
            .with_binding(VertexBinding {
                binding: 0,
                stride: std::mem::size_of::<Self>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .with_attribute(VertexAttribute {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            })
            .with_attribute(VertexAttribute {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_layouts_share_identity() {
        let a = BasicVertex::layout();
        let b = BasicVertex::layout();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_structural_difference_changes_identity() {
        let base = BasicVertex::layout();
        let wider = VertexLayout::new()
            .with_binding(VertexBinding {
                binding: 0,
                stride: 32,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .with_attribute(VertexAttribute {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            });
        assert_ne!(base.identity(), wider.identity());
    }

    #[test]
    fn test_identity_is_never_the_sentinel() {
        assert_ne!(VertexLayout::new().identity(), 0);
        assert_ne!(BasicVertex::layout().identity(), 0);
    }

    #[test]
    fn test_vk_conversion_preserves_fields() {
        let layout = BasicVertex::layout();
        let bindings = layout.vk_bindings();
        let attributes = layout.vk_attributes();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 24);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[1].offset, 12);
    }
}
