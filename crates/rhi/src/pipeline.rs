//! Shader passes, pipeline layouts, and the pipeline cache.
//!
//! A [`Pass`] bundles shader stages with fixed-function state and owns the
//! pipeline objects compiled from them:
//! - `build()` performs reflection-driven layout assembly: every stage's
//!   declared bindings are merged into per-set-index layout descriptions,
//!   the push-constant ranges are coalesced, and the pipeline layout is
//!   created. Building is idempotent until [`Pass::make_dirty`] is called.
//! - `get_graphics_pipeline()` lazily compiles and caches one pipeline per
//!   vertex-layout identity and attachment set; `get_compute_pipeline()`
//!   caches a single pipeline since compute has no vertex-layout variance.
//!
//! Pipelines are specialized to attachment formats (dynamic rendering)
//! rather than render-pass/subpass pairs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ash::vk;
use tracing::{debug, info};

use crate::descriptor::{BindingDesc, DescriptorSetLayout, DescriptorSetLayoutInfo};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};
use crate::vertex::VertexLayout;

/// Cache key reserved for pipelines compiled without a vertex layout.
const NO_VERTEX_LAYOUT_KEY: u64 = 0;

/// Vulkan pipeline layout wrapper.
///
/// Immutable after creation and safe to share between threads.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    /// Creates a new pipeline layout.
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout ({} set layout(s), {} push constant range(s))",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self {
            device,
            layout,
            push_constant_ranges: push_constant_ranges.to_vec(),
        })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Returns the merged push-constant ranges.
    #[inline]
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Merges push-constant ranges that share a stage mask into one range
/// spanning their union.
pub fn merge_push_constant_ranges(
    ranges: &[vk::PushConstantRange],
) -> Vec<vk::PushConstantRange> {
    let mut merged: Vec<vk::PushConstantRange> = Vec::new();
    for range in ranges {
        match merged
            .iter_mut()
            .find(|m| m.stage_flags == range.stage_flags)
        {
            Some(existing) => {
                let start = existing.offset.min(range.offset);
                let end = (existing.offset + existing.size).max(range.offset + range.size);
                existing.offset = start;
                existing.size = end - start;
            }
            None => merged.push(*range),
        }
    }
    merged
}

/// Vulkan pipeline wrapper.
///
/// Immutable after creation; cached and shared by the owning [`Pass`].
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    fn from_graphics_info(
        device: Arc<Device>,
        create_info: &vk::GraphicsPipelineCreateInfo,
    ) -> RhiResult<Self> {
        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[*create_info], None)
                .map_err(|(_, result)| result)?[0]
        };
        info!("Graphics pipeline created");
        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    fn from_compute_info(
        device: Arc<Device>,
        create_info: &vk::ComputePipelineCreateInfo,
    ) -> RhiResult<Self> {
        let pipeline = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[*create_info], None)
                .map_err(|(_, result)| result)?[0]
        };
        info!("Compute pipeline created");
        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Returns the pipeline bind point (graphics or compute).
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    /// Do not cull any faces.
    None,
    /// Cull front-facing triangles.
    Front,
    /// Cull back-facing triangles.
    #[default]
    Back,
}

impl CullMode {
    /// Converts to Vulkan cull mode flags.
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Depth comparison operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    /// Converts to Vulkan compare op.
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Color blend configuration for one attachment.
#[derive(Clone, Copy, Debug)]
pub struct ColorBlendAttachment {
    /// Enable blending for this attachment.
    pub blend_enable: bool,
    /// Source color blend factor.
    pub src_color_blend_factor: vk::BlendFactor,
    /// Destination color blend factor.
    pub dst_color_blend_factor: vk::BlendFactor,
    /// Color blend operation.
    pub color_blend_op: vk::BlendOp,
    /// Source alpha blend factor.
    pub src_alpha_blend_factor: vk::BlendFactor,
    /// Destination alpha blend factor.
    pub dst_alpha_blend_factor: vk::BlendFactor,
    /// Alpha blend operation.
    pub alpha_blend_op: vk::BlendOp,
    /// Color write mask.
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl ColorBlendAttachment {
    /// Standard alpha blending: `src * src_alpha + dst * (1 - src_alpha)`.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            ..Default::default()
        }
    }

    fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable.into(),
            src_color_blend_factor: self.src_color_blend_factor,
            dst_color_blend_factor: self.dst_color_blend_factor,
            color_blend_op: self.color_blend_op,
            src_alpha_blend_factor: self.src_alpha_blend_factor,
            dst_alpha_blend_factor: self.dst_alpha_blend_factor,
            alpha_blend_op: self.alpha_blend_op,
            color_write_mask: self.color_write_mask,
        }
    }
}

/// Fixed-function state of a pass.
///
/// Viewport and scissor are always dynamic; everything else is baked into
/// the compiled pipelines.
#[derive(Clone, Debug)]
pub struct PassState {
    /// Primitive topology.
    pub topology: vk::PrimitiveTopology,
    /// Polygon rasterization mode.
    pub polygon_mode: vk::PolygonMode,
    /// Face culling mode.
    pub cull_mode: CullMode,
    /// Front face winding order.
    pub front_face: vk::FrontFace,
    /// Rasterization sample count.
    pub samples: vk::SampleCountFlags,
    /// Enable depth testing.
    pub depth_test: bool,
    /// Enable depth writes.
    pub depth_write: bool,
    /// Depth comparison operation.
    pub depth_compare: CompareOp,
    /// Per-attachment blend state; empty means opaque defaults for every
    /// color attachment.
    pub blend_attachments: Vec<ColorBlendAttachment>,
    /// Additional dynamic states beyond viewport and scissor.
    pub extra_dynamic_states: Vec<vk::DynamicState>,
}

impl Default for PassState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: CullMode::Back,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: true,
            depth_write: true,
            depth_compare: CompareOp::Less,
            blend_attachments: Vec::new(),
            extra_dynamic_states: Vec::new(),
        }
    }
}

/// Attachment formats a graphics pipeline is specialized against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderTargets {
    /// Color attachment formats, in attachment order.
    pub color_formats: Vec<vk::Format>,
    /// Depth attachment format, if any.
    pub depth_format: Option<vk::Format>,
}

/// Keyed, fail-safe pipeline cache.
///
/// Values are built outside the lock; when two threads race to insert the
/// same key, the first insertion wins and the loser's object is dropped.
struct KeyedCache<T> {
    map: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> KeyedCache<T> {
    fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create<F>(&self, key: u64, create: F) -> RhiResult<Arc<T>>
    where
        F: FnOnce() -> RhiResult<T>,
    {
        if let Some(existing) = self.map.lock().unwrap().get(&key) {
            return Ok(existing.clone());
        }

        let created = Arc::new(create()?);
        let mut map = self.map.lock().unwrap();
        Ok(map.entry(key).or_insert(created).clone())
    }

    fn clear(&self) {
        self.map.lock().unwrap().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }
}

/// A shader pass: stage bundle, fixed-function state, and pipeline cache.
///
/// Graphics passes carry a vertex stage (plus optional geometry/tessellation
/// stages) and usually a fragment stage; compute passes carry exactly one
/// compute stage. The two are mutually exclusive.
pub struct Pass {
    device: Arc<Device>,
    name: String,
    stages: Vec<Arc<Shader>>,
    state: PassState,
    built: bool,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    layout: Option<Arc<PipelineLayout>>,
    graphics_pipelines: KeyedCache<Pipeline>,
    compute_pipeline: Mutex<Option<Arc<Pipeline>>>,
}

impl Pass {
    /// Creates a pass from its shader stages and fixed-function state.
    ///
    /// # Errors
    ///
    /// Returns a pipeline error when a compute stage is combined with
    /// graphics stages.
    pub fn new(
        device: Arc<Device>,
        name: impl Into<String>,
        stages: Vec<Arc<Shader>>,
        state: PassState,
    ) -> RhiResult<Self> {
        let has_compute = stages.iter().any(|s| s.stage() == ShaderStage::Compute);
        if has_compute && stages.len() > 1 {
            return Err(RhiError::PipelineError(
                "a compute stage cannot be combined with graphics stages".to_string(),
            ));
        }

        Ok(Self {
            device,
            name: name.into(),
            stages,
            state,
            built: false,
            set_layouts: Vec::new(),
            layout: None,
            graphics_pipelines: KeyedCache::new(),
            compute_pipeline: Mutex::new(None),
        })
    }

    /// Returns the pass name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the descriptor set layouts, sorted by ascending set index.
    ///
    /// Empty until [`Pass::build`] has run.
    #[inline]
    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    /// Returns the pipeline layout.
    ///
    /// `None` until [`Pass::build`] has run.
    #[inline]
    pub fn layout(&self) -> Option<&Arc<PipelineLayout>> {
        self.layout.as_ref()
    }

    /// Replaces the shader stages and invalidates everything built from the
    /// old ones.
    pub fn set_stages(&mut self, stages: Vec<Arc<Shader>>) {
        self.stages = stages;
        self.make_dirty();
    }

    /// Drops the built layouts and every cached pipeline.
    ///
    /// The next `build`/`get_*_pipeline` call rebuilds from the current
    /// shader stages.
    pub fn make_dirty(&mut self) {
        self.built = false;
        self.set_layouts.clear();
        self.layout = None;
        self.graphics_pipelines.clear();
        *self.compute_pipeline.lock().unwrap() = None;
        debug!("Pass '{}' marked dirty", self.name);
    }

    /// Assembles descriptor set layouts and the pipeline layout from the
    /// stages' reflection data.
    ///
    /// Idempotent: once built, calls return immediately until
    /// [`Pass::make_dirty`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the merged push-constant ranges
    /// exceed the device limit, or a Vulkan error from layout creation.
    pub fn build(&mut self) -> RhiResult<()> {
        if self.built {
            return Ok(());
        }

        // Merge every stage's declared bindings into per-set layout infos.
        let mut set_infos: Vec<DescriptorSetLayoutInfo> = Vec::new();
        for shader in &self.stages {
            let stage_flags = shader.stage().to_vk_stage();
            for binding in &shader.reflection().bindings {
                let index = match set_infos.iter().position(|s| s.set == binding.set) {
                    Some(index) => index,
                    None => {
                        set_infos.push(DescriptorSetLayoutInfo::new(binding.set));
                        set_infos.len() - 1
                    }
                };
                set_infos[index].merge_binding(BindingDesc {
                    binding: binding.binding,
                    ty: binding.ty,
                    count: binding.count,
                    stages: stage_flags,
                    name: binding.name.clone(),
                });
            }
        }
        set_infos.sort_by_key(|s| s.set);

        let mut set_layouts = Vec::with_capacity(set_infos.len());
        for info in set_infos {
            set_layouts.push(Arc::new(DescriptorSetLayout::new(
                self.device.clone(),
                info,
            )?));
        }

        // Collect and merge push-constant ranges.
        let declared: Vec<vk::PushConstantRange> = self
            .stages
            .iter()
            .filter_map(|shader| {
                shader.reflection().push_constants.map(|pc| {
                    vk::PushConstantRange {
                        stage_flags: shader.stage().to_vk_stage(),
                        offset: pc.offset,
                        size: pc.size,
                    }
                })
            })
            .collect();
        let merged = merge_push_constant_ranges(&declared);

        let max_push = self.device.limits().max_push_constants_size;
        for range in &merged {
            if range.offset + range.size > max_push {
                return Err(RhiError::Configuration(format!(
                    "push constant range [{}..{}) exceeds device limit {}",
                    range.offset,
                    range.offset + range.size,
                    max_push
                )));
            }
        }

        let layout_handles: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|l| l.handle()).collect();
        let layout = PipelineLayout::new(self.device.clone(), &layout_handles, &merged)?;

        self.set_layouts = set_layouts;
        self.layout = Some(Arc::new(layout));
        self.built = true;

        info!(
            "Built pass '{}' ({} set layout(s), {} push constant range(s))",
            self.name,
            self.set_layouts.len(),
            merged.len()
        );
        Ok(())
    }

    /// Returns the graphics pipeline for the given attachments and vertex
    /// layout, compiling it on first use.
    ///
    /// The cache key is the vertex layout's structural identity; `None`
    /// maps to a reserved key for layout-less (fullscreen) passes.
    ///
    /// # Errors
    ///
    /// Returns an error when the pass has not been built, holds a compute
    /// stage, or pipeline creation fails.
    pub fn get_graphics_pipeline(
        &self,
        targets: &RenderTargets,
        vertex_layout: Option<&VertexLayout>,
    ) -> RhiResult<Arc<Pipeline>> {
        let layout = self.layout.clone().ok_or_else(|| {
            RhiError::PipelineError(format!("pass '{}' has not been built", self.name))
        })?;
        if self.stages.iter().any(|s| s.stage() == ShaderStage::Compute) {
            return Err(RhiError::PipelineError(format!(
                "pass '{}' is a compute pass",
                self.name
            )));
        }

        let key = vertex_layout.map_or(NO_VERTEX_LAYOUT_KEY, VertexLayout::identity);
        self.graphics_pipelines.get_or_create(key, || {
            self.compile_graphics_pipeline(&layout, targets, vertex_layout)
        })
    }

    /// Returns the compute pipeline, compiling it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error when the pass has not been built, is not a compute
    /// pass, or pipeline creation fails.
    pub fn get_compute_pipeline(&self) -> RhiResult<Arc<Pipeline>> {
        let layout = self.layout.clone().ok_or_else(|| {
            RhiError::PipelineError(format!("pass '{}' has not been built", self.name))
        })?;
        let compute = self
            .stages
            .iter()
            .find(|s| s.stage() == ShaderStage::Compute)
            .ok_or_else(|| {
                RhiError::PipelineError(format!("pass '{}' has no compute stage", self.name))
            })?;

        let mut cached = self.compute_pipeline.lock().unwrap();
        if let Some(pipeline) = cached.as_ref() {
            return Ok(pipeline.clone());
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(compute.stage_create_info())
            .layout(layout.handle());
        let pipeline = Arc::new(Pipeline::from_compute_info(
            self.device.clone(),
            &create_info,
        )?);
        *cached = Some(pipeline.clone());
        Ok(pipeline)
    }

    fn compile_graphics_pipeline(
        &self,
        layout: &PipelineLayout,
        targets: &RenderTargets,
        vertex_layout: Option<&VertexLayout>,
    ) -> RhiResult<Pipeline> {
        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .map(|s| s.stage_create_info())
            .collect();

        let vertex_bindings = vertex_layout.map(VertexLayout::vk_bindings).unwrap_or_default();
        let vertex_attributes = vertex_layout
            .map(VertexLayout::vk_attributes)
            .unwrap_or_default();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.state.topology);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.state.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.state.cull_mode.to_vk())
            .front_face(self.state.front_face);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.state.samples);

        let has_depth = targets.depth_format.is_some();
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth && self.state.depth_test)
            .depth_write_enable(has_depth && self.state.depth_write)
            .depth_compare_op(self.state.depth_compare.to_vk())
            .max_depth_bounds(1.0);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> =
            if self.state.blend_attachments.is_empty() {
                targets
                    .color_formats
                    .iter()
                    .map(|_| ColorBlendAttachment::default().to_vk())
                    .collect()
            } else {
                self.state
                    .blend_attachments
                    .iter()
                    .map(|a| a.to_vk())
                    .collect()
            };
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        for &state in &self.state.extra_dynamic_states {
            if !dynamic_states.contains(&state) {
                dynamic_states.push(state);
            }
        }
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&targets.color_formats);
        if let Some(depth_format) = targets.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        Pipeline::from_graphics_info(self.device.clone(), &create_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::BasicVertex;

    #[test]
    fn test_push_constant_merge_same_stage() {
        let ranges = [
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: 16,
            },
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 8,
                size: 24,
            },
        ];
        let merged = merge_push_constant_ranges(&ranges);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(merged[0].offset, 0);
        assert_eq!(merged[0].size, 32);
    }

    #[test]
    fn test_push_constant_merge_keeps_distinct_stages() {
        let ranges = [
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: 16,
            },
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                offset: 16,
                size: 16,
            },
        ];
        let merged = merge_push_constant_ranges(&ranges);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_push_constant_merge_disjoint_spans_union() {
        let ranges = [
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 32,
                size: 16,
            },
            vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: 8,
            },
        ];
        let merged = merge_push_constant_ranges(&ranges);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].offset, 0);
        assert_eq!(merged[0].size, 48);
    }

    #[test]
    fn test_keyed_cache_returns_same_value_for_same_key() {
        let cache: KeyedCache<u32> = KeyedCache::new();
        let mut builds = 0;
        let key = BasicVertex::layout().identity();

        let first = cache
            .get_or_create(key, || {
                builds += 1;
                Ok(7)
            })
            .unwrap();
        let second = cache
            .get_or_create(key, || {
                builds += 1;
                Ok(9)
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds, 1);
    }

    #[test]
    fn test_keyed_cache_clear_rebuilds() {
        let cache: KeyedCache<u32> = KeyedCache::new();
        let key = BasicVertex::layout().identity();

        let first = cache.get_or_create(key, || Ok(1)).unwrap();
        cache.clear();
        let second = cache.get_or_create(key, || Ok(2)).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keyed_cache_distinct_keys_build_independently() {
        let cache: KeyedCache<u32> = KeyedCache::new();
        cache.get_or_create(1, || Ok(10)).unwrap();
        cache.get_or_create(2, || Ok(20)).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_pass_state_defaults() {
        let state = PassState::default();
        assert_eq!(state.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(state.cull_mode, CullMode::Back);
        assert!(state.depth_test);
        assert_eq!(state.depth_compare, CompareOp::Less);
    }

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Front.to_vk(), vk::CullModeFlags::FRONT);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
    }

    #[test]
    fn test_alpha_blend_attachment() {
        let attachment = ColorBlendAttachment::alpha_blend();
        assert!(attachment.blend_enable);
        assert_eq!(
            attachment.src_color_blend_factor,
            vk::BlendFactor::SRC_ALPHA
        );
        assert_eq!(
            attachment.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }
}
