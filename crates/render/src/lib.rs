//! Frame-graph driver and rendering front end.
//!
//! This crate owns the per-frame execution machinery:
//! - [`backend`]: the device/swapchain facade the driver runs against, with
//!   the concrete Vulkan implementation
//! - [`frame`]: per-frame-slot resource bundles and the named submission
//!   queues
//! - [`graph`]: pass registration and the acquire/record/submit/present
//!   state machine
//! - [`resource_set`]: named bindable resources and batched descriptor
//!   updates
//! - [`handoff`]: the logic-thread / render-thread double-buffer handoff
//! - [`renderer`]: the host-facing facade

pub mod backend;
pub mod frame;
pub mod graph;
pub mod handoff;
pub mod renderer;
pub mod resource_set;

pub use backend::{FrameTarget, ImageAcquire, QueueSubmit, RenderBackend, VulkanBackend};
pub use frame::{FrameContext, FrameTransients, QueueKind, SubmitQueueData, TransientSet};
pub use graph::{FrameDriver, FrameGraphBuilder, PassContext};
pub use handoff::FrameHandoff;
pub use renderer::{GraphSetup, Renderer, RendererConfig};
pub use resource_set::{BindableResource, ResourceSet};
