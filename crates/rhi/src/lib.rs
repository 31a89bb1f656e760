//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance and device creation
//! - Swapchain management
//! - Synchronization primitives
//! - Buffer management and per-frame transient allocation
//! - Descriptor layouts, pools, and the pool manager
//! - Shader passes and the pipeline cache
//! - Command recording with redundant-bind elision and barrier helpers

mod error;

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transient;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
