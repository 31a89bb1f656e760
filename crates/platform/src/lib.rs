//! Platform integration for the Ember renderer.
//!
//! - Window management via winit
//! - Vulkan surface creation
//! - Keyboard input state

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::{Surface, Window};

// Re-export winit types that hosts need for their event loop
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
