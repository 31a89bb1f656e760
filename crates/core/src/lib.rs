//! Core utilities for the Ember renderer.
//!
//! This crate provides foundational types and utilities used across the renderer:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Per-frame statistics counters
//! - A counting semaphore for frame handoff between threads

mod error;
mod logging;
mod stats;
mod sync;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use stats::FrameStats;
pub use sync::Semaphore;
pub use timer::Timer;
