//! Render Hardware Interface for the swapframe presenter.
//!
//! This crate defines the device context the frame engine runs against and
//! the scoped wrappers it owns:
//! - [`device::GpuDevice`] - the explicitly passed device/queue context
//! - [`sync`] - fences, semaphores and in-flight slots
//! - [`swapchain`] - the presentable surface set and its negotiation rules
//! - [`headless`] - a host-simulated device for tests and headless runs
//! - [`vulkan`] - the ash-backed device plus the Vulkan object wrappers
//!   used by chain collaborators (buffers, descriptors, pipelines, ...)

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
