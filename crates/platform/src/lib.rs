//! Platform layer for swapframe.
//!
//! This crate provides:
//! - A winit window driven by a pump-style event loop
//! - The [`DrawableSurface`] contract the lifecycle coordinator blocks on
//! - A resize notification channel between the window and the frame loop

mod drawable;
mod resize;
mod window;

pub use drawable::DrawableSurface;
pub use resize::{ResizeListener, ResizeNotifier, resize_channel};
pub use window::PlatformWindow;

pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
