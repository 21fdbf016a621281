//! Core utilities shared by the swapframe crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities
//! - Frame loop configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{FrameConfig, MAX_FRAMES_IN_FLIGHT_LIMIT, PresentModePreference};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
