//! Frame engine for swapframe.
//!
//! This crate drives the per-frame CPU/GPU synchronization and the surface
//! lifecycle:
//! - [`frame_sync`] - the in-flight slot ring and image ownership map
//! - [`frame_driver`] - the acquire/submit/present state machine
//! - [`lifecycle`] - ordered teardown and rebuild on surface invalidation
//! - [`presenter`] - the entry point the application loop calls each tick
//!
//! Chain collaborators implement [`ChainResources`]. Two ship with the crate:
//! [`triangle::TrianglePass`] for Vulkan and [`headless::HeadlessChain`] for
//! the host-simulated device.

pub mod chain;
pub mod frame_driver;
pub mod frame_sync;
pub mod headless;
pub mod lifecycle;
pub mod presenter;
pub mod triangle;

pub use chain::ChainResources;
pub use frame_driver::{FrameDriver, FrameOutcome, FrameState, RebuildReason};
pub use frame_sync::FrameSyncTable;
pub use lifecycle::{LifecycleCoordinator, RecreateOutcome};
pub use presenter::Presenter;
