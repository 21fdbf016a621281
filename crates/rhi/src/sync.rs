//! Scoped synchronization objects.
//!
//! This module wraps the signaling primitives the frame engine relies on:
//! - [`Semaphore`] - device-to-device ordering between queue operations
//! - [`Fence`] - device-to-host completion, the only thing the host blocks on
//! - [`InFlightSlot`] - the primitives one in-flight frame needs
//!
//! Every wrapper holds an `Arc` of the device context it was created from and
//! releases its handle in `Drop`, so a slot outlives nothing it depends on.
//!
//! # Example
//!
//! ```no_run
//! use swapframe_rhi::headless::HeadlessDevice;
//! use swapframe_rhi::sync::{Fence, Semaphore};
//!
//! # fn example() -> Result<(), swapframe_rhi::RhiError> {
//! let device = HeadlessDevice::new();
//!
//! let image_acquired = Semaphore::new(device.clone())?;
//! let fence = Fence::new(device, true)?;
//!
//! // Observe the previous submission before reusing the slot
//! fence.wait(u64::MAX)?;
//! fence.reset()?;
//! # let _ = image_acquired;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::GpuDevice;
use crate::error::RhiResult;

/// Binary semaphore wrapper.
///
/// Used for device-side ordering only: the acquire signals one, the graphics
/// submission waits on it, and presentation waits on the one the submission
/// signals. The host never waits on a semaphore.
pub struct Semaphore<D: GpuDevice> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: GpuDevice> Semaphore<D> {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        debug!("Created semaphore {:?}", semaphore);
        Ok(Self { device, semaphore })
    }

    /// Returns the semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
        debug!("Destroyed semaphore {:?}", self.semaphore);
    }
}

/// Fence wrapper.
///
/// Fences tell the host that a submission has retired. The frame driver
/// waits on a slot's fence before touching anything that submission used,
/// and resets it only right before the next submission that will signal it.
pub struct Fence<D: GpuDevice> {
    device: Arc<D>,
    fence: vk::Fence,
}

impl<D: GpuDevice> Fence<D> {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The device context
    /// * `signaled` - If true, the fence starts signaled so the first wait on
    ///   it returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        debug!(
            "Created fence {:?} ({})",
            fence,
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    /// Returns the fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Timeout in nanoseconds. `u64::MAX` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns `RhiError::VulkanError(vk::Result::TIMEOUT)` if the timeout
    /// expires, or the device error if the wait fails.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fences(&[self.fence], timeout)
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fences(&[self.fence])
    }

    /// Non-blocking status check. A failed query reads as not signaled.
    pub fn is_signaled(&self) -> bool {
        matches!(self.device.fence_status(self.fence), Ok(true))
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        debug!("Destroyed fence {:?}", self.fence);
    }
}

/// The synchronization primitives of one frame in flight.
///
/// # Usage Pattern
///
/// ```text
/// 1. Wait for fence (host observes the slot's previous submission)
/// 2. Acquire an image, signaling image_acquired
/// 3. Reset fence
/// 4. Submit: wait image_acquired, signal render_complete and fence
/// 5. Present, waiting on render_complete
/// ```
///
/// Slots are created once at startup and survive every surface rebuild.
pub struct InFlightSlot<D: GpuDevice> {
    image_acquired: Semaphore<D>,
    render_complete: Semaphore<D>,
    fence: Fence<D>,
}

impl<D: GpuDevice> InFlightSlot<D> {
    /// Creates a slot with both semaphores unsignaled and the fence signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if any primitive fails to create. Primitives created
    /// before the failure are released.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let image_acquired = Semaphore::new(device.clone())?;
        let render_complete = Semaphore::new(device.clone())?;
        // Signaled so the first wait on a fresh slot does not block
        let fence = Fence::new(device, true)?;

        Ok(Self {
            image_acquired,
            render_complete,
            fence,
        })
    }

    /// Semaphore signaled by image acquisition, waited on by submission.
    #[inline]
    pub fn image_acquired(&self) -> &Semaphore<D> {
        &self.image_acquired
    }

    /// Semaphore signaled by submission, waited on by presentation.
    #[inline]
    pub fn render_complete(&self) -> &Semaphore<D> {
        &self.render_complete
    }

    /// Fence signaled when the slot's submission retires.
    #[inline]
    pub fn fence(&self) -> &Fence<D> {
        &self.fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_fence_created_signaled() {
        let device = HeadlessDevice::new();
        let fence = Fence::new(device.clone(), true).unwrap();
        assert!(fence.is_signaled());

        fence.wait(u64::MAX).unwrap();
        fence.reset().unwrap();
        assert!(!fence.is_signaled());
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_unsignaled_fence_times_out() {
        let device = HeadlessDevice::new();
        let fence = Fence::new(device, false).unwrap();

        let err = fence.wait(0).unwrap_err();
        assert!(matches!(
            err,
            crate::RhiError::VulkanError(vk::Result::TIMEOUT)
        ));
    }

    #[test]
    fn test_drop_releases_handles() {
        let device = HeadlessDevice::new();
        {
            let _slot = InFlightSlot::new(device.clone()).unwrap();
            let live = device.live_objects();
            assert_eq!(live.fences, 1);
            assert_eq!(live.semaphores, 2);
        }
        let live = device.live_objects();
        assert_eq!(live.fences, 0);
        assert_eq!(live.semaphores, 0);
    }

    #[test]
    fn test_slot_primitives_are_distinct() {
        let device = HeadlessDevice::new();
        let slot = InFlightSlot::new(device).unwrap();
        assert_ne!(
            slot.image_acquired().handle(),
            slot.render_complete().handle()
        );
        assert!(slot.fence().is_signaled());
    }

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore<HeadlessDevice>>();
        assert_send_sync::<Fence<HeadlessDevice>>();
        assert_send_sync::<InFlightSlot<HeadlessDevice>>();
    }
}
