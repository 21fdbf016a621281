//! The per-frame state machine.
//!
//! One call to [`FrameDriver::drive`] runs a full cycle on the active slot:
//!
//! ```text
//! 1. wait for the slot's fence
//! 2. acquire an image, signaling the slot's image-acquired semaphore
//! 3. if another slot owns the image, wait for that slot's fence
//! 4. record the active slot as the image's owner
//! 5. let the chain update per-image data
//! 6. reset the fence and submit the image's command buffer
//! 7. present, gated on the slot's render-complete semaphore
//! 8. advance to the next slot
//! ```
//!
//! The fence is reset only after a successful acquire. An acquire that
//! reports out-of-date leaves the slot exactly as it found it, so the next
//! cycle's wait returns immediately instead of waiting on a fence nothing
//! will signal. Steps 1 and 6 together bound queued submissions to the slot
//! count.

use std::fmt;

use ash::vk;
use tracing::{debug, trace};

use swapframe_rhi::device::{FrameSubmission, GpuDevice};
use swapframe_rhi::swapchain::SurfaceSet;
use swapframe_rhi::{RhiError, RhiResult};

use crate::chain::ChainResources;
use crate::frame_sync::FrameSyncTable;

/// Where the driver is within a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    WaitingForImage,
    Submitted,
    Presenting,
}

/// Why the surface set has to be rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildReason {
    /// The surface no longer matches the chain. Nothing can be presented.
    OutOfDate,
    /// Presentation still works but the chain is not an exact match.
    Suboptimal,
    /// The window reported a new size.
    Resized,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebuildReason::OutOfDate => "out of date",
            RebuildReason::Suboptimal => "suboptimal",
            RebuildReason::Resized => "resized",
        };
        f.write_str(name)
    }
}

/// Result of one drive cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The cycle reached presentation.
    Presented {
        slot: usize,
        image_index: u32,
        rebuild: Option<RebuildReason>,
    },
    /// Acquisition failed; nothing was submitted.
    Abandoned { reason: RebuildReason },
}

impl FrameOutcome {
    pub fn rebuild_reason(&self) -> Option<RebuildReason> {
        match *self {
            FrameOutcome::Presented { rebuild, .. } => rebuild,
            FrameOutcome::Abandoned { reason } => Some(reason),
        }
    }

    pub fn is_presented(&self) -> bool {
        matches!(self, FrameOutcome::Presented { .. })
    }
}

/// Runs drive cycles and owns the frame counter.
#[derive(Debug)]
pub struct FrameDriver {
    frames_in_flight: usize,
    frame_counter: usize,
    frames_submitted: u64,
    frames_presented: u64,
    state: FrameState,
}

impl FrameDriver {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            frame_counter: 0,
            frames_submitted: 0,
            frames_presented: 0,
            state: FrameState::Idle,
        }
    }

    /// Index of the slot the next cycle will use.
    #[inline]
    pub fn frame_counter(&self) -> usize {
        self.frame_counter
    }

    /// Cycles that reached submission.
    #[inline]
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Cycles whose present call succeeded.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    fn transition(&mut self, next: FrameState) {
        trace!("Frame {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs one cycle.
    ///
    /// `resize_requested` forces a rebuild after presentation even when the
    /// device reports nothing.
    ///
    /// # Errors
    ///
    /// Any failure other than an out-of-date or suboptimal surface is fatal
    /// and returned as is. The driver is left idle.
    pub fn drive<D, C>(
        &mut self,
        device: &D,
        surface: &SurfaceSet<D>,
        sync: &mut FrameSyncTable<D>,
        chain: &mut C,
        resize_requested: bool,
    ) -> RhiResult<FrameOutcome>
    where
        D: GpuDevice,
        C: ChainResources<D>,
    {
        let result = self.run_cycle(device, surface, sync, chain, resize_requested);
        self.transition(FrameState::Idle);
        result
    }

    fn run_cycle<D, C>(
        &mut self,
        device: &D,
        surface: &SurfaceSet<D>,
        sync: &mut FrameSyncTable<D>,
        chain: &mut C,
        resize_requested: bool,
    ) -> RhiResult<FrameOutcome>
    where
        D: GpuDevice,
        C: ChainResources<D>,
    {
        let active = self.frame_counter;
        let (image_acquired, render_complete) = {
            let slot = active_slot(sync, active)?;
            (slot.image_acquired().handle(), slot.render_complete().handle())
        };

        // 1. The slot's previous submission must have retired
        self.transition(FrameState::Acquiring);
        active_slot(sync, active)?.fence().wait(u64::MAX)?;

        // 2. Acquire
        let (image_index, acquire_suboptimal) = match surface.acquire_next_image(image_acquired) {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Surface out of date during acquire (slot {})", active);
                return Ok(FrameOutcome::Abandoned {
                    reason: RebuildReason::OutOfDate,
                });
            }
            Err(e) => return Err(e.into()),
        };
        trace!(
            "Slot {} acquired image {}{}",
            active,
            image_index,
            if acquire_suboptimal { " (suboptimal)" } else { "" }
        );

        // 3. Another slot may still be rendering to this image
        self.transition(FrameState::WaitingForImage);
        if let Some(owner) = sync.image_owner(image_index)
            && owner != active
        {
            trace!("Image {} still owned by slot {}, waiting", image_index, owner);
            active_slot(sync, owner)?.fence().wait(u64::MAX)?;
        }

        // 4. Claim
        sync.claim_image(image_index, active)?;

        // 5. Per-image data
        chain.prepare_image(image_index)?;

        // 6. Submit
        let command_buffer = chain.command_buffer(image_index)?;
        let fence = active_slot(sync, active)?.fence();
        fence.reset()?;
        device.submit_graphics(&FrameSubmission {
            command_buffer,
            wait_semaphore: image_acquired,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: render_complete,
            fence: fence.handle(),
        })?;
        self.frames_submitted += 1;
        self.transition(FrameState::Submitted);

        // 7. Present
        self.transition(FrameState::Presenting);
        let present_reason = match surface.present(image_index, render_complete) {
            Ok(false) => {
                self.frames_presented += 1;
                None
            }
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => {
                self.frames_presented += 1;
                Some(RebuildReason::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Surface out of date during present (image {})", image_index);
                Some(RebuildReason::OutOfDate)
            }
            Err(e) => return Err(e.into()),
        };

        let rebuild = present_reason
            .or(acquire_suboptimal.then_some(RebuildReason::Suboptimal))
            .or(resize_requested.then_some(RebuildReason::Resized));

        // 8. Advance. The submission happened, so the slot is spent even if
        // the image never reached the screen.
        self.frame_counter = (self.frame_counter + 1) % self.frames_in_flight;

        Ok(FrameOutcome::Presented {
            slot: active,
            image_index,
            rebuild,
        })
    }
}

fn active_slot<D: GpuDevice>(
    sync: &FrameSyncTable<D>,
    index: usize,
) -> RhiResult<&swapframe_rhi::sync::InFlightSlot<D>> {
    sync.slot(index).ok_or_else(|| {
        RhiError::InvalidHandle(format!(
            "Slot {} out of range ({} slots)",
            index,
            sync.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessChain;
    use std::sync::Arc;
    use swapframe_rhi::headless::HeadlessDevice;
    use swapframe_rhi::swapchain::SurfacePreferences;

    fn setup(
        frames_in_flight: usize,
    ) -> (
        Arc<HeadlessDevice>,
        SurfaceSet<HeadlessDevice>,
        FrameSyncTable<HeadlessDevice>,
        HeadlessChain,
    ) {
        let device = HeadlessDevice::new();
        let extent = device.surface_extent();
        let surface =
            SurfaceSet::build(device.clone(), &SurfacePreferences::default(), extent).unwrap();
        let sync =
            FrameSyncTable::new(device.clone(), frames_in_flight, surface.image_count()).unwrap();
        let mut chain = HeadlessChain::new(device.clone());
        chain.rebuild(&device, &surface).unwrap();
        chain.record(&surface).unwrap();
        (device, surface, sync, chain)
    }

    #[test]
    fn test_driver_starts_idle() {
        let driver = FrameDriver::new(2);
        assert_eq!(driver.state(), FrameState::Idle);
        assert_eq!(driver.frame_counter(), 0);
        assert_eq!(driver.frames_presented(), 0);
    }

    #[test]
    fn test_cycle_presents_and_advances() {
        let (device, surface, mut sync, mut chain) = setup(2);
        let mut driver = FrameDriver::new(2);

        let outcome = driver
            .drive(device.as_ref(), &surface, &mut sync, &mut chain, false)
            .unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0,
                rebuild: None
            }
        );
        assert_eq!(driver.frame_counter(), 1);
        assert_eq!(driver.state(), FrameState::Idle);
        assert_eq!(sync.image_owner(0), Some(0));
        assert_eq!(chain.prepared(), 1);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_out_of_date_acquire_leaves_slot_untouched() {
        let (device, surface, mut sync, mut chain) = setup(2);
        let mut driver = FrameDriver::new(2);
        device.inject_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);

        let outcome = driver
            .drive(device.as_ref(), &surface, &mut sync, &mut chain, false)
            .unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Abandoned {
                reason: RebuildReason::OutOfDate
            }
        );
        assert_eq!(driver.frame_counter(), 0);
        assert!(sync.slot(0).unwrap().fence().is_signaled());
        assert_eq!(device.stats().submissions, 0);
    }

    #[test]
    fn test_resize_flag_requests_rebuild() {
        let (device, surface, mut sync, mut chain) = setup(2);
        let mut driver = FrameDriver::new(2);

        let outcome = driver
            .drive(device.as_ref(), &surface, &mut sync, &mut chain, true)
            .unwrap();
        assert_eq!(outcome.rebuild_reason(), Some(RebuildReason::Resized));
        assert!(outcome.is_presented());
    }

    #[test]
    fn test_device_reports_win_over_resize_flag() {
        let (device, surface, mut sync, mut chain) = setup(2);
        let mut driver = FrameDriver::new(2);
        device.inject_acquire_result(vk::Result::SUBOPTIMAL_KHR);

        let outcome = driver
            .drive(device.as_ref(), &surface, &mut sync, &mut chain, true)
            .unwrap();
        assert_eq!(outcome.rebuild_reason(), Some(RebuildReason::Suboptimal));
    }

    #[test]
    fn test_fatal_acquire_error_propagates() {
        let (device, surface, mut sync, mut chain) = setup(2);
        let mut driver = FrameDriver::new(2);
        device.inject_acquire_result(vk::Result::ERROR_DEVICE_LOST);

        let result = driver.drive(device.as_ref(), &surface, &mut sync, &mut chain, false);
        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(driver.state(), FrameState::Idle);
    }

    #[test]
    fn test_rebuild_reason_display() {
        assert_eq!(RebuildReason::OutOfDate.to_string(), "out of date");
        assert_eq!(RebuildReason::Resized.to_string(), "resized");
    }
}
