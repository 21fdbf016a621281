//! The frame-iteration entry point for the application loop.
//!
//! # Example
//!
//! ```no_run
//! use swapframe_core::FrameConfig;
//! use swapframe_renderer::headless::HeadlessChain;
//! use swapframe_renderer::presenter::Presenter;
//! use swapframe_rhi::headless::HeadlessDevice;
//! use swapframe_platform::DrawableSurface;
//!
//! # fn example(window: &mut dyn DrawableSurface) -> Result<(), swapframe_rhi::RhiError> {
//! let device = HeadlessDevice::new();
//! let chain = HeadlessChain::new(device.clone());
//! let extent = device.surface_extent();
//! let mut presenter = Presenter::new(device, &FrameConfig::default(), extent, chain)?;
//!
//! for _ in 0..3 {
//!     presenter.drive_one_frame(&mut *window, false)?;
//! }
//! presenter.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{error, info};

use swapframe_core::{FrameConfig, PresentModePreference};
use swapframe_platform::DrawableSurface;
use swapframe_rhi::device::GpuDevice;
use swapframe_rhi::swapchain::{SurfacePreferences, SurfaceSet};
use swapframe_rhi::{RhiError, RhiResult};

use crate::chain::ChainResources;
use crate::frame_driver::{FrameDriver, FrameOutcome};
use crate::frame_sync::FrameSyncTable;
use crate::lifecycle::LifecycleCoordinator;

/// Present modes to try for a configured preference. FIFO remains the
/// fallback when none are offered.
pub fn surface_preferences(preference: PresentModePreference) -> SurfacePreferences {
    let present_modes = match preference {
        PresentModePreference::LowLatency => vec![vk::PresentModeKHR::MAILBOX],
        PresentModePreference::Vsync => vec![vk::PresentModeKHR::FIFO],
        PresentModePreference::Immediate => vec![vk::PresentModeKHR::IMMEDIATE],
    };
    SurfacePreferences::default().with_present_modes(present_modes)
}

/// Owns the surface set, the slot ring, the chain resources and the driver.
///
/// Fields drop in declaration order: chain resources, surface set, slots.
/// Framebuffers go before the views they reference.
pub struct Presenter<D: GpuDevice, C: ChainResources<D>> {
    chain: C,
    surface: SurfaceSet<D>,
    sync: FrameSyncTable<D>,
    driver: FrameDriver,
    lifecycle: LifecycleCoordinator,
    device: Arc<D>,
}

impl<D: GpuDevice, C: ChainResources<D>> Presenter<D, C> {
    /// Builds the surface set for `extent`, the chain resources and the
    /// slot ring.
    ///
    /// # Errors
    ///
    /// Returns `RhiError::InvalidConfig` if `config` is invalid, or the
    /// first creation error.
    pub fn new(
        device: Arc<D>,
        config: &FrameConfig,
        extent: vk::Extent2D,
        mut chain: C,
    ) -> RhiResult<Self> {
        config
            .validate()
            .map_err(|e| RhiError::InvalidConfig(e.to_string()))?;

        let preferences = surface_preferences(config.present_mode);
        let surface = SurfaceSet::build(device.clone(), &preferences, extent)?;
        chain.rebuild(&device, &surface)?;
        let sync = FrameSyncTable::new(device.clone(), config.frames_in_flight, surface.image_count())?;
        chain.record(&surface)?;

        info!(
            "Presenter ready: {} frame(s) in flight, {} images, {:?}",
            config.frames_in_flight,
            surface.image_count(),
            surface.present_mode()
        );

        Ok(Self {
            chain,
            surface,
            sync,
            driver: FrameDriver::new(config.frames_in_flight),
            lifecycle: LifecycleCoordinator::new(preferences),
            device,
        })
    }

    /// Runs one drive cycle and rebuilds the surface if the cycle asks for
    /// it.
    ///
    /// A rebuild may block on `window` while it is minimized.
    ///
    /// # Errors
    ///
    /// Returns any fatal error from the cycle or the rebuild.
    pub fn drive_one_frame<W: DrawableSurface + ?Sized>(
        &mut self,
        window: &mut W,
        resize_requested: bool,
    ) -> RhiResult<FrameOutcome> {
        let outcome = self.driver.drive(
            self.device.as_ref(),
            &self.surface,
            &mut self.sync,
            &mut self.chain,
            resize_requested,
        )?;

        if let Some(reason) = outcome.rebuild_reason() {
            self.lifecycle.recreate(
                &self.device,
                window,
                &mut self.surface,
                &mut self.sync,
                &mut self.chain,
                reason,
            )?;
        }

        Ok(outcome)
    }

    /// Waits for the device, then releases the chain's attachments, the
    /// surface set, the per-image resources and finally the slot ring.
    ///
    /// # Errors
    ///
    /// Returns an error if the idle wait fails. Nothing is released then.
    pub fn shutdown(mut self) -> RhiResult<()> {
        self.device.wait_idle()?;

        self.chain.release_attachments();
        self.surface.teardown();
        self.chain.release_per_image();
        self.sync.teardown();

        info!(
            "Presenter shut down after {} frame(s), {} rebuild(s)",
            self.driver.frames_presented(),
            self.lifecycle.rebuild_count()
        );
        Ok(())
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[inline]
    pub fn surface(&self) -> &SurfaceSet<D> {
        &self.surface
    }

    #[inline]
    pub fn sync(&self) -> &FrameSyncTable<D> {
        &self.sync
    }

    #[inline]
    pub fn driver(&self) -> &FrameDriver {
        &self.driver
    }

    #[inline]
    pub fn chain(&self) -> &C {
        &self.chain
    }

    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.lifecycle.rebuild_count()
    }
}

impl<D: GpuDevice, C: ChainResources<D>> Drop for Presenter<D, C> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_preferences_follow_config() {
        assert_eq!(
            surface_preferences(PresentModePreference::LowLatency).present_modes,
            vec![vk::PresentModeKHR::MAILBOX]
        );
        assert_eq!(
            surface_preferences(PresentModePreference::Vsync).present_modes,
            vec![vk::PresentModeKHR::FIFO]
        );
        assert_eq!(
            surface_preferences(PresentModePreference::Immediate).present_modes,
            vec![vk::PresentModeKHR::IMMEDIATE]
        );
    }

    #[test]
    fn test_surface_preferences_keep_default_formats() {
        let preferences = surface_preferences(PresentModePreference::Vsync);
        assert_eq!(
            preferences.formats,
            SurfacePreferences::default().formats
        );
    }
}
