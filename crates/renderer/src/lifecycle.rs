//! Ordered teardown and rebuild of everything sized by the surface.
//!
//! The in-flight slots, vertex data and descriptor set layouts are never
//! touched here. Only the surface set and the chain's derived resources are
//! recreated.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use swapframe_platform::DrawableSurface;
use swapframe_rhi::RhiResult;
use swapframe_rhi::device::GpuDevice;
use swapframe_rhi::swapchain::{SurfacePreferences, SurfaceSet};

use crate::chain::ChainResources;
use crate::frame_driver::RebuildReason;
use crate::frame_sync::FrameSyncTable;

/// What [`LifecycleCoordinator::recreate`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateOutcome {
    Rebuilt,
    /// The window closed while minimized. Nothing was torn down.
    Cancelled,
}

#[derive(Debug)]
pub struct LifecycleCoordinator {
    preferences: SurfacePreferences,
    rebuilds: u64,
}

impl LifecycleCoordinator {
    pub fn new(preferences: SurfacePreferences) -> Self {
        Self {
            preferences,
            rebuilds: 0,
        }
    }

    /// Completed rebuilds.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Rebuilds the surface set and the chain's derived resources.
    ///
    /// Blocks on `window` while its drawable size is zero. Teardown runs
    /// attachments, surface set, then per-image resources. The rebuild runs
    /// surface set, chain resources, ownership map, then command recording.
    ///
    /// # Errors
    ///
    /// Every failure is fatal: the surface set may be left torn down.
    #[allow(clippy::too_many_arguments)]
    pub fn recreate<D, C, W>(
        &mut self,
        device: &Arc<D>,
        window: &mut W,
        surface: &mut SurfaceSet<D>,
        sync: &mut FrameSyncTable<D>,
        chain: &mut C,
        reason: RebuildReason,
    ) -> RhiResult<RecreateOutcome>
    where
        D: GpuDevice,
        C: ChainResources<D>,
        W: DrawableSurface + ?Sized,
    {
        let Some(extent) = wait_for_drawable(window) else {
            info!("Window closed while waiting for a drawable size, skipping rebuild");
            return Ok(RecreateOutcome::Cancelled);
        };

        device.wait_idle()?;

        chain.release_attachments();
        surface.teardown();
        chain.release_per_image();

        *surface = SurfaceSet::build(device.clone(), &self.preferences, extent)?;
        chain.rebuild(device, surface)?;
        sync.resize_ownership_map(surface.image_count());
        chain.record(surface)?;

        self.rebuilds += 1;
        let built = surface.extent();
        info!(
            "Surface rebuilt ({}): {}x{}, {} images, rebuild #{}",
            reason,
            built.width,
            built.height,
            surface.image_count(),
            self.rebuilds
        );

        Ok(RecreateOutcome::Rebuilt)
    }
}

/// Waits until the drawable size is non-zero. `None` if the window closed
/// first.
fn wait_for_drawable<W: DrawableSurface + ?Sized>(window: &mut W) -> Option<vk::Extent2D> {
    loop {
        let (width, height) = window.drawable_size();
        if width > 0 && height > 0 {
            return Some(vk::Extent2D { width, height });
        }
        if window.close_requested() {
            return None;
        }
        debug!("Drawable size is zero, waiting for events");
        window.wait_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimized {
        sizes: Vec<(u32, u32)>,
        waits: usize,
        close_after: Option<usize>,
    }

    impl DrawableSurface for Minimized {
        fn drawable_size(&self) -> (u32, u32) {
            self.sizes
                .get(self.waits)
                .or(self.sizes.last())
                .copied()
                .unwrap_or((0, 0))
        }

        fn wait_events(&mut self) {
            self.waits += 1;
        }

        fn close_requested(&self) -> bool {
            self.close_after.is_some_and(|n| self.waits >= n)
        }
    }

    #[test]
    fn test_wait_for_drawable_returns_first_non_zero_size() {
        let mut window = Minimized {
            sizes: vec![(0, 0), (0, 600), (800, 600)],
            waits: 0,
            close_after: None,
        };
        let extent = wait_for_drawable(&mut window).unwrap();
        assert_eq!((extent.width, extent.height), (800, 600));
        assert_eq!(window.waits, 2);
    }

    #[test]
    fn test_wait_for_drawable_gives_up_on_close() {
        let mut window = Minimized {
            sizes: vec![(0, 0)],
            waits: 0,
            close_after: Some(3),
        };
        assert!(wait_for_drawable(&mut window).is_none());
        assert_eq!(window.waits, 3);
    }

    #[test]
    fn test_visible_window_does_not_wait() {
        let mut window = Minimized {
            sizes: vec![(1, 1)],
            waits: 0,
            close_after: None,
        };
        assert!(wait_for_drawable(&mut window).is_some());
        assert_eq!(window.waits, 0);
    }
}
