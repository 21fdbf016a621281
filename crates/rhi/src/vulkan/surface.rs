//! Platform surface ownership.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::instance::Instance;
use crate::error::{RhiError, RhiResult};

/// RAII wrapper for a Vulkan surface.
///
/// The surface is destroyed on drop. The instance it was created from must
/// outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for a native window.
    ///
    /// # Safety
    ///
    /// `display` and `window` must refer to a live window that outlives the
    /// returned surface.
    pub unsafe fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
                .map_err(|e| RhiError::SurfaceError(format!("Failed to create surface: {}", e)))?
        };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        tracing::debug!("Vulkan surface created");
        Ok(Self { handle, loader })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface extension loader, used for capability queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by ash_window from the same instance
        // the loader was built from, and is destroyed only here.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}
