//! The presentable surface set.
//!
//! [`SurfaceSet`] owns the swapchain, its images and one view per image. It
//! is built from the surface capabilities and a [`SurfacePreferences`]
//! order, and torn down (views first, then the chain which owns the image
//! memory) before every rebuild.
//!
//! Negotiation is split into pure functions so the selection rules can be
//! tested without a device:
//! - format: first preferred pair the platform offers, else its first format
//! - present mode: first preferred mode offered, else FIFO
//! - extent: the platform's fixed extent, else the request clamped to limits
//! - image count: one above the minimum, capped by the maximum when bounded

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::{GpuDevice, SwapchainDesc};
use crate::error::{RhiError, RhiResult};

/// Swapchain surface support details.
///
/// Each list is queried and sized on its own; nothing assumes the format and
/// present-mode counts relate to each other.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Ordered preferences for surface negotiation. Earlier entries win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfacePreferences {
    /// Preferred (format, color space) pairs.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Preferred present modes. FIFO is implied as the last resort.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl Default for SurfacePreferences {
    fn default() -> Self {
        Self {
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::MAILBOX],
        }
    }
}

impl SurfacePreferences {
    /// Replaces the present mode order.
    pub fn with_present_modes(mut self, present_modes: Vec<vk::PresentModeKHR>) -> Self {
        self.present_modes = present_modes;
        self
    }
}

/// Pixel format, color space and extent chosen for one build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceFormat {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
}

/// A swapchain image and the view created for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentableImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// Picks the swapchain parameters for a surface.
///
/// # Errors
///
/// Returns `RhiError::SwapchainError` if the platform offers no formats or no
/// present modes.
pub fn negotiate(
    support: &SwapchainSupportDetails,
    preferences: &SurfacePreferences,
    requested_extent: vk::Extent2D,
) -> RhiResult<SwapchainDesc> {
    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(format!(
            "Inadequate swapchain support ({} formats, {} present modes)",
            support.formats.len(),
            support.present_modes.len()
        )));
    }

    let surface_format = choose_surface_format(&support.formats, &preferences.formats)
        .ok_or_else(|| RhiError::SwapchainError("No surface formats".to_string()))?;

    Ok(SwapchainDesc {
        surface_format,
        present_mode: choose_present_mode(&support.present_modes, &preferences.present_modes),
        extent: choose_extent(
            &support.capabilities,
            requested_extent.width,
            requested_extent.height,
        ),
        min_image_count: determine_image_count(&support.capabilities),
        pre_transform: support.capabilities.current_transform,
    })
}

/// Swapchain, images and views as one scoped unit.
///
/// Teardown destroys the views and then the swapchain. It is idempotent and
/// also runs on drop, so a set that failed halfway through [`build`] is
/// unwound by the same path.
///
/// [`build`]: SurfaceSet::build
pub struct SurfaceSet<D: GpuDevice> {
    device: Arc<D>,
    swapchain: vk::SwapchainKHR,
    images: Vec<PresentableImage>,
    format: SurfaceFormat,
    present_mode: vk::PresentModeKHR,
}

impl<D: GpuDevice> SurfaceSet<D> {
    /// Queries the surface and builds a set for `requested_extent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query, negotiation or any creation call fails.
    pub fn build(
        device: Arc<D>,
        preferences: &SurfacePreferences,
        requested_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let support = device.surface_support()?;
        Self::build_with_support(device, &support, preferences, requested_extent)
    }

    /// Builds a set from already queried capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if negotiation or any creation call fails. Objects
    /// created before the failure are released.
    pub fn build_with_support(
        device: Arc<D>,
        support: &SwapchainSupportDetails,
        preferences: &SurfacePreferences,
        requested_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let desc = negotiate(support, preferences, requested_extent)?;

        let swapchain = device.create_swapchain(&desc)?;
        let mut set = Self {
            device,
            swapchain,
            images: Vec::new(),
            format: SurfaceFormat {
                format: desc.surface_format.format,
                color_space: desc.surface_format.color_space,
                extent: desc.extent,
            },
            present_mode: desc.present_mode,
        };

        let images = set.device.swapchain_images(swapchain)?;
        set.images.reserve(images.len());
        for (i, image) in images.into_iter().enumerate() {
            let view = set
                .device
                .create_image_view(image, desc.surface_format.format)
                .map_err(|e| {
                    RhiError::SwapchainError(format!("Failed to create image view {}: {}", i, e))
                })?;
            set.images.push(PresentableImage { image, view });
        }

        info!(
            "Surface set built: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            desc.extent.width,
            desc.extent.height,
            desc.surface_format.format,
            desc.surface_format.color_space,
            desc.present_mode,
            set.images.len()
        );

        Ok(set)
    }

    /// Destroys the views, then the swapchain. Safe to call more than once.
    ///
    /// The caller must ensure the device no longer uses any of the images.
    pub fn teardown(&mut self) {
        for image in self.images.drain(..).rev() {
            self.device.destroy_image_view(image.view);
        }

        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
            debug!(
                "Surface set torn down (was {}x{})",
                self.format.extent.width, self.format.extent.height
            );
        }
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Returns `(image_index, suboptimal)`. `ERROR_OUT_OF_DATE_KHR` means the
    /// set must be rebuilt before any image can be acquired.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        self.device.acquire_next_image(self.swapchain, semaphore)
    }

    /// Presents `image_index` once `wait_semaphore` is signaled.
    ///
    /// Returns true if the set is suboptimal for the surface.
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> Result<bool, vk::Result> {
        self.device
            .present(self.swapchain, image_index, wait_semaphore)
    }

    /// Returns the swapchain handle, null after teardown.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns true until [`teardown`](Self::teardown) runs.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }

    #[inline]
    pub fn surface_format(&self) -> SurfaceFormat {
        self.format
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.format.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of images in the chain. Independent of the in-flight count.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn images(&self) -> &[PresentableImage] {
        &self.images
    }

    #[inline]
    pub fn image(&self, index: usize) -> Option<&PresentableImage> {
        self.images.get(index)
    }
}

impl<D: GpuDevice> Drop for SurfaceSet<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Chooses the first preferred format the platform offers.
///
/// Falls back to the platform's first format. Returns `None` only when the
/// platform offers nothing.
fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    let chosen = preferred.iter().find(|p| {
        available
            .iter()
            .any(|f| f.format == p.format && f.color_space == p.color_space)
    });

    if let Some(&format) = chosen {
        debug!(
            "Selected preferred surface format: {:?} with {:?}",
            format.format, format.color_space
        );
        return Some(format);
    }

    let first = available.first().copied()?;
    warn!(
        "Using first available surface format: {:?} with {:?}",
        first.format, first.color_space
    );
    Some(first)
}

/// Chooses the first preferred present mode offered, else FIFO.
///
/// FIFO is always supported by a conforming platform.
fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if let Some(&mode) = preferred.iter().find(|m| available.contains(m)) {
        debug!("Selected present mode {:?}", mode);
        return mode;
    }

    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent.
///
/// If the current extent is not set (width is u32::MAX), clamps the requested
/// size to the surface's min/max extents.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// One more than the minimum, respecting the maximum if it is bounded.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    // 0 means no maximum
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}
