//! Physical device (GPU) selection.
//!
//! A device qualifies when it has a graphics queue family, a family that can
//! present to the surface, the swapchain extension, and at least one surface
//! format and present mode. Qualifying devices are ranked discrete first,
//! then integrated, then everything else.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions the presenter needs.
pub const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices for graphics and presentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }

    /// Both indices, or `None` when either is missing.
    pub fn pair(&self) -> Option<(u32, u32)> {
        Some((self.graphics_family?, self.present_family?))
    }
}

/// A physical device that can drive the presenter.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the highest ranked qualifying device.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .max_by_key(|info| rate_device_type(info.properties.device_type));

    match selected {
        Some(info) => {
            info!(
                "Selected GPU: '{}' ({}), graphics family {:?}, present family {:?}",
                info.device_name(),
                info.device_type_name(),
                info.queue_families.graphics_family,
                info.queue_families.present_family
            );
            Ok(info)
        }
        None => {
            warn!("No suitable GPU found with required capabilities");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let info = PhysicalDeviceInfo {
        device,
        properties,
        queue_families: find_queue_families(instance, device, surface, surface_loader),
    };

    if !info.queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: missing graphics or present queue family",
            info.device_name()
        );
        return None;
    }

    if !supports_device_extensions(instance, device) {
        debug!("GPU '{}' skipped: swapchain extension missing", info.device_name());
        return None;
    }

    // Support queries only make sense once the extension is known to exist
    match SwapchainSupportDetails::query(device, surface, surface_loader) {
        Ok(support) if support.is_adequate() => Some(info),
        Ok(_) => {
            debug!(
                "GPU '{}' skipped: surface offers no formats or present modes",
                info.device_name()
            );
            None
        }
        Err(e) => {
            debug!("GPU '{}' skipped: surface query failed: {}", info.device_name(), e);
            None
        }
    }
}

fn supports_device_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(available) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };

    DEVICE_EXTENSIONS.iter().all(|required| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *required))
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        // A family doing both avoids concurrent image sharing
        if has_graphics && has_present {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if has_present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

/// Ranking used to pick among qualifying devices.
fn rate_device_type(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
        assert_eq!(indices.pair(), None);
    }

    #[test]
    fn test_queue_family_indices_shared_family() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert!(indices.is_complete());
        assert_eq!(indices.unique_families(), vec![0]);
        assert_eq!(indices.pair(), Some((0, 0)));
    }

    #[test]
    fn test_queue_family_indices_split_families() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_device_type_ranking() {
        assert!(
            rate_device_type(vk::PhysicalDeviceType::DISCRETE_GPU)
                > rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > rate_device_type(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn test_swapchain_extension_required() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }
}
