//! Vulkan-backed device context.
//!
//! [`VulkanDevice`] owns the instance, the window surface, the logical device
//! with its graphics and present queues, the swapchain loader and the memory
//! allocator. Dropping it waits for the device to go idle and releases those
//! in reverse order of creation.

mod instance;
mod physical_device;
mod surface;

pub use instance::Instance;
pub use physical_device::{
    DEVICE_EXTENSIONS, PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device,
};
pub use surface::Surface;

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info};

use crate::device::{FrameSubmission, GpuDevice, SwapchainDesc};
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Logical device, queues, surface and allocator as one context.
///
/// # Thread Safety
///
/// Shared through `Arc`. The allocator is behind a mutex; queue access is
/// only ever made from the render loop thread.
pub struct VulkanDevice {
    device: ash::Device,
    physical_device: PhysicalDeviceInfo,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    swapchain_loader: ash::khr::swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    // Field order matters: the surface must drop before the instance.
    surface: Surface,
    instance: Instance,
}

impl VulkanDevice {
    /// Brings up Vulkan for a native window.
    ///
    /// # Safety
    ///
    /// `display` and `window` must refer to a live window that outlives the
    /// returned device.
    ///
    /// # Errors
    ///
    /// Returns an error if any step of instance, surface, device or allocator
    /// creation fails, or no GPU can present to the window.
    pub unsafe fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        enable_validation: bool,
    ) -> RhiResult<Arc<Self>> {
        let instance = Instance::new(display, enable_validation)?;
        let surface = unsafe { Surface::new(&instance, display, window)? };

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let queue_families = physical_device.queue_families;
        let (graphics_family, present_family) = queue_families
            .pair()
            .ok_or(RhiError::NoSuitableGpu)?;

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device.device, &create_info, None)?
        };
        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        info!("GPU memory allocator initialized");

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Ok(Arc::new(Self {
            device,
            physical_device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            swapchain_loader,
            graphics_queue,
            present_queue,
            queue_families,
            surface,
            instance,
        }))
    }

    /// Returns the ash device, for wrappers that issue their own calls.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.instance.has_validation()
    }
}

impl GpuDevice for VulkanDevice {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()> {
        unsafe { self.device.wait_for_fences(fences, true, timeout)? };
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()> {
        unsafe { self.device.reset_fences(fences)? };
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(
            self.physical_device.device,
            self.surface.handle(),
            self.surface.loader(),
        )
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR> {
        let (graphics_family, present_family) = self
            .queue_families
            .pair()
            .ok_or_else(|| RhiError::SwapchainError("Queue families incomplete".to_string()))?;
        let queue_family_indices = [graphics_family, present_family];

        // Images are used by both queues when the families differ
        let (sharing_mode, indices) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, &queue_family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(indices)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true);

        Ok(unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? })
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> RhiResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        Ok(unsafe { self.device.create_image_view(&create_info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    fn submit_graphics(&self, submission: &FrameSubmission) -> RhiResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], submission.fence)?
        };
        Ok(())
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device and the loaders are plain function tables; queue and
// physical device handles are Copy; the allocator is behind a Mutex.
unsafe impl Send for VulkanDevice {}
unsafe impl Sync for VulkanDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }
}
