//! The device context threaded through the frame engine.
//!
//! [`GpuDevice`] bundles a logical device with its graphics and presentation
//! queues and the platform surface it presents to. The frame engine never
//! touches globals: every component receives the context explicitly, either
//! as `&D` for the duration of a call or as `Arc<D>` when it owns objects
//! that must be released against the device later.
//!
//! Two implementations exist:
//! - [`VulkanDevice`](crate::vulkan::VulkanDevice) drives a real GPU via ash
//! - [`HeadlessDevice`](crate::headless::HeadlessDevice) simulates the device
//!   on the host and validates the synchronization rules the engine relies on

use ash::vk;

use crate::error::RhiResult;
use crate::swapchain::SwapchainSupportDetails;

/// Parameters for creating a swapchain, produced by surface negotiation.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    /// Pixel format and color space of the chain images.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Presentation mode.
    pub present_mode: vk::PresentModeKHR,
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Minimum number of images to request.
    pub min_image_count: u32,
    /// Surface transform to apply.
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// A single graphics-queue submission for one frame.
///
/// The submission waits on `wait_semaphore` at `wait_stage`, executes
/// `command_buffer`, then signals `signal_semaphore` and `fence`.
#[derive(Clone, Copy, Debug)]
pub struct FrameSubmission {
    /// Recorded commands to execute.
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore the submission waits on before `wait_stage`.
    pub wait_semaphore: vk::Semaphore,
    /// Pipeline stage gated by `wait_semaphore`.
    pub wait_stage: vk::PipelineStageFlags,
    /// Semaphore signaled when execution completes.
    pub signal_semaphore: vk::Semaphore,
    /// Fence signaled when execution completes.
    pub fence: vk::Fence,
}

/// Device, queues and surface as one explicitly passed context.
///
/// Acquire and present return the raw [`vk::Result`] on failure so callers
/// can tell recoverable surface mismatches (`ERROR_OUT_OF_DATE_KHR`,
/// `SUBOPTIMAL_KHR`) apart from fatal errors. Everything else maps into
/// [`RhiError`](crate::RhiError).
pub trait GpuDevice: Send + Sync {
    /// Creates a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    /// Destroys a fence. The fence must not be in use by a pending submission.
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until all `fences` are signaled or `timeout` nanoseconds pass.
    ///
    /// A timeout is reported as `RhiError::VulkanError(vk::Result::TIMEOUT)`.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()>;

    /// Returns fences to the unsignaled state.
    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()>;

    /// Non-blocking fence status query.
    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool>;

    /// Creates a binary semaphore in the unsignaled state.
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Queries formats, present modes and capabilities of the surface.
    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails>;

    /// Creates a swapchain for the device's surface.
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR>;

    /// Returns the images owned by a swapchain.
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    /// Destroys a swapchain and the images it owns.
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Creates a 2D color view of a swapchain image.
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> RhiResult<vk::ImageView>;

    /// Destroys an image view.
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Acquires the next presentable image, signaling `semaphore` when it is
    /// ready. Returns `(image_index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Submits one frame's work to the graphics queue.
    fn submit_graphics(&self, submission: &FrameSubmission) -> RhiResult<()>;

    /// Queues `image_index` for presentation on the present queue after
    /// `wait_semaphore` is signaled. Returns `true` when suboptimal.
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result>;

    /// Blocks until every queue of the device is idle.
    fn wait_idle(&self) -> RhiResult<()>;
}
