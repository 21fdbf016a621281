//! Resources derived from the presentable surface.

use std::sync::Arc;

use ash::vk;

use swapframe_rhi::RhiResult;
use swapframe_rhi::device::GpuDevice;
use swapframe_rhi::swapchain::SurfaceSet;

/// Everything sized or shaped by the current surface set: framebuffers,
/// pipelines, render passes, per-image uniform buffers, descriptor pools and
/// the recorded per-image command buffers.
///
/// Long-lived objects such as vertex buffers and descriptor set layouts stay
/// with the implementor and are not touched by the release calls.
///
/// The lifecycle coordinator calls, in order:
///
/// ```text
/// release_attachments -> (surface teardown) -> release_per_image
/// (surface build) -> rebuild -> record
/// ```
pub trait ChainResources<D: GpuDevice> {
    /// Drops framebuffers, pipeline, pipeline layout and render pass.
    fn release_attachments(&mut self);

    /// Drops per-image uniform buffers, descriptor pools and command buffers.
    fn release_per_image(&mut self);

    /// Recreates everything released above for `surface`.
    fn rebuild(&mut self, device: &Arc<D>, surface: &SurfaceSet<D>) -> RhiResult<()>;

    /// Records one command buffer per surface image.
    fn record(&mut self, surface: &SurfaceSet<D>) -> RhiResult<()>;

    /// The command buffer recorded for `image_index`.
    fn command_buffer(&self, image_index: u32) -> RhiResult<vk::CommandBuffer>;

    /// Called once the driver owns `image_index`, before submission.
    fn prepare_image(&mut self, _image_index: u32) -> RhiResult<()> {
        Ok(())
    }
}
