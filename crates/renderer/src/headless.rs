//! Chain resources for the headless device.
//!
//! Nothing is drawn. The chain hands out placeholder command buffers, one per
//! image, and writes a journal marker for every lifecycle call so tests and
//! the headless run mode can check the rebuild order.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use swapframe_rhi::RhiResult;
use swapframe_rhi::command::per_image_buffer;
use swapframe_rhi::headless::HeadlessDevice;
use swapframe_rhi::swapchain::SurfaceSet;

use crate::chain::ChainResources;

pub const MARK_RELEASE_ATTACHMENTS: &str = "chain:release-attachments";
pub const MARK_RELEASE_PER_IMAGE: &str = "chain:release-per-image";
pub const MARK_REBUILD: &str = "chain:rebuild";
pub const MARK_RECORD: &str = "chain:record";

pub struct HeadlessChain {
    device: Arc<HeadlessDevice>,
    command_buffers: Vec<vk::CommandBuffer>,
    extent: vk::Extent2D,
    attachments_live: bool,
    rebuilds: u64,
    prepared: u64,
}

impl HeadlessChain {
    pub fn new(device: Arc<HeadlessDevice>) -> Self {
        Self {
            device,
            command_buffers: Vec::new(),
            extent: vk::Extent2D::default(),
            attachments_live: false,
            rebuilds: 0,
            prepared: 0,
        }
    }

    /// Number of `rebuild` calls so far.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Number of images prepared for submission.
    pub fn prepared(&self) -> u64 {
        self.prepared
    }

    /// Extent of the last rebuild.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn recorded_images(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn has_attachments(&self) -> bool {
        self.attachments_live
    }
}

impl ChainResources<HeadlessDevice> for HeadlessChain {
    fn release_attachments(&mut self) {
        self.attachments_live = false;
        self.device.mark(MARK_RELEASE_ATTACHMENTS);
    }

    fn release_per_image(&mut self) {
        self.command_buffers.clear();
        self.device.mark(MARK_RELEASE_PER_IMAGE);
    }

    fn rebuild(
        &mut self,
        _device: &Arc<HeadlessDevice>,
        surface: &SurfaceSet<HeadlessDevice>,
    ) -> RhiResult<()> {
        self.extent = surface.extent();
        self.attachments_live = true;
        self.rebuilds += 1;
        self.device.mark(MARK_REBUILD);
        Ok(())
    }

    fn record(&mut self, surface: &SurfaceSet<HeadlessDevice>) -> RhiResult<()> {
        self.command_buffers = self.device.allocate_command_buffers(surface.image_count());
        self.device.mark(MARK_RECORD);
        debug!(
            "Headless chain recorded {} command buffer(s)",
            self.command_buffers.len()
        );
        Ok(())
    }

    fn command_buffer(&self, image_index: u32) -> RhiResult<vk::CommandBuffer> {
        per_image_buffer(&self.command_buffers, image_index)
    }

    fn prepare_image(&mut self, _image_index: u32) -> RhiResult<()> {
        self.prepared += 1;
        Ok(())
    }
}
