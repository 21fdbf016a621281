//! Command pools and command buffer recording.
//!
//! The presenter submits one pre-recorded command buffer per chain image.
//! Those buffers are allocated from a long-lived [`CommandPool`], freed when
//! the surface set is rebuilt and re-recorded against the new framebuffers.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::vulkan::VulkanDevice;

/// Vulkan command pool wrapper.
///
/// Created with `RESET_COMMAND_BUFFER` so individual buffers can be
/// re-recorded without resetting the whole pool.
pub struct CommandPool {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a pool for `queue_family_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<VulkanDevice>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        info!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        debug!("Allocated {} command buffer(s)", buffers.len());
        Ok(buffers)
    }

    /// Returns command buffers to the pool. None of them may be pending.
    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, buffers);
        }
        debug!("Freed {} command buffer(s)", buffers.len());
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Records into a command buffer it does not own.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use swapframe_rhi::command::CommandRecorder;
/// use swapframe_rhi::vulkan::VulkanDevice;
/// use swapframe_rhi::vk;
///
/// # fn example(device: Arc<VulkanDevice>, cmd: vk::CommandBuffer) -> Result<(), swapframe_rhi::RhiError> {
/// let recorder = CommandRecorder::new(&device, cmd);
/// recorder.begin_reusable()?;
/// // ... render pass, pipeline, draw ...
/// recorder.end()?;
/// # Ok(())
/// # }
/// ```
pub struct CommandRecorder<'a> {
    device: &'a VulkanDevice,
    buffer: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    #[inline]
    pub fn new(device: &'a VulkanDevice, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording a buffer that will be submitted many times.
    pub fn begin_reusable(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.handle().cmd_end_render_pass(self.buffer);
        }
    }

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
        }
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device.handle().cmd_bind_vertex_buffers(
                self.buffer,
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.handle().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }
}

/// Looks up the command buffer recorded for `image_index`.
pub fn per_image_buffer(
    buffers: &[vk::CommandBuffer],
    image_index: u32,
) -> RhiResult<vk::CommandBuffer> {
    buffers.get(image_index as usize).copied().ok_or_else(|| {
        RhiError::InvalidHandle(format!(
            "No command buffer recorded for image {} ({} recorded)",
            image_index,
            buffers.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_per_image_buffer_lookup() {
        let buffers = [
            vk::CommandBuffer::from_raw(10),
            vk::CommandBuffer::from_raw(11),
        ];
        assert_eq!(per_image_buffer(&buffers, 1).unwrap(), buffers[1]);
        assert!(matches!(
            per_image_buffer(&buffers, 2),
            Err(RhiError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_command_pool_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CommandPool>();
    }
}
