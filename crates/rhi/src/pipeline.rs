//! Pipeline layouts and graphics pipelines.
//!
//! Pipelines target a render pass and keep viewport and scissor dynamic, so a
//! pipeline built once survives surface rebuilds as long as the surface
//! format does not change.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};
use crate::vulkan::VulkanDevice;

/// Vulkan pipeline layout wrapper.
pub struct PipelineLayout {
    device: Arc<VulkanDevice>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout over `descriptor_set_layouts` with no push constants.
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    pub fn new(
        device: Arc<VulkanDevice>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let create_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s)",
            descriptor_set_layouts.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Vertex input description for a pipeline.
#[derive(Clone, Debug, Default)]
pub struct VertexLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Graphics pipeline drawing triangle lists into subpass 0 of a render pass.
pub struct GraphicsPipeline {
    device: Arc<VulkanDevice>,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `RhiError::PipelineError` if the shaders are bound to the wrong
    /// stages, or a Vulkan error if creation fails.
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: &PipelineLayout,
        render_pass: vk::RenderPass,
        vertex_shader: &Shader,
        fragment_shader: &Shader,
        vertex_layout: &VertexLayout,
    ) -> RhiResult<Self> {
        check_stage(vertex_shader, ShaderStage::Vertex)?;
        check_stage(fragment_shader, ShaderStage::Fragment)?;

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_layout.bindings)
            .vertex_attribute_descriptions(&vertex_layout.attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];

        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = dynamic_states();
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(0);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        }
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("No pipeline returned".to_string()))?;

        info!("Graphics pipeline created");

        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        info!("Graphics pipeline destroyed");
    }
}

fn check_stage(shader: &Shader, expected: ShaderStage) -> RhiResult<()> {
    if shader.stage() != expected {
        return Err(RhiError::PipelineError(format!(
            "Expected a {} shader, got {}",
            expected,
            shader.stage()
        )));
    }
    Ok(())
}

/// Viewport and scissor are set at record time from the chain extent.
fn dynamic_states() -> [vk::DynamicState; 2] {
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
}

/// Full-extent viewport for `extent`.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Full-extent scissor for `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_states() {
        let states = dynamic_states();
        assert!(states.contains(&vk::DynamicState::VIEWPORT));
        assert!(states.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn test_full_viewport_and_scissor() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let viewport = full_viewport(extent);
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!(viewport.max_depth, 1.0);

        let scissor = full_scissor(extent);
        assert_eq!(scissor.extent, extent);
        assert_eq!(scissor.offset.x, 0);
    }
}
