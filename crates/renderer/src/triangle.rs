//! Demo chain resources: one tinted triangle per chain image.
//!
//! The tint is animated through a per-image uniform buffer written in
//! [`ChainResources::prepare_image`], once the driver has made sure the GPU
//! is done with that image. Without compiled shaders the pass only clears.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};
use tracing::{debug, info};

use swapframe_core::Timer;
use swapframe_rhi::buffer::{Buffer, BufferUsage};
use swapframe_rhi::command::{CommandPool, CommandRecorder, per_image_buffer};
use swapframe_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, buffer_info, uniform_buffer_binding, uniform_pool_sizes,
    update_descriptor_sets,
};
use swapframe_rhi::pipeline::{
    GraphicsPipeline, PipelineLayout, VertexLayout, full_scissor, full_viewport,
};
use swapframe_rhi::render_pass::{Framebuffer, RenderPass};
use swapframe_rhi::shader::{Shader, ShaderStage};
use swapframe_rhi::swapchain::SurfaceSet;
use swapframe_rhi::vulkan::VulkanDevice;
use swapframe_rhi::{RhiError, RhiResult};

use crate::chain::ChainResources;

const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.03, 1.0];

/// Position and color of one triangle corner.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct TriangleVertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl TriangleVertex {
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: std::mem::size_of::<Self>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: 0,
                },
                vk::VertexInputAttributeDescription {
                    binding: 0,
                    location: 1,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: std::mem::size_of::<Vec2>() as u32,
                },
            ],
        }
    }
}

pub const TRIANGLE: [TriangleVertex; 3] = [
    TriangleVertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    TriangleVertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
    TriangleVertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
];

/// Per-image uniform data. Matches the `FrameUniforms` block in
/// `triangle.frag`.
///
/// # Memory Layout
///
/// - Offset 0: tint (16 bytes)
/// - Offset 16: time (4 bytes)
/// - Offset 20: padding (12 bytes)
/// - Total size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct FrameUniforms {
    pub tint: Vec4,
    pub time: f32,
    pub _padding: [f32; 3],
}

impl FrameUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Uniforms for `time` seconds into the run. Each channel cycles in
    /// [0, 1], a third of a period apart.
    pub fn at(time: f32) -> Self {
        let phase = std::f32::consts::TAU / 3.0;
        let channel = |offset: f32| 0.5 + 0.5 * (time + offset).sin();
        Self {
            tint: Vec4::new(channel(0.0), channel(phase), channel(2.0 * phase), 1.0),
            time,
            _padding: [0.0; 3],
        }
    }
}

/// Triangle pass over a Vulkan device.
pub struct TrianglePass {
    // Recreated with the surface. Declared first so they drop before the
    // long-lived objects they reference.
    framebuffers: Vec<Framebuffer>,
    pipeline: Option<GraphicsPipeline>,
    pipeline_layout: Option<PipelineLayout>,
    render_pass: Option<RenderPass>,
    uniform_buffers: Vec<Buffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    descriptor_pool: Option<DescriptorPool>,
    command_buffers: Vec<vk::CommandBuffer>,
    extent: vk::Extent2D,

    // Lives for the whole run.
    shaders: Option<(Shader, Shader)>,
    descriptor_set_layout: DescriptorSetLayout,
    vertex_buffer: Buffer,
    command_pool: CommandPool,
    timer: Timer,
    device: Arc<VulkanDevice>,
}

impl TrianglePass {
    /// Creates the long-lived objects. Surface-sized ones come with the
    /// first [`ChainResources::rebuild`].
    ///
    /// Shaders are read from `shader_dir/triangle.{vert,frag}.spv`. If
    /// either file is missing the pass clears without drawing.
    ///
    /// # Errors
    ///
    /// Returns an error if a creation call fails or an existing shader file
    /// is invalid.
    pub fn new(device: Arc<VulkanDevice>, shader_dir: &Path) -> RhiResult<Self> {
        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let vertex_buffer = Buffer::new_with_data(
            device.clone(),
            BufferUsage::Vertex,
            bytemuck::cast_slice(&TRIANGLE),
        )?;

        let descriptor_set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[uniform_buffer_binding(0, vk::ShaderStageFlags::FRAGMENT)],
        )?;

        let shaders = load_shaders(&device, shader_dir)?;

        Ok(Self {
            framebuffers: Vec::new(),
            pipeline: None,
            pipeline_layout: None,
            render_pass: None,
            uniform_buffers: Vec::new(),
            descriptor_sets: Vec::new(),
            descriptor_pool: None,
            command_buffers: Vec::new(),
            extent: vk::Extent2D::default(),
            shaders,
            descriptor_set_layout,
            vertex_buffer,
            command_pool,
            timer: Timer::new(),
            device,
        })
    }

    /// Whether the pass draws the triangle or only clears.
    pub fn draws_geometry(&self) -> bool {
        self.shaders.is_some()
    }

    fn create_per_image(&mut self, device: &Arc<VulkanDevice>, image_count: usize) -> RhiResult<()> {
        let set_count = image_count as u32;
        let pool = DescriptorPool::new(device.clone(), set_count, &uniform_pool_sizes(set_count))?;
        let layouts = vec![self.descriptor_set_layout.handle(); image_count];
        self.descriptor_sets = pool.allocate(&layouts)?;
        self.descriptor_pool = Some(pool);

        for &set in &self.descriptor_sets {
            let buffer = Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                FrameUniforms::SIZE as vk::DeviceSize,
            )?;
            buffer.write_data(0, bytemuck::bytes_of(&FrameUniforms::at(0.0)))?;

            let infos = [buffer_info(
                buffer.handle(),
                0,
                FrameUniforms::SIZE as vk::DeviceSize,
            )];
            let writes = [vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&infos)];
            update_descriptor_sets(device, &writes);

            self.uniform_buffers.push(buffer);
        }

        debug!("Created {} per-image uniform buffer(s)", image_count);
        Ok(())
    }
}

fn load_shaders(device: &Arc<VulkanDevice>, shader_dir: &Path) -> RhiResult<Option<(Shader, Shader)>> {
    let vert_path = shader_dir.join("triangle.vert.spv");
    let frag_path = shader_dir.join("triangle.frag.spv");
    if !vert_path.is_file() || !frag_path.is_file() {
        return Ok(None);
    }

    let vert = Shader::from_spirv_file(device.clone(), &vert_path, ShaderStage::Vertex, "main")?;
    let frag = Shader::from_spirv_file(device.clone(), &frag_path, ShaderStage::Fragment, "main")?;
    Ok(Some((vert, frag)))
}

impl ChainResources<VulkanDevice> for TrianglePass {
    fn release_attachments(&mut self) {
        self.framebuffers.clear();
        self.pipeline = None;
        self.pipeline_layout = None;
        self.render_pass = None;
    }

    fn release_per_image(&mut self) {
        self.uniform_buffers.clear();
        self.descriptor_sets.clear();
        self.descriptor_pool = None;
        self.command_pool.free_command_buffers(&self.command_buffers);
        self.command_buffers.clear();
    }

    fn rebuild(
        &mut self,
        device: &Arc<VulkanDevice>,
        surface: &SurfaceSet<VulkanDevice>,
    ) -> RhiResult<()> {
        let render_pass = RenderPass::new_color(device.clone(), surface.format())?;

        if let Some((vert, frag)) = &self.shaders {
            let layout = PipelineLayout::new(device.clone(), &[self.descriptor_set_layout.handle()])?;
            let pipeline = GraphicsPipeline::new(
                device.clone(),
                &layout,
                render_pass.handle(),
                vert,
                frag,
                &TriangleVertex::layout(),
            )?;
            self.pipeline_layout = Some(layout);
            self.pipeline = Some(pipeline);
        }

        self.extent = surface.extent();
        for image in surface.images() {
            self.framebuffers.push(Framebuffer::new(
                device.clone(),
                &render_pass,
                image.view,
                self.extent,
            )?);
        }
        self.render_pass = Some(render_pass);

        self.create_per_image(device, surface.image_count())?;

        info!(
            "Triangle pass rebuilt: {}x{}, {} framebuffer(s)",
            self.extent.width,
            self.extent.height,
            self.framebuffers.len()
        );
        Ok(())
    }

    fn record(&mut self, surface: &SurfaceSet<VulkanDevice>) -> RhiResult<()> {
        let render_pass = self
            .render_pass
            .as_ref()
            .ok_or_else(|| RhiError::InvalidHandle("Render pass not built".to_string()))?;

        self.command_buffers = self
            .command_pool
            .allocate_command_buffers(surface.image_count() as u32)?;

        for (i, &cmd) in self.command_buffers.iter().enumerate() {
            let framebuffer = self.framebuffers.get(i).ok_or_else(|| {
                RhiError::InvalidHandle(format!("No framebuffer for image {}", i))
            })?;

            let recorder = CommandRecorder::new(&self.device, cmd);
            recorder.begin_reusable()?;
            recorder.begin_render_pass(
                render_pass.handle(),
                framebuffer.handle(),
                self.extent,
                CLEAR_COLOR,
            );

            if let (Some(pipeline), Some(layout), Some(&set)) = (
                &self.pipeline,
                &self.pipeline_layout,
                self.descriptor_sets.get(i),
            ) {
                recorder.bind_pipeline(pipeline.bind_point(), pipeline.handle());
                recorder.set_viewport(full_viewport(self.extent));
                recorder.set_scissor(full_scissor(self.extent));
                recorder.bind_descriptor_sets(pipeline.bind_point(), layout.handle(), 0, &[set]);
                recorder.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
                recorder.draw(TRIANGLE.len() as u32, 1, 0, 0);
            }

            recorder.end_render_pass();
            recorder.end()?;
        }

        debug!("Recorded {} command buffer(s)", self.command_buffers.len());
        Ok(())
    }

    fn command_buffer(&self, image_index: u32) -> RhiResult<vk::CommandBuffer> {
        per_image_buffer(&self.command_buffers, image_index)
    }

    fn prepare_image(&mut self, image_index: u32) -> RhiResult<()> {
        let uniforms = FrameUniforms::at(self.timer.elapsed_secs());
        match self.uniform_buffers.get(image_index as usize) {
            Some(buffer) => buffer.write_data(0, bytemuck::bytes_of(&uniforms)),
            None => Err(RhiError::InvalidHandle(format!(
                "No uniform buffer for image {}",
                image_index
            ))),
        }
    }
}

impl Drop for TrianglePass {
    fn drop(&mut self) {
        self.release_attachments();
        self.release_per_image();
    }
}
