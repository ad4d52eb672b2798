//! Viewer application: a textured, spinning cube.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::info;

use vulkanoid_app::{AppContext, FrameContext, VulkanoidApp};
use vulkanoid_gpu::descriptors::{DescriptorPool, DescriptorSet, DescriptorSetLayout};
use vulkanoid_gpu::{
    vk, Buffer, DescriptorSetLayoutBuilder, GraphicsPipeline, GraphicsPipelineDesc, Image,
    ImageView, Sampler, SamplerDesc, ShaderModule, VertexLayout, ViewportMode,
};

use crate::mesh;

/// Size of the generated fallback texture.
const FALLBACK_TEXTURE_SIZE: u32 = 256;

/// Cube rotation speed in radians per second.
const SPIN_SPEED: f32 = 0.8;

/// Command line parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerParams {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: Option<PathBuf>,
}

impl ViewerParams {
    /// Parse positional arguments (without the program name).
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let positional: Vec<&String> = args.iter().filter(|arg| !arg.starts_with('-')).collect();
        if let Some(flag) = args.iter().find(|arg| arg.starts_with('-')) {
            return Err(format!("unknown option `{flag}`"));
        }
        match positional.as_slice() {
            [vert, frag] => Ok(Self {
                vertex_shader: PathBuf::from(vert),
                fragment_shader: PathBuf::from(frag),
                texture: None,
            }),
            [vert, frag, texture] => Ok(Self {
                vertex_shader: PathBuf::from(vert),
                fragment_shader: PathBuf::from(frag),
                texture: Some(PathBuf::from(texture)),
            }),
            _ => Err("expected <vertex.spv> <fragment.spv> [texture]".to_string()),
        }
    }

    /// Parse the process arguments.
    pub fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::parse(&args)
    }
}

/// Per-frame uniform block, binding 0 of the vertex stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Uniforms {
    model: Mat4,
    view: Mat4,
    proj: Mat4,
}

impl Uniforms {
    fn new(angle: f32, aspect_ratio: f32) -> Self {
        let mut proj = Mat4::perspective_rh(45_f32.to_radians(), aspect_ratio, 0.1, 10.0);
        // Vulkan clip space has Y pointing down.
        proj.y_axis.y *= -1.0;
        Self {
            model: Mat4::from_rotation_y(angle) * Mat4::from_rotation_x(angle * 0.5),
            view: Mat4::look_at_rh(Vec3::new(0.0, 1.0, 2.5), Vec3::ZERO, Vec3::Y),
            proj,
        }
    }
}

/// Viewer application state.
pub struct Viewer {
    // Field order is drop order: the pipeline and sets before the layout and
    // pool they were created from.
    pipeline: GraphicsPipeline,
    descriptor_sets: Vec<DescriptorSet>,
    uniform_buffers: Vec<Buffer>,
    _descriptor_pool: Arc<DescriptorPool>,
    set_layout: Arc<DescriptorSetLayout>,
    _sampler: Sampler,
    _texture_view: Arc<ImageView>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    vertex_shader: ShaderModule,
    fragment_shader: ShaderModule,
    angle: f32,
}

impl Viewer {
    fn build_pipeline(
        ctx: &AppContext,
        set_layout: &Arc<DescriptorSetLayout>,
        shaders: [&ShaderModule; 2],
    ) -> vulkanoid_gpu::Result<GraphicsPipeline> {
        let desc = GraphicsPipelineDesc::new(&ctx.render_pass, VertexLayout::standard())
            .with_viewport(ViewportMode::Fixed(ctx.extent()))
            .with_set_layout(set_layout)
            .with_cull_mode(vk::CullModeFlags::BACK, vk::FrontFace::COUNTER_CLOCKWISE);
        ctx.device().create_pipeline(&desc, &shaders)
    }
}

impl VulkanoidApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let params = ViewerParams::from_args().map_err(anyhow::Error::msg)?;
        let device = Arc::clone(ctx.device());

        let vert_code = std::fs::read(&params.vertex_shader)
            .with_context(|| format!("reading {}", params.vertex_shader.display()))?;
        let frag_code = std::fs::read(&params.fragment_shader)
            .with_context(|| format!("reading {}", params.fragment_shader.display()))?;
        let vertex_shader =
            device.create_shader_module(&vert_code, vk::ShaderStageFlags::VERTEX, "main")?;
        let fragment_shader =
            device.create_shader_module(&frag_code, vk::ShaderStageFlags::FRAGMENT, "main")?;

        let (width, height, pixels) = match &params.texture {
            Some(path) => {
                let decoded = image::open(path)
                    .with_context(|| format!("loading texture {}", path.display()))?
                    .to_rgba8();
                info!(
                    "Loaded texture {} ({}x{})",
                    path.display(),
                    decoded.width(),
                    decoded.height()
                );
                (decoded.width(), decoded.height(), decoded.into_raw())
            }
            None => {
                info!("No texture given, using a checkerboard");
                (
                    FALLBACK_TEXTURE_SIZE,
                    FALLBACK_TEXTURE_SIZE,
                    mesh::checkerboard(FALLBACK_TEXTURE_SIZE, 8),
                )
            }
        };
        let texture = Image::from_rgba8(
            &device,
            &ctx.command_pool,
            width,
            height,
            &pixels,
            vk::Format::R8G8B8A8_SRGB,
            true,
        )?;
        let texture_view = device.create_image_view(&texture, vk::ImageAspectFlags::COLOR)?;

        let mut sampler_desc = SamplerDesc::linear(texture.mip_levels());
        if device.sampler_anisotropy_enabled() {
            sampler_desc = sampler_desc.with_anisotropy(16.0);
        }
        let sampler = device.create_sampler(&sampler_desc)?;

        let (vertices, indices) = mesh::cube();
        let vertex_buffer = Buffer::device_local_with_data(
            &device,
            &ctx.command_pool,
            &vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = Buffer::device_local_with_data(
            &device,
            &ctx.command_pool,
            &indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let set_layout = device.create_descriptor_set_layout(
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
                .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT),
        )?;
        let slots = ctx.frames_in_flight();
        let descriptor_pool =
            device.create_descriptor_pool(slots as u32, &set_layout.pool_sizes(slots as u32))?;

        let mut uniform_buffers = Vec::with_capacity(slots);
        let mut descriptor_sets = Vec::with_capacity(slots);
        for _ in 0..slots {
            let buffer = Buffer::for_elements::<Uniforms>(
                &device,
                1,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let set = device.create_descriptor_set(&descriptor_pool, &set_layout)?;
            set.writer()
                .uniform_buffer(0, &buffer)
                .combined_image_sampler(1, &texture_view, &sampler)
                .update();
            uniform_buffers.push(buffer);
            descriptor_sets.push(set);
        }

        let pipeline =
            Self::build_pipeline(ctx, &set_layout, [&vertex_shader, &fragment_shader])?;

        info!(
            samples = ?ctx.samples(),
            mip_levels = texture.mip_levels(),
            "Viewer initialized"
        );

        Ok(Self {
            pipeline,
            descriptor_sets,
            uniform_buffers,
            _descriptor_pool: descriptor_pool,
            set_layout,
            _sampler: sampler,
            _texture_view: texture_view,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            vertex_shader,
            fragment_shader,
            angle: 0.0,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.angle = (self.angle + dt * SPIN_SPEED) % std::f32::consts::TAU;
    }

    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        // The slot's fence has signaled, so its uniform buffer is free.
        self.uniform_buffers[frame.frame_slot]
            .upload_value(&Uniforms::new(self.angle, ctx.aspect_ratio()))?;

        frame
            .cmd
            .bind_pipeline(&self.pipeline)
            .bind_vertex_buffer(0, &self.vertex_buffer, 0)
            .bind_index_buffer(&self.index_buffer, 0, vk::IndexType::UINT32)
            .bind_descriptor_set(&self.pipeline, 0, &self.descriptor_sets[frame.frame_slot])
            .draw_indexed(self.index_count, 1, 0, 0, 0);
        Ok(())
    }

    fn on_swapchain_rebuilt(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        if !self.pipeline.needs_rebuild_for(ctx.extent()) {
            return Ok(());
        }
        let pipeline = Self::build_pipeline(
            ctx,
            &self.set_layout,
            [&self.vertex_shader, &self.fragment_shader],
        )?;
        let old = std::mem::replace(&mut self.pipeline, pipeline);
        ctx.retire(old);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_shaders_and_optional_texture() {
        let params = ViewerParams::parse(&args(&["a.vert.spv", "a.frag.spv"])).unwrap();
        assert_eq!(params.vertex_shader, PathBuf::from("a.vert.spv"));
        assert_eq!(params.texture, None);

        let params =
            ViewerParams::parse(&args(&["a.vert.spv", "a.frag.spv", "brick.png"])).unwrap();
        assert_eq!(params.texture, Some(PathBuf::from("brick.png")));
    }

    #[test]
    fn rejects_missing_or_unknown_arguments() {
        assert!(ViewerParams::parse(&args(&["a.vert.spv"])).is_err());
        assert!(ViewerParams::parse(&args(&["a", "b", "c", "d"])).is_err());
        assert!(ViewerParams::parse(&args(&["a", "b", "--fast"])).is_err());
    }

    #[test]
    fn projection_flips_y() {
        let uniforms = Uniforms::new(0.0, 16.0 / 9.0);
        assert!(uniforms.proj.y_axis.y < 0.0);
        assert_eq!(std::mem::size_of::<Uniforms>(), 192);
    }
}
