//! Graphics pipelines.

use crate::descriptors::DescriptorSetLayout;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::render_pass::RenderPass;
use crate::shader::ShaderModule;
use crate::tracker::ResourceKind;
use crate::vertex::VertexLayout;
use ash::vk;
use std::sync::Arc;

/// How the pipeline obtains its viewport and scissor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportMode {
    /// Baked at creation; the pipeline must be rebuilt when the extent changes.
    Fixed(vk::Extent2D),
    /// Set per command buffer with `set_viewport`/`set_scissor`.
    Dynamic,
}

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub render_pass: Arc<RenderPass>,
    pub vertex_layout: VertexLayout,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub viewport: ViewportMode,
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl GraphicsPipelineDesc {
    /// Triangle list, back-face culling with clockwise front faces, depth
    /// test and write on, dynamic viewport. Sample count follows the render
    /// pass.
    pub fn new(render_pass: &Arc<RenderPass>, vertex_layout: VertexLayout) -> Self {
        Self {
            render_pass: Arc::clone(render_pass),
            vertex_layout,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            viewport: ViewportMode::Dynamic,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_viewport(mut self, viewport: ViewportMode) -> Self {
        self.viewport = viewport;
        self
    }

    #[must_use]
    pub fn with_set_layout(mut self, layout: &Arc<DescriptorSetLayout>) -> Self {
        self.set_layouts.push(Arc::clone(layout));
        self
    }

    #[must_use]
    pub fn with_push_constants(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }

    #[must_use]
    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    /// Dynamic states the pipeline declares.
    pub fn dynamic_states(&self) -> Vec<vk::DynamicState> {
        match self.viewport {
            ViewportMode::Fixed(_) => Vec::new(),
            ViewportMode::Dynamic => vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }
}

/// Graphics pipeline and its layout.
pub struct GraphicsPipeline {
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
    viewport: ViewportMode,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    render_pass: Arc<RenderPass>,
    device: Arc<LogicalDevice>,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline for subpass 0 of the description's render
    /// pass.
    pub fn new(
        device: &Arc<LogicalDevice>,
        desc: &GraphicsPipelineDesc,
        shaders: &[&ShaderModule],
    ) -> Result<Self> {
        if !shaders
            .iter()
            .any(|shader| shader.stage() == vk::ShaderStageFlags::VERTEX)
        {
            return Err(GpuError::PipelineCreation("missing vertex stage".into()));
        }
        let shader_stages: Vec<_> = shaders.iter().map(|shader| shader.stage_info()).collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_layout.bindings)
            .vertex_attribute_descriptions(&desc.vertex_layout.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let (viewports, scissors) = match desc.viewport {
            ViewportMode::Fixed(extent) => (
                vec![crate::command::full_viewport(extent)],
                vec![vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                }],
            ),
            ViewportMode::Dynamic => (Vec::new(), Vec::new()),
        };
        let viewport_state = match desc.viewport {
            ViewportMode::Fixed(_) => vk::PipelineViewportStateCreateInfo::default()
                .viewports(&viewports)
                .scissors(&scissors),
            ViewportMode::Dynamic => vk::PipelineViewportStateCreateInfo::default()
                .viewport_count(1)
                .scissor_count(1),
        };

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(desc.polygon_mode)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(desc.render_pass.desc().samples)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = desc.dynamic_states();
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            desc.set_layouts.iter().map(|layout| layout.handle()).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&desc.push_constant_ranges);

        // SAFETY: the set layouts are alive for the call.
        let layout = unsafe { device.raw().create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;
        device.tracker().created(ResourceKind::PipelineLayout);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(desc.render_pass.handle())
            .subpass(0);

        // SAFETY: every pointer in pipeline_info refers to locals or to
        // modules borrowed for the call.
        let created = unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let handle = match created {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                tracing::error!(viewport = ?desc.viewport, "Pipeline creation failed: {e}");
                None
            }
        };
        let Some(handle) = handle else {
            // SAFETY: the layout is unused.
            unsafe { device.raw().destroy_pipeline_layout(layout, None) };
            device.tracker().destroyed(ResourceKind::PipelineLayout);
            return Err(GpuError::PipelineCreation(
                "vkCreateGraphicsPipelines failed".into(),
            ));
        };
        device.tracker().created(ResourceKind::Pipeline);
        tracing::debug!(viewport = ?desc.viewport, "Created graphics pipeline {handle:?}");

        Ok(Self {
            handle,
            layout,
            viewport: desc.viewport,
            set_layouts: desc.set_layouts.clone(),
            render_pass: Arc::clone(&desc.render_pass),
            device: Arc::clone(device),
        })
    }

    /// Raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    /// Raw pipeline layout handle.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Whether the viewport extent is baked into the pipeline.
    pub fn is_extent_baked(&self) -> bool {
        matches!(self.viewport, ViewportMode::Fixed(_))
    }

    /// Whether the pipeline must be rebuilt for `extent`.
    pub fn needs_rebuild_for(&self, extent: vk::Extent2D) -> bool {
        match self.viewport {
            ViewportMode::Fixed(baked) => baked != extent,
            ViewportMode::Dynamic => false,
        }
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    /// Destroy the pipeline and its layout. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::Pipeline::null() {
            return;
        }
        tracing::debug!("Destroying graphics pipeline {:?}", self.handle);
        // SAFETY: no in-flight command buffer binds the pipeline.
        unsafe {
            self.device.raw().destroy_pipeline(self.handle, None);
            self.device.raw().destroy_pipeline_layout(self.layout, None);
        }
        self.device.tracker().destroyed(ResourceKind::Pipeline);
        self.device.tracker().destroyed(ResourceKind::PipelineLayout);
        self.handle = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.set_layouts.clear();
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}
