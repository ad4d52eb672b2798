//! The single forward render pass and its framebuffers.
//!
//! Attachment order is fixed: color, depth, then (multisampled only) the
//! single-sample resolve target that is presented.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::image::ImageView;
use crate::tracker::ResourceKind;
use ash::vk;
use std::sync::Arc;

/// Render pass parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Format of the presented color image.
    pub color_format: vk::Format,
    /// Depth attachment format.
    pub depth_format: vk::Format,
    /// Color/depth sample count.
    pub samples: vk::SampleCountFlags,
}

impl RenderPassDesc {
    /// Whether the color attachment is multisampled and resolved.
    pub fn resolves(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Number of framebuffer attachments.
    pub fn attachment_count(&self) -> usize {
        if self.resolves() {
            3
        } else {
            2
        }
    }

    /// Attachment descriptions in framebuffer order.
    pub fn attachment_descriptions(&self) -> Vec<vk::AttachmentDescription> {
        let resolves = self.resolves();
        let color = vk::AttachmentDescription::default()
            .format(self.color_format)
            .samples(self.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if resolves {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            });
        let depth = vk::AttachmentDescription::default()
            .format(self.depth_format)
            .samples(self.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let mut attachments = vec![color, depth];
        if resolves {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(self.color_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            );
        }
        attachments
    }

    /// The external dependency that orders attachment writes after the
    /// previous use of the swapchain image.
    pub fn external_dependency(&self) -> vk::SubpassDependency {
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
    }
}

/// A render pass.
pub struct RenderPass {
    device: Arc<LogicalDevice>,
    handle: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    /// Create the render pass described by `desc`.
    pub fn new(device: &Arc<LogicalDevice>, desc: &RenderPassDesc) -> Result<Arc<Self>> {
        let attachments = desc.attachment_descriptions();

        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_ref = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);
        if desc.resolves() {
            subpass = subpass.resolve_attachments(&resolve_ref);
        }

        let subpasses = [subpass];
        let dependencies = [desc.external_dependency()];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        // SAFETY: every pointer in create_info refers to locals.
        let handle = unsafe { device.raw().create_render_pass(&create_info, None) }.map_err(|e| {
            tracing::error!(?desc, "vkCreateRenderPass failed: {e}");
            GpuError::from(e)
        })?;
        device.tracker().created(ResourceKind::RenderPass);
        tracing::debug!(?desc, "Created render pass {handle:?}");

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            handle,
            desc: *desc,
        }))
    }

    /// Raw render pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Parameters the pass was created with.
    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    /// Destroy the render pass. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::RenderPass::null() {
            return;
        }
        tracing::debug!("Destroying render pass {:?}", self.handle);
        // SAFETY: framebuffers and pipelines hold an Arc to the pass.
        unsafe {
            self.device.raw().destroy_render_pass(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::RenderPass);
        self.handle = vk::RenderPass::null();
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A framebuffer binding image views to a render pass.
pub struct Framebuffer {
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
    attachments: Vec<Arc<ImageView>>,
    render_pass: Arc<RenderPass>,
    device: Arc<LogicalDevice>,
}

impl Framebuffer {
    /// Create a framebuffer over `attachments` in render-pass order.
    pub fn new(
        device: &Arc<LogicalDevice>,
        render_pass: &Arc<RenderPass>,
        attachments: Vec<Arc<ImageView>>,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let expected = render_pass.desc().attachment_count();
        if attachments.len() != expected {
            return Err(GpuError::InvalidState(format!(
                "framebuffer needs {expected} attachments, got {}",
                attachments.len()
            )));
        }

        let views: Vec<vk::ImageView> = attachments.iter().map(|view| view.handle()).collect();
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        // SAFETY: the pass and views are alive; the framebuffer keeps Arcs to
        // all of them.
        let handle = unsafe { device.raw().create_framebuffer(&create_info, None) }?;
        device.tracker().created(ResourceKind::Framebuffer);
        tracing::debug!(
            width = extent.width,
            height = extent.height,
            "Created framebuffer {handle:?}"
        );

        Ok(Self {
            handle,
            extent,
            attachments,
            render_pass: Arc::clone(render_pass),
            device: Arc::clone(device),
        })
    }

    /// Raw framebuffer handle.
    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    /// Destroy the framebuffer. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::Framebuffer::null() {
            return;
        }
        tracing::debug!("Destroying framebuffer {:?}", self.handle);
        // SAFETY: no in-flight render pass instance uses the framebuffer.
        unsafe {
            self.device.raw().destroy_framebuffer(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::Framebuffer);
        self.handle = vk::Framebuffer::null();
        self.attachments.clear();
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(samples: vk::SampleCountFlags) -> RenderPassDesc {
        RenderPassDesc {
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: vk::Format::D32_SFLOAT,
            samples,
        }
    }

    #[test]
    fn multisampled_pass_resolves_to_present() {
        let attachments = desc(vk::SampleCountFlags::TYPE_4).attachment_descriptions();
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            attachments[0].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(attachments[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn single_sample_pass_presents_color_directly() {
        let d = desc(vk::SampleCountFlags::TYPE_1);
        let attachments = d.attachment_descriptions();
        assert!(!d.resolves());
        assert_eq!(attachments.len(), d.attachment_count());
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn external_dependency_covers_color_and_depth() {
        let dep = desc(vk::SampleCountFlags::TYPE_1).external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(dep
            .dst_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }
}
