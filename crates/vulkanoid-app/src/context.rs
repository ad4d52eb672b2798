//! Application context.

use std::any::Any;
use std::sync::Arc;

use vulkanoid_gpu::command::CommandPool;
use vulkanoid_gpu::render_pass::{RenderPass, RenderPassDesc};
use vulkanoid_gpu::{vk, DeferredDestroyQueue, GpuContext, GpuError, LogicalDevice, Swapchain};
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Provides access to the GPU context, window, render pass and swapchain.
pub struct AppContext {
    // Field order is drop order: everything that presents to the window's
    // surface goes before the window.
    /// Resources retired while earlier frames may still use them.
    pub(crate) retired: DeferredDestroyQueue<Box<dyn Any>>,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// The forward render pass every swapchain framebuffer uses.
    pub render_pass: Arc<RenderPass>,
    /// Command pool on the graphics queue for setup uploads.
    pub command_pool: Arc<CommandPool>,
    /// GPU context with device and surface.
    pub gpu: GpuContext,
    /// The window handle.
    pub window: Arc<Window>,
    /// Total frames presented.
    pub frame_count: u64,
    frames_in_flight: usize,
}

impl AppContext {
    /// Create the render pass, swapchain and setup command pool for `window`.
    pub(crate) fn new(
        window: Arc<Window>,
        gpu: GpuContext,
        requested_samples: u32,
        frames_in_flight: usize,
    ) -> anyhow::Result<Self> {
        let device = Arc::clone(gpu.device());
        let surface = gpu
            .surface()
            .cloned()
            .ok_or_else(|| GpuError::InvalidState("context was built without a surface".into()))?;

        let color_format = gpu.surface_format()?.format;
        let depth_format = device
            .physical()
            .depth_format
            .ok_or(GpuError::NoSupportedFormat)?;
        let samples = choose_sample_count(
            requested_samples,
            device.physical().capabilities.max_sample_count,
        );
        let render_pass = device.create_render_pass(&RenderPassDesc {
            color_format,
            depth_format,
            samples,
        })?;

        let size = window.inner_size();
        let desc = gpu.swapchain_desc(size.width.max(1), size.height.max(1));
        let swapchain = device.create_swapchain(&surface, &render_pass, &desc)?;

        let command_pool = device.create_command_pool(
            device.graphics_queue(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            retired: DeferredDestroyQueue::new(frames_in_flight),
            swapchain,
            render_pass,
            command_pool,
            gpu,
            window,
            frame_count: 0,
            frames_in_flight,
        })
    }

    /// Get the logical device.
    pub fn device(&self) -> &Arc<LogicalDevice> {
        self.gpu.device()
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    /// Number of frame slots; per-slot resources need this many copies.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Sample count of the render pass.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.render_pass.desc().samples
    }

    /// Keep `resource` alive until every frame in flight has completed.
    pub fn retire<T: Any>(&mut self, resource: T) {
        self.retired.retire(Box::new(resource), self.frame_count);
    }

    /// Rebuild the swapchain for the window's current size.
    ///
    /// Returns `Ok(false)` without rebuilding while the window is minimized.
    pub(crate) fn rebuild_swapchain(&mut self) -> anyhow::Result<bool> {
        let size = self.window.inner_size();
        let rebuilt = self.swapchain.recreate(vk::Extent2D {
            width: size.width,
            height: size.height,
        })?;
        Ok(rebuilt)
    }
}

/// Largest supported power-of-two sample count not above `requested`.
pub(crate) fn choose_sample_count(
    requested: u32,
    max: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let requested = requested.max(1);
    let floor_pow2 = 1 << (u32::BITS - 1 - requested.leading_zeros());
    vk::SampleCountFlags::from_raw(floor_pow2.min(max.as_raw().max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_count_clamps_to_device() {
        let max = vk::SampleCountFlags::TYPE_8;
        assert_eq!(choose_sample_count(4, max), vk::SampleCountFlags::TYPE_4);
        assert_eq!(choose_sample_count(16, max), vk::SampleCountFlags::TYPE_8);
        assert_eq!(choose_sample_count(6, max), vk::SampleCountFlags::TYPE_4);
        assert_eq!(choose_sample_count(0, max), vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            choose_sample_count(4, vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
