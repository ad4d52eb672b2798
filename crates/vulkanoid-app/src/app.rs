//! `VulkanoidApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Vulkanoid applications.
///
/// The framework creates the window, GPU context, render pass and swapchain,
/// drives the frame loop and rebuilds the swapchain when it goes stale.
pub trait VulkanoidApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the GPU context, render pass and swapchain exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering.
    ///
    /// # Arguments
    /// * `ctx` - Application context with GPU and window access
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record draw commands for a frame.
    ///
    /// The command buffer is already inside the render pass for the acquired
    /// swapchain image. The framework ends the pass, submits and presents.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;

    /// Called after the swapchain was rebuilt with a new extent.
    ///
    /// The device is idle. Rebuild anything sized to the swapchain, such as
    /// pipelines with a baked viewport.
    #[allow(unused_variables)]
    fn on_swapchain_rebuilt(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
