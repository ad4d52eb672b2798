//! Application framework for the Vulkanoid renderer.
//!
//! This crate provides a trait-based application framework that handles:
//! - Window creation and management
//! - GPU context, render pass and swapchain setup
//! - Frames in flight with fence-gated command buffer recycling
//! - Swapchain rebuild on resize, suboptimal and out-of-date presentation
//! - Event loop handling and shutdown ordering
//!
//! # Example
//!
//! ```no_run
//! use vulkanoid_app::{run_app, AppConfig, AppContext, FrameContext, VulkanoidApp};
//!
//! struct MyApp;
//!
//! impl VulkanoidApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
//!         frame.cmd.set_viewport(frame.extent).set_scissor(frame.extent);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("My App"))
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::VulkanoidApp;
pub use context::AppContext;
pub use frame::{FrameContext, FrameStatus};
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use vulkanoid_gpu::{GpuContext, GpuContextBuilder};
pub use winit::event::WindowEvent;
