//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vulkanoid_gpu::sync::{FrameSync, FrameSyncManager, Semaphore, SubmitBatch};
use vulkanoid_gpu::{vk, CommandBuffer, GpuContextBuilder, GpuError, LogicalDevice};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::VulkanoidApp;
use crate::context::AppContext;
use crate::frame::{
    pacing_delay, present_requires_rebuild, submit_frame, AcquireAction, FrameContext,
    FrameStatus, FrameTimer, SlotSubmission,
};

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frames recorded ahead of the GPU.
    pub frames_in_flight: usize,
    /// Requested MSAA sample count, clamped to what the device supports.
    pub msaa_samples: u32,
    /// Color the render pass clears to.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Vulkanoid".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            msaa_samples: 4,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the requested MSAA sample count.
    pub fn with_msaa_samples(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Run a `VulkanoidApp` with the given configuration.
///
/// Installs the log subscriber, creates the window and GPU context, and runs
/// the event loop until the window closes or a fatal GPU error occurs.
pub fn run_app<A: VulkanoidApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };
    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: VulkanoidApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Per-slot and per-image synchronization of the frame loop.
struct FrameLoop {
    frames: FrameSyncManager,
    /// One command buffer per frame slot, recycled once the slot's fence
    /// signals.
    command_buffers: Vec<CommandBuffer>,
    /// One semaphore per swapchain image, signaled when rendering to the
    /// image finishes and waited on by present.
    render_finished: Vec<Semaphore>,
    rebuild_pending: bool,
    clear_values: [vk::ClearValue; 2],
    target_frame_time: Option<Duration>,
    timer: FrameTimer,
}

impl FrameLoop {
    fn new(ctx: &AppContext, config: &AppConfig) -> anyhow::Result<Self> {
        let device = ctx.device();
        let frames = FrameSyncManager::new(device, config.frames_in_flight)?;
        let command_pool = device.create_command_pool(
            device.graphics_queue(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffers = command_pool.allocate_many(config.frames_in_flight as u32)?;
        let render_finished = create_semaphores(device, ctx.swapchain.image_count())?;

        Ok(Self {
            frames,
            command_buffers,
            render_finished,
            rebuild_pending: false,
            clear_values: [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: config.clear_color,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ],
            target_frame_time: config.target_frame_time(),
            timer: FrameTimer::new(Instant::now()),
        })
    }
}

fn create_semaphores(device: &Arc<LogicalDevice>, count: usize) -> anyhow::Result<Vec<Semaphore>> {
    Ok((0..count)
        .map(|_| device.create_semaphore())
        .collect::<vulkanoid_gpu::Result<Vec<_>>>()?)
}

/// Internal application state.
struct AppState<A: VulkanoidApp> {
    // Field order is drop order: app resources and frame sync go before the
    // context that owns the swapchain and window.
    app: A,
    frame_loop: FrameLoop,
    ctx: AppContext,
}

impl<A: VulkanoidApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(state) = self.state.take() {
                    state.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame() {
                    Ok(_) => {}
                    Err(e) if is_fatal(&e) => {
                        error!("Fatal render error: {e:#}");
                        if let Some(state) = self.state.take() {
                            state.shutdown();
                        }
                        self.failure = Some(e);
                        event_loop.exit();
                    }
                    Err(e) => error!("Render error: {e:#}"),
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.handle_resize(size);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            let control_flow = control_flow_for(state.ctx.window.inner_size());
            event_loop.set_control_flow(control_flow);
            if control_flow == ControlFlow::Poll {
                state.ctx.window.request_redraw();
            }
        }
    }
}

fn is_fatal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<GpuError>().is_some_and(GpuError::is_fatal)
}

/// Event-loop mode: poll while rendering, sleep while minimized.
fn control_flow_for(size: PhysicalSize<u32>) -> ControlFlow {
    if size.width == 0 || size.height == 0 {
        ControlFlow::Wait
    } else {
        ControlFlow::Poll
    }
}

/// Record the render pass for one frame around the app's draw calls.
fn record_frame<A: VulkanoidApp>(
    app: &mut A,
    ctx: &AppContext,
    frame: &mut FrameContext<'_>,
    clear_values: &[vk::ClearValue],
) -> anyhow::Result<()> {
    let framebuffer = ctx.swapchain.framebuffer(frame.image_index)?;
    frame
        .cmd
        .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?
        .begin_render_pass(&ctx.render_pass, framebuffer, clear_values);
    app.render(ctx, frame)?;
    frame.cmd.end_render_pass();
    frame.cmd.end()?;
    Ok(())
}

/// The live objects behind one frame slot's submission.
struct SlotSubmitter<'a> {
    device: &'a LogicalDevice,
    cmd: &'a mut CommandBuffer,
    sync: &'a FrameSync,
    render_finished: &'a Semaphore,
}

impl SlotSubmission for SlotSubmitter<'_> {
    fn arm_fence(&mut self) -> vulkanoid_gpu::Result<()> {
        self.sync.reset()
    }

    fn submit_recorded(&mut self) -> vulkanoid_gpu::Result<()> {
        self.cmd.submit(
            &SubmitBatch::new()
                .wait(
                    &self.sync.image_available,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )
                .signal(self.render_finished)
                .fence(&self.sync.in_flight),
        )
    }

    fn submit_empty(&mut self) -> vulkanoid_gpu::Result<()> {
        self.device.submit_empty(
            self.device.graphics_queue(),
            &SubmitBatch::new()
                .wait(
                    &self.sync.image_available,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )
                .fence(&self.sync.in_flight),
        )
    }
}

impl<A: VulkanoidApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        // SAFETY: the window is stored in the AppContext after every object
        // that presents to it, so it outlives the surface.
        let gpu = unsafe {
            GpuContextBuilder::new()
                .app_name(&self.config.title)
                .validation(self.config.validation)
                .vsync(self.config.vsync)
                .build_for_surface(window.as_ref())
        }?;

        info!(
            "GPU: {}",
            gpu.device().physical().capabilities.summary()
        );

        let mut ctx = AppContext::new(
            window,
            gpu,
            self.config.msaa_samples,
            self.config.frames_in_flight,
        )?;
        let frame_loop = FrameLoop::new(&ctx, &self.config)?;
        let app = A::init(&mut ctx)?;

        Ok(AppState {
            app,
            frame_loop,
            ctx,
        })
    }
}

impl<A: VulkanoidApp> AppState<A> {
    /// Run one acquire, record, submit, present cycle.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<FrameStatus> {
        let frame_start = Instant::now();

        if self.frame_loop.rebuild_pending && !self.rebuild()? {
            return Ok(FrameStatus::Skipped);
        }

        let dt = self.frame_loop.timer.tick(frame_start);
        self.app.update(&self.ctx, dt);

        let slot = self.frame_loop.frames.current_frame();
        let sync = self.frame_loop.frames.current();

        // The slot's previous submission must finish before its command
        // buffer and semaphore are reused.
        sync.wait()?;
        self.ctx.retired.collect(self.ctx.frame_count);
        let cmd = &mut self.frame_loop.command_buffers[slot];
        cmd.reset()?;

        let outcome = self.ctx.swapchain.acquire_next_image(&sync.image_available)?;
        let (image_index, rebuild_after_present) = match AcquireAction::from(outcome) {
            AcquireAction::Record {
                image_index,
                rebuild_after_present,
            } => (image_index, rebuild_after_present),
            AcquireAction::Rebuild => {
                // The fence stays signaled, so the next attempt does not block.
                self.frame_loop.rebuild_pending = true;
                return Ok(FrameStatus::Skipped);
            }
        };

        let mut frame = FrameContext {
            cmd: &mut *cmd,
            image_index,
            frame_slot: slot,
            extent: self.ctx.swapchain.extent(),
            dt,
            frame_number: self.ctx.frame_count,
        };
        let recorded = record_frame(
            &mut self.app,
            &self.ctx,
            &mut frame,
            &self.frame_loop.clear_values,
        );

        let render_finished = &self.frame_loop.render_finished[image_index as usize];
        let mut submission = SlotSubmitter {
            device: self.ctx.device(),
            cmd,
            sync,
            render_finished,
        };
        if let Err(e) = submit_frame(&mut submission, recorded) {
            // The acquired image is never presented; a rebuild releases it.
            self.frame_loop.rebuild_pending = true;
            return Err(e);
        }

        let status = self.ctx.swapchain.present(render_finished, image_index)?;
        let rebuild = rebuild_after_present || present_requires_rebuild(status);
        self.frame_loop.rebuild_pending |= rebuild;

        self.frame_loop.frames.advance();
        self.ctx.frame_count += 1;

        if let Some(delay) = pacing_delay(self.frame_loop.target_frame_time, frame_start.elapsed()) {
            thread::sleep(delay);
        }

        Ok(if rebuild {
            FrameStatus::RebuildScheduled
        } else {
            FrameStatus::Presented
        })
    }

    /// Rebuild the swapchain and everything sized to it. Returns `false`
    /// while the window is minimized.
    fn rebuild(&mut self) -> anyhow::Result<bool> {
        if !self.ctx.rebuild_swapchain()? {
            return Ok(false);
        }
        self.frame_loop.rebuild_pending = false;

        let image_count = self.ctx.swapchain.image_count();
        if image_count != self.frame_loop.render_finished.len() {
            // The device is idle after the rebuild.
            self.frame_loop.render_finished = create_semaphores(self.ctx.device(), image_count)?;
        }

        self.app.on_swapchain_rebuilt(&mut self.ctx)?;
        Ok(true)
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        // Rebuilding is deferred to the next frame so a burst of resize
        // events costs a single rebuild.
        self.frame_loop.rebuild_pending = true;
        if size.width == 0 || size.height == 0 {
            info!("Window minimized");
        } else {
            info!("Resized to {}x{}", size.width, size.height);
        }
    }

    fn shutdown(mut self) {
        if let Some((min, max, avg)) = self.frame_loop.timer.stats() {
            info!("FPS Statistics:");
            info!("  Min: {min:.1}");
            info!("  Max: {max:.1}");
            info!("  Avg: {avg:.1}");
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.frame_loop.frames.wait_all() {
            warn!("Failed to wait for frames in flight: {e}");
        }
        if let Err(e) = self.ctx.gpu.wait_idle() {
            warn!("Failed to wait idle: {e}");
        }

        self.app.cleanup(&mut self.ctx);
        self.ctx.retired.flush();
        drop(self);

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_window_waits_for_events() {
        assert_eq!(control_flow_for(PhysicalSize::new(0, 0)), ControlFlow::Wait);
        assert_eq!(control_flow_for(PhysicalSize::new(800, 0)), ControlFlow::Wait);
        assert_eq!(
            control_flow_for(PhysicalSize::new(1280, 720)),
            ControlFlow::Poll
        );
    }

    #[test]
    fn target_fps_sets_frame_budget() {
        let config = AppConfig::default().with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        assert_eq!(AppConfig::default().target_frame_time(), None);
    }
}
