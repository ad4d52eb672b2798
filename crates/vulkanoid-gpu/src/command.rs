//! Command pools and command buffers.
//!
//! A [`CommandBuffer`] is a fluent recorder over GPU commands. Recording calls
//! chain on `&mut Self`; misuse (recording outside `begin`/`end`) is remembered
//! and reported by the next `end` or `submit`, so call chains stay unbroken.

use crate::buffer::Buffer;
use crate::descriptors::DescriptorSet;
use crate::device::{LogicalDevice, Queue};
use crate::error::{GpuError, Result};
use crate::image::Image;
use crate::pipeline::GraphicsPipeline;
use crate::render_pass::{Framebuffer, RenderPass};
use crate::sync::{FenceStatus, SubmitBatch};
use crate::tracker::ResourceKind;
use ash::vk;
use std::sync::Arc;

/// Recording/submission state of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Allocated or reset; ready for `begin`.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Recorded; ready for `submit`.
    Executable,
    /// Submitted and possibly still executing.
    Pending,
}

impl CommandBufferState {
    fn invalid(self, op: &str) -> GpuError {
        GpuError::InvalidState(format!("cannot {op} a command buffer in state {self:?}"))
    }

    /// Transition for `begin`.
    pub fn begin(self) -> Result<Self> {
        match self {
            Self::Initial => Ok(Self::Recording),
            other => Err(other.invalid("begin")),
        }
    }

    /// Transition for `end`.
    pub fn end(self) -> Result<Self> {
        match self {
            Self::Recording => Ok(Self::Executable),
            other => Err(other.invalid("end")),
        }
    }

    /// Transition for `submit`.
    pub fn submit(self) -> Result<Self> {
        match self {
            Self::Executable => Ok(Self::Pending),
            other => Err(other.invalid("submit")),
        }
    }

    /// Transition once the GPU is known to have finished the submission.
    pub fn complete(self) -> Self {
        match self {
            Self::Pending => Self::Executable,
            other => other,
        }
    }

    /// Transition for `reset`. A pending buffer may only be reset once its
    /// fence has signaled.
    pub fn reset(self, fence: Option<FenceStatus>) -> Result<Self> {
        match (self, fence) {
            (Self::Pending, Some(FenceStatus::Signaled))
            | (Self::Initial | Self::Recording | Self::Executable, _) => Ok(Self::Initial),
            (Self::Pending, _) => Err(GpuError::InvalidState(
                "cannot reset a command buffer that may still be executing".into(),
            )),
        }
    }

    /// Whether recording commands is allowed.
    pub fn is_recording(self) -> bool {
        self == Self::Recording
    }
}

/// Command pool bound to one queue.
///
/// Pools are not shared across threads; each recording thread would need its
/// own.
pub struct CommandPool {
    device: Arc<LogicalDevice>,
    handle: vk::CommandPool,
    queue: Queue,
    flags: vk::CommandPoolCreateFlags,
}

impl CommandPool {
    /// Create a new command pool for `queue`'s family.
    pub fn new(
        device: &Arc<LogicalDevice>,
        queue: Queue,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Arc<Self>> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family())
            .flags(flags);

        // SAFETY: the queue family exists on this device.
        let handle = unsafe { device.raw().create_command_pool(&create_info, None) }?;
        device.tracker().created(ResourceKind::CommandPool);
        tracing::debug!(family = queue.family(), ?flags, "Created command pool {handle:?}");

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            handle,
            queue,
            flags,
        }))
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    /// The queue buffers from this pool are submitted to.
    pub fn queue(&self) -> Queue {
        self.queue
    }

    /// The owning device.
    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    /// Allocate a single primary command buffer.
    pub fn allocate(self: &Arc<Self>) -> Result<CommandBuffer> {
        self.allocate_many(1)?
            .pop()
            .ok_or_else(|| GpuError::InvalidState("driver returned no command buffer".into()))
    }

    /// Allocate `count` primary command buffers.
    pub fn allocate_many(self: &Arc<Self>, count: u32) -> Result<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        // SAFETY: the pool is alive and used from one thread.
        let handles = unsafe { self.device.raw().allocate_command_buffers(&alloc_info) }?;
        Ok(handles
            .into_iter()
            .map(|handle| CommandBuffer {
                pool: Arc::clone(self),
                handle,
                state: CommandBufferState::Initial,
                pending_fence: vk::Fence::null(),
                deferred_error: None,
            })
            .collect())
    }

    /// Record and submit a blocking one-shot command buffer.
    ///
    /// Waits for the queue to go idle before returning. Meant for setup-time
    /// transfers, never for per-frame work.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn one_time_submit<F>(self: &Arc<Self>, record: F) -> Result<()>
    where
        F: FnOnce(&mut CommandBuffer) -> Result<()>,
    {
        let mut cmd = self.allocate()?;
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&mut cmd)?;
        cmd.end()?;
        cmd.submit(&SubmitBatch::new())?;
        self.device.queue_wait_idle(self.queue)?;
        cmd.state = cmd.state.complete();
        Ok(())
    }

    /// Destroy the pool. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::CommandPool::null() {
            return;
        }
        tracing::debug!("Destroying command pool {:?}", self.handle);
        // SAFETY: every command buffer holds an Arc to the pool, so all of
        // them were freed already.
        unsafe {
            self.device.raw().destroy_command_pool(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::CommandPool);
        self.handle = vk::CommandPool::null();
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A primary command buffer.
pub struct CommandBuffer {
    pool: Arc<CommandPool>,
    handle: vk::CommandBuffer,
    state: CommandBufferState,
    pending_fence: vk::Fence,
    deferred_error: Option<GpuError>,
}

impl CommandBuffer {
    /// Raw command buffer handle.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Current state.
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Start recording.
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<&mut Self> {
        let next = self.state.begin()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        // SAFETY: the buffer is in the initial state.
        unsafe {
            self.pool
                .device
                .raw()
                .begin_command_buffer(self.handle, &begin_info)
        }?;
        self.state = next;
        self.deferred_error = None;
        Ok(self)
    }

    /// Finish recording. Reports the first misuse recorded since `begin`.
    pub fn end(&mut self) -> Result<()> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        let next = self.state.end()?;
        // SAFETY: the buffer is recording.
        unsafe { self.pool.device.raw().end_command_buffer(self.handle) }?;
        self.state = next;
        Ok(())
    }

    /// Submit to the pool's queue with the given synchronization.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit(&mut self, batch: &SubmitBatch<'_>) -> Result<()> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        let next = self.state.submit()?;

        let (wait_semaphores, wait_stages) = batch.wait_handles();
        let signal_semaphores = batch.signal_handles();
        let fence = batch.fence_handle();
        let command_buffers = [self.handle];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the buffer is executable and every handle in the batch is
        // borrowed for the duration of the call.
        unsafe {
            self.pool
                .device
                .raw()
                .queue_submit(self.pool.queue.handle(), &[submit_info], fence)
        }?;
        self.state = next;
        self.pending_fence = fence;
        Ok(())
    }

    /// Return the buffer to the initial state.
    ///
    /// The pool must have been created with `RESET_COMMAND_BUFFER`. A pending
    /// buffer is reset only if the fence it was submitted with has signaled.
    pub fn reset(&mut self) -> Result<()> {
        if !self
            .pool
            .flags
            .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        {
            return Err(GpuError::InvalidState(
                "command pool was created without RESET_COMMAND_BUFFER".into(),
            ));
        }
        let fence_status = if self.state == CommandBufferState::Pending
            && self.pending_fence != vk::Fence::null()
        {
            // SAFETY: the fence outlives every submission that uses it.
            let signaled = unsafe { self.pool.device.raw().get_fence_status(self.pending_fence) }?;
            Some(if signaled {
                FenceStatus::Signaled
            } else {
                FenceStatus::NotReady
            })
        } else {
            None
        };
        let next = self.state.reset(fence_status)?;
        // SAFETY: the buffer is not executing.
        unsafe {
            self.pool
                .device
                .raw()
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
        }?;
        self.state = next;
        self.pending_fence = vk::Fence::null();
        self.deferred_error = None;
        Ok(())
    }

    fn record(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> &mut Self {
        if self.state.is_recording() {
            f(self.pool.device.raw(), self.handle);
        } else if self.deferred_error.is_none() {
            tracing::error!(state = ?self.state, "{op} recorded outside begin/end");
            self.deferred_error = Some(GpuError::InvalidState(format!(
                "{op} recorded while command buffer is {:?}",
                self.state
            )));
        }
        self
    }

    /// Begin the render pass over the whole framebuffer.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        clear_values: &[vk::ClearValue],
    ) -> &mut Self {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: framebuffer.extent(),
            })
            .clear_values(clear_values);
        // SAFETY: recording state checked by `record`.
        self.record("begin_render_pass", |device, cmd| unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        })
    }

    pub fn end_render_pass(&mut self) -> &mut Self {
        // SAFETY: recording state checked by `record`.
        self.record("end_render_pass", |device, cmd| unsafe {
            device.cmd_end_render_pass(cmd);
        })
    }

    pub fn bind_pipeline(&mut self, pipeline: &GraphicsPipeline) -> &mut Self {
        let handle = pipeline.handle();
        // SAFETY: recording state checked by `record`.
        self.record("bind_pipeline", |device, cmd| unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, handle);
        })
    }

    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: &Buffer, offset: u64) -> &mut Self {
        let handle = buffer.handle();
        // SAFETY: recording state checked by `record`.
        self.record("bind_vertex_buffer", |device, cmd| unsafe {
            device.cmd_bind_vertex_buffers(cmd, binding, &[handle], &[offset]);
        })
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: &Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) -> &mut Self {
        let handle = buffer.handle();
        // SAFETY: recording state checked by `record`.
        self.record("bind_index_buffer", |device, cmd| unsafe {
            device.cmd_bind_index_buffer(cmd, handle, offset, index_type);
        })
    }

    pub fn bind_descriptor_set(
        &mut self,
        pipeline: &GraphicsPipeline,
        set_index: u32,
        set: &DescriptorSet,
    ) -> &mut Self {
        let layout = pipeline.layout();
        let sets = [set.handle()];
        // SAFETY: recording state checked by `record`.
        self.record("bind_descriptor_set", |device, cmd| unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &sets,
                &[],
            );
        })
    }

    pub fn push_constants(
        &mut self,
        pipeline: &GraphicsPipeline,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) -> &mut Self {
        let layout = pipeline.layout();
        // SAFETY: recording state checked by `record`.
        self.record("push_constants", |device, cmd| unsafe {
            device.cmd_push_constants(cmd, layout, stages, offset, bytes);
        })
    }

    pub fn set_viewport(&mut self, extent: vk::Extent2D) -> &mut Self {
        let viewport = full_viewport(extent);
        // SAFETY: recording state checked by `record`.
        self.record("set_viewport", |device, cmd| unsafe {
            device.cmd_set_viewport(cmd, 0, &[viewport]);
        })
    }

    pub fn set_scissor(&mut self, extent: vk::Extent2D) -> &mut Self {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        // SAFETY: recording state checked by `record`.
        self.record("set_scissor", |device, cmd| unsafe {
            device.cmd_set_scissor(cmd, 0, &[scissor]);
        })
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> &mut Self {
        // SAFETY: recording state checked by `record`.
        self.record("draw", |device, cmd| unsafe {
            device.cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
        })
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> &mut Self {
        // SAFETY: recording state checked by `record`.
        self.record("draw_indexed", |device, cmd| unsafe {
            device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        })
    }

    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) -> &mut Self {
        let (src, dst) = (src.handle(), dst.handle());
        // SAFETY: recording state checked by `record`.
        self.record("copy_buffer", |device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, src, dst, regions);
        })
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: &Buffer,
        dst: &Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) -> &mut Self {
        let (src, dst) = (src.handle(), dst.handle());
        // SAFETY: recording state checked by `record`.
        self.record("copy_buffer_to_image", |device, cmd| unsafe {
            device.cmd_copy_buffer_to_image(cmd, src, dst, layout, regions);
        })
    }

    pub fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) -> &mut Self {
        // SAFETY: recording state checked by `record`.
        self.record("blit_image", |device, cmd| unsafe {
            device.cmd_blit_image(cmd, src, src_layout, dst, dst_layout, regions, filter);
        })
    }

    pub fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) -> &mut Self {
        // SAFETY: recording state checked by `record`.
        self.record("pipeline_barrier", |device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        })
    }

    /// Free the buffer back to its pool. Idempotent.
    ///
    /// A buffer still pending on the GPU is waited on first.
    pub fn destroy(&mut self) {
        if self.handle == vk::CommandBuffer::null() {
            return;
        }
        if self.state == CommandBufferState::Pending {
            tracing::warn!("Freeing a pending command buffer, waiting for it first");
            let device = &self.pool.device;
            let waited = if self.pending_fence == vk::Fence::null() {
                device.queue_wait_idle(self.pool.queue)
            } else {
                // SAFETY: the fence outlives every submission that uses it.
                unsafe { device.raw().wait_for_fences(&[self.pending_fence], true, u64::MAX) }
                    .map_err(GpuError::from)
            };
            if let Err(e) = waited {
                tracing::error!("Wait before freeing command buffer failed: {e}");
            }
        }
        // SAFETY: the buffer is not executing.
        unsafe {
            self.pool
                .device
                .raw()
                .free_command_buffers(self.pool.handle, &[self.handle]);
        }
        self.handle = vk::CommandBuffer::null();
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Viewport covering `extent` with the standard depth range.
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

#[cfg(test)]
mod tests {
    use super::*;
    use CommandBufferState as S;

    #[test]
    fn record_submit_reset_cycle() {
        let state = S::Initial;
        let state = state.begin().ok();
        assert_eq!(state, Some(S::Recording));
        let state = state.and_then(|s| s.end().ok());
        assert_eq!(state, Some(S::Executable));
        let state = state.and_then(|s| s.submit().ok());
        assert_eq!(state, Some(S::Pending));
        let state = state.and_then(|s| s.reset(Some(FenceStatus::Signaled)).ok());
        assert_eq!(state, Some(S::Initial));
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        assert!(matches!(S::Initial.end(), Err(GpuError::InvalidState(_))));
        assert!(matches!(S::Initial.submit(), Err(GpuError::InvalidState(_))));
        assert!(matches!(S::Recording.submit(), Err(GpuError::InvalidState(_))));
        assert!(matches!(S::Recording.begin(), Err(GpuError::InvalidState(_))));
        assert!(matches!(S::Pending.begin(), Err(GpuError::InvalidState(_))));
        assert!(matches!(S::Pending.submit(), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn pending_reset_requires_signaled_fence() {
        assert!(S::Pending.reset(None).is_err());
        assert!(S::Pending.reset(Some(FenceStatus::NotReady)).is_err());
        assert_eq!(S::Executable.reset(None).ok(), Some(S::Initial));
        assert_eq!(S::Recording.reset(None).ok(), Some(S::Initial));
    }

    #[test]
    fn completion_returns_to_executable() {
        assert_eq!(S::Pending.complete(), S::Executable);
        assert_eq!(S::Initial.complete(), S::Initial);
        assert!(S::Executable.submit().is_ok());
    }

    #[test]
    fn viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }
}
