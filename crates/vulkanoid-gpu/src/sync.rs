//! Synchronization primitives.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::tracker::ResourceKind;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Outcome of a fence wait or status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    NotReady,
}

/// Map the raw result of `vkWaitForFences` onto a fence status.
///
/// An elapsed timeout is a status, not an error; device loss stays an error.
pub fn fence_wait_outcome(result: VkResult<()>) -> Result<FenceStatus> {
    match result {
        Ok(()) => Ok(FenceStatus::Signaled),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(FenceStatus::NotReady),
        Err(e) => Err(e.into()),
    }
}

/// CPU-observable binary signal.
pub struct Fence {
    device: Arc<LogicalDevice>,
    handle: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled.
    pub fn new(device: &Arc<LogicalDevice>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        // SAFETY: the device outlives the fence through the Arc.
        let handle = unsafe { device.raw().create_fence(&create_info, None) }?;
        device.tracker().created(ResourceKind::Fence);
        tracing::debug!(signaled, "Created fence {handle:?}");
        Ok(Self {
            device: Arc::clone(device),
            handle,
        })
    }

    /// Raw fence handle.
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Wait up to `timeout_ns` nanoseconds.
    ///
    /// A timeout of zero polls without blocking.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait(&self, timeout_ns: u64) -> Result<FenceStatus> {
        // SAFETY: the fence belongs to this device.
        let result = unsafe { self.device.raw().wait_for_fences(&[self.handle], true, timeout_ns) };
        fence_wait_outcome(result)
    }

    /// Block until the fence is signaled.
    ///
    /// Returns [`GpuError::Timeout`] if the driver gives up, which is distinct
    /// from [`GpuError::DeviceLost`].
    pub fn wait_forever(&self) -> Result<()> {
        match self.wait(u64::MAX)? {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::NotReady => Err(GpuError::Timeout),
        }
    }

    /// Query the fence without waiting.
    pub fn status(&self) -> Result<FenceStatus> {
        // SAFETY: the fence belongs to this device.
        let signaled = unsafe { self.device.raw().get_fence_status(self.handle) }?;
        Ok(if signaled {
            FenceStatus::Signaled
        } else {
            FenceStatus::NotReady
        })
    }

    /// Return the fence to the unsignaled state.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn reset(&self) -> Result<()> {
        // SAFETY: the fence is not part of a pending submission; callers wait
        // on it first.
        unsafe { self.device.raw().reset_fences(&[self.handle]) }?;
        Ok(())
    }

    /// Destroy the fence. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::Fence::null() {
            return;
        }
        tracing::debug!("Destroying fence {:?}", self.handle);
        // SAFETY: no pending submission references the fence.
        unsafe {
            self.device.raw().destroy_fence(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::Fence);
        self.handle = vk::Fence::null();
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// GPU-only binary signal.
pub struct Semaphore {
    device: Arc<LogicalDevice>,
    handle: vk::Semaphore,
}

impl Semaphore {
    /// Create a binary semaphore.
    pub fn new(device: &Arc<LogicalDevice>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        // SAFETY: the device outlives the semaphore through the Arc.
        let handle = unsafe { device.raw().create_semaphore(&create_info, None) }?;
        device.tracker().created(ResourceKind::Semaphore);
        tracing::debug!("Created semaphore {handle:?}");
        Ok(Self {
            device: Arc::clone(device),
            handle,
        })
    }

    /// Raw semaphore handle.
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }

    /// Destroy the semaphore. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::Semaphore::null() {
            return;
        }
        tracing::debug!("Destroying semaphore {:?}", self.handle);
        // SAFETY: no pending submission or present waits on the semaphore.
        unsafe {
            self.device.raw().destroy_semaphore(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::Semaphore);
        self.handle = vk::Semaphore::null();
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Synchronization attached to one queue submission.
///
/// Each wait semaphore carries the pipeline stage that blocks on it; earlier
/// stages run freely.
#[derive(Default)]
pub struct SubmitBatch<'a> {
    wait: Vec<(&'a Semaphore, vk::PipelineStageFlags)>,
    signal: Vec<&'a Semaphore>,
    fence: Option<&'a Fence>,
}

impl<'a> SubmitBatch<'a> {
    /// Empty batch: no waits, no signals, no fence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `stage` until `semaphore` is signaled.
    #[must_use]
    pub fn wait(mut self, semaphore: &'a Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.wait.push((semaphore, stage));
        self
    }

    /// Signal `semaphore` when the submission completes.
    #[must_use]
    pub fn signal(mut self, semaphore: &'a Semaphore) -> Self {
        self.signal.push(semaphore);
        self
    }

    /// Signal `fence` when the submission completes.
    #[must_use]
    pub fn fence(mut self, fence: &'a Fence) -> Self {
        self.fence = Some(fence);
        self
    }

    pub(crate) fn wait_handles(&self) -> (Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>) {
        self.wait.iter().map(|(s, stage)| (s.handle(), *stage)).unzip()
    }

    pub(crate) fn signal_handles(&self) -> Vec<vk::Semaphore> {
        self.signal.iter().map(|s| s.handle()).collect()
    }

    pub(crate) fn fence_handle(&self) -> vk::Fence {
        self.fence.map_or(vk::Fence::null(), Fence::handle)
    }
}

/// Per-frame-slot synchronization.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is available
    pub image_available: Semaphore,
    /// Signaled when the slot's submission completes
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization resources. The fence starts signaled so
    /// the first wait on a fresh slot returns immediately.
    pub fn new(device: &Arc<LogicalDevice>) -> Result<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }

    /// Wait for this slot's previous submission.
    pub fn wait(&self) -> Result<()> {
        self.in_flight.wait_forever()
    }

    /// Reset the fence for the next submission.
    pub fn reset(&self) -> Result<()> {
        self.in_flight.reset()
    }
}

/// Round-robin over `frames_in_flight` slots.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
    current_frame: usize,
}

impl FrameSyncManager {
    /// Create a sync manager for the given number of frames in flight.
    pub fn new(device: &Arc<LogicalDevice>, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(GpuError::InvalidState(
                "frames in flight must be at least 1".into(),
            ));
        }
        let frame_syncs = (0..frames_in_flight)
            .map(|_| FrameSync::new(device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            frame_syncs,
            current_frame: 0,
        })
    }

    /// Get the current frame's sync resources.
    pub fn current(&self) -> &FrameSync {
        &self.frame_syncs[self.current_frame]
    }

    /// Advance to the next frame.
    pub fn advance(&mut self) {
        self.current_frame = next_slot(self.current_frame, self.frame_syncs.len());
    }

    /// Get the current frame index.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frame_syncs.len()
    }

    /// Wait for every slot's fence.
    pub fn wait_all(&self) -> Result<()> {
        self.frame_syncs.iter().try_for_each(FrameSync::wait)
    }
}

const fn next_slot(current: usize, count: usize) -> usize {
    (current + 1) % count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_not_ready() {
        assert_eq!(
            fence_wait_outcome(Err(vk::Result::TIMEOUT)).ok(),
            Some(FenceStatus::NotReady)
        );
        assert_eq!(fence_wait_outcome(Ok(())).ok(), Some(FenceStatus::Signaled));
    }

    #[test]
    fn device_lost_is_an_error_not_a_timeout() {
        assert!(matches!(
            fence_wait_outcome(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GpuError::DeviceLost)
        ));
    }

    #[test]
    fn slots_wrap_around() {
        assert_eq!(next_slot(0, 2), 1);
        assert_eq!(next_slot(1, 2), 0);
        assert_eq!(next_slot(2, 3), 0);
    }

    #[test]
    fn empty_batch_has_no_fence() {
        let batch = SubmitBatch::new();
        assert_eq!(batch.fence_handle(), vk::Fence::null());
        assert!(batch.signal_handles().is_empty());
        let (waits, stages) = batch.wait_handles();
        assert!(waits.is_empty() && stages.is_empty());
    }
}
