//! Per-frame context and the frame-loop decisions.

use std::time::{Duration, Instant};

use vulkanoid_gpu::swapchain::{AcquireOutcome, PresentStatus};
use vulkanoid_gpu::vk;
use vulkanoid_gpu::CommandBuffer;

/// Context for the current frame being rendered.
///
/// The command buffer is recording inside the render pass instance of the
/// acquired swapchain image when the app receives it.
pub struct FrameContext<'a> {
    /// Command buffer for recording draw commands.
    pub cmd: &'a mut CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Frame-in-flight slot; per-slot resources (uniform buffers, descriptor
    /// sets) are indexed with it.
    pub frame_slot: usize,
    /// Extent of the swapchain image.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame_number: u64,
}

/// What a call to the frame entry point did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and presented.
    Presented,
    /// A frame was presented, but the swapchain is stale and is rebuilt
    /// before the next one.
    RebuildScheduled,
    /// Nothing was submitted (out-of-date swapchain or minimized window).
    Skipped,
}

/// What to do after acquiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireAction {
    /// Record into the image; rebuild after presenting if asked.
    Record {
        image_index: u32,
        rebuild_after_present: bool,
    },
    /// Abort the frame and rebuild.
    Rebuild,
}

impl From<AcquireOutcome> for AcquireAction {
    fn from(outcome: AcquireOutcome) -> Self {
        match outcome {
            AcquireOutcome::Image { index, status } => Self::Record {
                image_index: index,
                rebuild_after_present: status != PresentStatus::Success,
            },
            AcquireOutcome::OutOfDate => Self::Rebuild,
        }
    }
}

/// Queue side of one frame slot between acquire and present.
pub(crate) trait SlotSubmission {
    /// Reset the slot fence so the coming submission signals it.
    fn arm_fence(&mut self) -> vulkanoid_gpu::Result<()>;
    /// Submit the recorded command buffer.
    fn submit_recorded(&mut self) -> vulkanoid_gpu::Result<()>;
    /// Submit only the wait on the acquire semaphore, signaling the fence.
    fn submit_empty(&mut self) -> vulkanoid_gpu::Result<()>;
}

/// Submit a frame after recording it.
///
/// The fence is armed only once recording has succeeded. If recording or the
/// submission fails, an empty submission consumes the acquire semaphore and
/// signals the fence again, so the slot's next wait returns. The recording
/// error is returned afterwards.
pub(crate) fn submit_frame<S: SlotSubmission>(
    slot: &mut S,
    recorded: anyhow::Result<()>,
) -> anyhow::Result<()> {
    let failure = match recorded {
        Ok(()) => {
            slot.arm_fence()?;
            match slot.submit_recorded() {
                Ok(()) => return Ok(()),
                Err(e) => anyhow::Error::from(e),
            }
        }
        Err(e) => {
            slot.arm_fence()?;
            e
        }
    };
    slot.submit_empty()?;
    Err(failure)
}

/// Whether a present result schedules a rebuild.
pub(crate) fn present_requires_rebuild(status: PresentStatus) -> bool {
    status != PresentStatus::Success
}

/// Time left to sleep to hold `target` frame time.
pub(crate) fn pacing_delay(target: Option<Duration>, elapsed: Duration) -> Option<Duration> {
    target.and_then(|target| target.checked_sub(elapsed).filter(|d| !d.is_zero()))
}

/// Delta time and FPS statistics.
pub(crate) struct FrameTimer {
    last: Instant,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    samples: u64,
}

impl FrameTimer {
    pub fn new(now: Instant) -> Self {
        Self {
            last: now,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            samples: 0,
        }
    }

    /// Seconds since the previous tick.
    pub fn tick(&mut self, now: Instant) -> f32 {
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        if dt > 0.0 {
            let fps = 1.0 / dt;
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.samples += 1;
        }
        dt as f32
    }

    /// `(min, max, avg)` FPS, or `None` before the first timed frame.
    pub fn stats(&self) -> Option<(f64, f64, f64)> {
        (self.samples > 0).then(|| {
            (
                self.min_fps,
                self.max_fps,
                self.fps_sum / self.samples as f64,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulkanoid_gpu::GpuError;

    #[test]
    fn acquire_out_of_date_aborts_frame() {
        assert_eq!(
            AcquireAction::from(AcquireOutcome::OutOfDate),
            AcquireAction::Rebuild
        );
    }

    #[test]
    fn suboptimal_acquire_renders_then_rebuilds() {
        assert_eq!(
            AcquireAction::from(AcquireOutcome::Image {
                index: 2,
                status: PresentStatus::Suboptimal
            }),
            AcquireAction::Record {
                image_index: 2,
                rebuild_after_present: true
            }
        );
        assert_eq!(
            AcquireAction::from(AcquireOutcome::Image {
                index: 0,
                status: PresentStatus::Success
            }),
            AcquireAction::Record {
                image_index: 0,
                rebuild_after_present: false
            }
        );
    }

    #[test]
    fn stale_present_schedules_rebuild() {
        assert!(!present_requires_rebuild(PresentStatus::Success));
        assert!(present_requires_rebuild(PresentStatus::Suboptimal));
        assert!(present_requires_rebuild(PresentStatus::OutOfDate));
    }

    /// Models the slot fence: arming unsignals it, a completed submission
    /// signals it.
    struct FakeSlot {
        fence_signaled: bool,
        fail_submit: bool,
        calls: Vec<&'static str>,
    }

    impl FakeSlot {
        fn new(fail_submit: bool) -> Self {
            Self {
                fence_signaled: true,
                fail_submit,
                calls: Vec::new(),
            }
        }
    }

    impl SlotSubmission for FakeSlot {
        fn arm_fence(&mut self) -> vulkanoid_gpu::Result<()> {
            self.calls.push("arm");
            self.fence_signaled = false;
            Ok(())
        }

        fn submit_recorded(&mut self) -> vulkanoid_gpu::Result<()> {
            self.calls.push("submit");
            if self.fail_submit {
                return Err(GpuError::InvalidState("recording failed".into()));
            }
            self.fence_signaled = true;
            Ok(())
        }

        fn submit_empty(&mut self) -> vulkanoid_gpu::Result<()> {
            self.calls.push("empty");
            self.fence_signaled = true;
            Ok(())
        }
    }

    #[test]
    fn recorded_frame_arms_fence_then_submits() {
        let mut slot = FakeSlot::new(false);
        assert!(submit_frame(&mut slot, Ok(())).is_ok());
        assert_eq!(slot.calls, ["arm", "submit"]);
        assert!(slot.fence_signaled);
    }

    #[test]
    fn failed_record_leaves_fence_signaled() {
        let mut slot = FakeSlot::new(false);
        let result = submit_frame(&mut slot, Err(anyhow::anyhow!("uniform upload failed")));
        assert!(result.is_err_and(|e| e.to_string() == "uniform upload failed"));
        assert_eq!(slot.calls, ["arm", "empty"]);
        assert!(slot.fence_signaled);
    }

    #[test]
    fn rejected_submission_still_signals_fence() {
        let mut slot = FakeSlot::new(true);
        let result = submit_frame(&mut slot, Ok(()));
        assert!(result.is_err_and(|e| e.downcast_ref::<GpuError>().is_some()));
        assert_eq!(slot.calls, ["arm", "submit", "empty"]);
        assert!(slot.fence_signaled);
    }

    #[test]
    fn pacing_sleeps_only_for_remaining_time() {
        let target = Some(Duration::from_millis(16));
        assert_eq!(
            pacing_delay(target, Duration::from_millis(10)),
            Some(Duration::from_millis(6))
        );
        assert_eq!(pacing_delay(target, Duration::from_millis(16)), None);
        assert_eq!(pacing_delay(target, Duration::from_millis(30)), None);
        assert_eq!(pacing_delay(None, Duration::ZERO), None);
    }

    #[test]
    fn timer_tracks_fps_range() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);
        assert!(timer.stats().is_none());

        let dt = timer.tick(start + Duration::from_millis(10));
        assert!((dt - 0.01).abs() < 1e-6);
        timer.tick(start + Duration::from_millis(30));

        let (min, max, avg) = timer.stats().unwrap();
        assert!((min - 50.0).abs() < 1e-6);
        assert!((max - 100.0).abs() < 1e-6);
        assert!((avg - 75.0).abs() < 1e-6);
    }
}
