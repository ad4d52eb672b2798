//! Live-object accounting used to check destruction order.
//!
//! Every wrapper registers itself with its device's tracker when created and
//! unregisters when destroyed. The device consults the tracker during its own
//! teardown: any kind with live objects means a dependent outlived the device.

use parking_lot::Mutex;
use std::fmt;

/// Kind of device-owned object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    ImageView,
    Memory,
    Sampler,
    CommandPool,
    Fence,
    Semaphore,
    RenderPass,
    Framebuffer,
    Pipeline,
    PipelineLayout,
    ShaderModule,
    DescriptorPool,
    DescriptorSetLayout,
    Swapchain,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 16] = [
        Self::Buffer,
        Self::Image,
        Self::ImageView,
        Self::Memory,
        Self::Sampler,
        Self::CommandPool,
        Self::Fence,
        Self::Semaphore,
        Self::RenderPass,
        Self::Framebuffer,
        Self::Pipeline,
        Self::PipelineLayout,
        Self::ShaderModule,
        Self::DescriptorPool,
        Self::DescriptorSetLayout,
        Self::Swapchain,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-kind live counters.
#[derive(Default)]
pub struct ResourceTracker {
    live: Mutex<[usize; ResourceKind::ALL.len()]>,
}

impl ResourceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an object of `kind` was created.
    pub fn created(&self, kind: ResourceKind) {
        self.live.lock()[kind.index()] += 1;
    }

    /// Record that an object of `kind` was destroyed.
    pub fn destroyed(&self, kind: ResourceKind) {
        let mut live = self.live.lock();
        let count = &mut live[kind.index()];
        debug_assert!(*count > 0, "{kind} destroyed more often than created");
        *count = count.saturating_sub(1);
    }

    /// Number of live objects of `kind`.
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.live.lock()[kind.index()]
    }

    /// Kinds that still have live objects, with their counts.
    pub fn leaks(&self) -> Vec<(ResourceKind, usize)> {
        let live = self.live.lock();
        ResourceKind::ALL
            .iter()
            .filter(|kind| live[kind.index()] > 0)
            .map(|&kind| (kind, live[kind.index()]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_kind() {
        let tracker = ResourceTracker::new();
        tracker.created(ResourceKind::Buffer);
        tracker.created(ResourceKind::Buffer);
        tracker.created(ResourceKind::Fence);
        tracker.destroyed(ResourceKind::Buffer);

        assert_eq!(tracker.live(ResourceKind::Buffer), 1);
        assert_eq!(tracker.live(ResourceKind::Fence), 1);
        assert_eq!(tracker.live(ResourceKind::Image), 0);
        assert_eq!(
            tracker.leaks(),
            vec![(ResourceKind::Buffer, 1), (ResourceKind::Fence, 1)]
        );
    }

    #[test]
    fn balanced_tracker_has_no_leaks() {
        let tracker = ResourceTracker::new();
        for kind in ResourceKind::ALL {
            tracker.created(kind);
            tracker.destroyed(kind);
        }
        assert!(tracker.leaks().is_empty());
    }
}
