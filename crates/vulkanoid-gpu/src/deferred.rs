//! Deferred resource destruction for multi-frame-in-flight rendering.
//!
//! A resource retired while earlier frames may still reference it cannot be
//! dropped immediately. The queue keeps it alive until `frames_in_flight`
//! further frames have started, by which time the in-flight fence of every
//! frame that could have used it has been waited on.

use std::collections::VecDeque;

/// An item pending destruction.
struct Retired<T> {
    item: T,
    frame_retired: u64,
}

/// FIFO of retired resources, dropped once they are out of flight.
pub struct DeferredDestroyQueue<T> {
    pending: VecDeque<Retired<T>>,
    frames_in_flight: usize,
}

impl<T> DeferredDestroyQueue<T> {
    /// Create an empty queue.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Retire `item` during frame `frame_number`.
    pub fn retire(&mut self, item: T, frame_number: u64) {
        self.pending.push_back(Retired {
            item,
            frame_retired: frame_number,
        });
    }

    /// Drop every item retired at least `frames_in_flight` frames before
    /// `current_frame`. Returns how many were dropped.
    ///
    /// Call after waiting on the current frame's fence.
    pub fn collect(&mut self, current_frame: u64) -> usize {
        let frames = self.frames_in_flight as u64;
        let mut dropped = 0;
        // Frame numbers are non-decreasing, so only the front can be due.
        while self
            .pending
            .front()
            .is_some_and(|retired| retired.frame_retired + frames <= current_frame)
        {
            self.pending.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            tracing::trace!(dropped, current_frame, "Collected retired resources");
        }
        dropped
    }

    /// Drop everything. Call only after the device is idle.
    pub fn flush(&mut self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn items_survive_frames_in_flight() {
        let drops = Rc::new(Cell::new(0));
        let mut queue = DeferredDestroyQueue::new(2);

        queue.retire(DropCounter(Rc::clone(&drops)), 10);
        queue.retire(DropCounter(Rc::clone(&drops)), 11);

        assert_eq!(queue.collect(11), 0);
        assert_eq!(drops.get(), 0);

        assert_eq!(queue.collect(12), 1);
        assert_eq!(drops.get(), 1);
        assert_eq!(queue.pending_count(), 1);

        assert_eq!(queue.collect(13), 1);
        assert_eq!(drops.get(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn flush_drops_everything() {
        let drops = Rc::new(Cell::new(0));
        let mut queue = DeferredDestroyQueue::new(3);
        for frame in 0..4 {
            queue.retire(DropCounter(Rc::clone(&drops)), frame);
        }
        queue.flush();
        assert_eq!(drops.get(), 4);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn dropping_queue_drops_pending() {
        let drops = Rc::new(Cell::new(0));
        {
            let mut queue = DeferredDestroyQueue::new(2);
            queue.retire(DropCounter(Rc::clone(&drops)), 0);
        }
        assert_eq!(drops.get(), 1);
    }
}
