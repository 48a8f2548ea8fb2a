//! Fence-guarded retirement of replaced GPU buffers.
//!
//! A buffer swapped out by pool growth may still be read by submitted
//! command buffers. It is parked here together with a fence inserted at swap
//! time and destroyed only after the fence signals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Signals once all work submitted before its creation has completed.
#[derive(Clone)]
pub struct GpuFence {
    signaled: Arc<AtomicBool>,
}

impl GpuFence {
    /// Inserts a fence after everything submitted to `queue` so far.
    pub fn insert(queue: &wgpu::Queue) -> Self {
        let signaled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&signaled);
        queue.on_submitted_work_done(move || flag.store(true, Ordering::Release));
        Self { signaled }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn manual() -> (Self, Arc<AtomicBool>) {
        let signaled = Arc::new(AtomicBool::new(false));
        (
            Self {
                signaled: Arc::clone(&signaled),
            },
            signaled,
        )
    }
}

/// Something that can be destroyed once the GPU no longer uses it.
pub trait Retire {
    fn retire(self);
}

impl Retire for wgpu::Buffer {
    fn retire(self) {
        self.destroy();
    }
}

/// Resources waiting for their fence before destruction.
pub struct RetiredQueue<T: Retire> {
    pending: Vec<(GpuFence, T, &'static str)>,
}

/// Retired buffers, the common case.
pub type RetiredBuffers = RetiredQueue<wgpu::Buffer>;

impl<T: Retire> Default for RetiredQueue<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<T: Retire> RetiredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `resource` until `fence` signals.
    pub fn push(&mut self, fence: GpuFence, resource: T, label: &'static str) {
        self.pending.push((fence, resource, label));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Destroys everything whose fence has signaled. Returns how many went.
    ///
    /// Fence callbacks only fire during device polling, so callers poll
    /// (without blocking) before collecting.
    pub fn collect(&mut self) -> usize {
        let mut destroyed = 0;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].0.is_signaled() {
                let (_, resource, label) = self.pending.swap_remove(i);
                resource.retire();
                tracing::debug!(resource = label, "Retired GPU resource destroyed");
                destroyed += 1;
            } else {
                i += 1;
            }
        }
        destroyed
    }

    /// Waits for all GPU work and destroys everything. Used at teardown.
    pub fn flush(&mut self, device: &wgpu::Device) {
        if self.pending.is_empty() {
            return;
        }
        let _ = device.poll(wgpu::Maintain::Wait);
        for (_, resource, _) in self.pending.drain(..) {
            resource.retire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Tracked(Arc<AtomicUsize>);

    impl Retire for Tracked {
        fn retire(self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_resource_outlives_unsignaled_fence() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut queue = RetiredQueue::new();
        let (early, early_flag) = GpuFence::manual();
        let (late, late_flag) = GpuFence::manual();
        queue.push(early, Tracked(Arc::clone(&destroyed)), "early");
        queue.push(late, Tracked(Arc::clone(&destroyed)), "late");

        assert_eq!(queue.collect(), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        early_flag.store(true, Ordering::SeqCst);
        assert_eq!(queue.collect(), 1);
        assert_eq!(queue.len(), 1);

        late_flag.store(true, Ordering::SeqCst);
        assert_eq!(queue.collect(), 1);
        assert!(queue.is_empty());
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }
}
