//! GPU mirror of an instance pool.

use std::ops::Range;

use vela_core::{InstancePool, InstanceTransform, PoolKey};

use crate::context::RenderContext;
use crate::fence::{GpuFence, RetiredBuffers};

/// Bytes occupied by `slots` instance transforms.
pub fn slot_bytes(slots: usize) -> wgpu::BufferAddress {
    (slots * std::mem::size_of::<InstanceTransform>()) as wgpu::BufferAddress
}

/// Buffer work that brings a GPU mirror of `gpu_capacity` slots up to date
/// with a pool of `pool_capacity` slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadPlan {
    /// Capacity of the replacement buffer when the pool outgrew the old one.
    pub grow_to: Option<usize>,
    /// Slots copied on the GPU from the old buffer into the replacement.
    pub copy: Option<Range<usize>>,
    /// Slot ranges written from the CPU pool, after the copy.
    pub writes: Vec<Range<usize>>,
}

/// Plans one sync. On growth the old slots are copied, the new tail is
/// written in full and the dirty range only where the tail does not cover it.
pub fn plan_upload(gpu_capacity: usize, pool_capacity: usize, dirty: Option<Range<usize>>) -> UploadPlan {
    let mut plan = UploadPlan::default();
    let mut covered_from = pool_capacity;
    if pool_capacity > gpu_capacity {
        plan.grow_to = Some(pool_capacity);
        plan.copy = Some(0..gpu_capacity);
        plan.writes.push(gpu_capacity..pool_capacity);
        covered_from = gpu_capacity;
    }
    if let Some(range) = dirty {
        let end = range.end.min(covered_from);
        if range.start < end {
            plan.writes.push(range.start..end);
        }
    }
    plan
}

/// What a [`GpuInstancePool::sync`] did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// The backing buffer was replaced; bind groups that reference it are stale.
    pub grew: bool,
    /// Slot ranges written this sync.
    pub writes: Vec<Range<usize>>,
}

/// Storage buffer holding every slot of one pool, sentinels included.
pub struct GpuInstancePool {
    key: PoolKey,
    buffer: wgpu::Buffer,
    capacity: usize,
    generation: u64,
    active_range: u32,
}

impl GpuInstancePool {
    pub fn new(ctx: &RenderContext, pool: &mut InstancePool) -> Self {
        let buffer = ctx.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Instance Pool Buffer"),
            contents: bytemuck::cast_slice(pool.slots()),
            usage: Self::usage(),
        });
        pool.finish_upload();
        Self {
            key: pool.key(),
            buffer,
            capacity: pool.capacity(),
            generation: pool.generation(),
            active_range: pool.active_range() as u32,
        }
    }

    fn usage() -> wgpu::BufferUsages {
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
    }

    /// Brings the GPU copy up to date with `pool`.
    ///
    /// On growth a larger buffer is allocated, the old contents are copied on
    /// the GPU, and the old buffer is retired behind a fence inserted after
    /// the copy.
    pub fn sync(
        &mut self,
        ctx: &RenderContext,
        pool: &mut InstancePool,
        retired: &mut RetiredBuffers,
    ) -> SyncReport {
        let plan = plan_upload(self.capacity, pool.capacity(), pool.dirty_range());

        if let (Some(new_capacity), Some(copy)) = (plan.grow_to, plan.copy.clone()) {
            let replacement = ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("Instance Pool Buffer"),
                size: slot_bytes(new_capacity),
                usage: Self::usage(),
                mapped_at_creation: false,
            });

            // Submitted before the writes below, so they land on top of the copy.
            let mut encoder = ctx.create_encoder("Instance Pool Growth");
            encoder.copy_buffer_to_buffer(
                &self.buffer,
                slot_bytes(copy.start),
                &replacement,
                slot_bytes(copy.start),
                slot_bytes(copy.len()),
            );
            ctx.submit(encoder);

            let old = std::mem::replace(&mut self.buffer, replacement);
            retired.push(GpuFence::insert(ctx.queue()), old, "instance pool buffer");

            tracing::debug!(
                pool = ?self.key,
                from = self.capacity,
                to = new_capacity,
                "Instance buffer grown"
            );
            self.capacity = new_capacity;
            self.generation = pool.generation();
        }

        for range in &plan.writes {
            ctx.write_buffer(
                &self.buffer,
                slot_bytes(range.start),
                bytemuck::cast_slice(&pool.slots()[range.clone()]),
            );
        }
        pool.finish_upload();
        self.active_range = pool.active_range() as u32;
        SyncReport {
            grew: plan.grow_to.is_some(),
            writes: plan.writes,
        }
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pool generation the buffer was last sized for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Leading slots the cull shader has to scan.
    pub fn active_range(&self) -> u32 {
        self.active_range
    }

    /// Hands the buffer to `retired` once the pool itself is gone.
    pub fn retire(self, retired: &mut RetiredBuffers, queue: &wgpu::Queue) {
        retired.push(GpuFence::insert(queue), self.buffer, "instance pool buffer");
    }
}
