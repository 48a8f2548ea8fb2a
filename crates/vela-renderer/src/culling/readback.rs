//! Survivor count readback.
//!
//! The `instance_count` of every culled pool is copied into a mappable
//! buffer. In [`ReadbackMode::Immediate`] the caller waits for the map within
//! the frame. In [`ReadbackMode::Latent`] two buffers alternate and lookups
//! answer from the most recent completed map; a result only counts when the
//! pool revision and view epoch it was produced for still match.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use vela_core::PoolKey;

use super::cull::INSTANCE_COUNT_OFFSET;
use super::visibility::VisibleCount;
use crate::config::ReadbackMode;
use crate::context::RenderContext;

const RING_LEN: usize = 2;
const COUNT_BYTES: wgpu::BufferAddress = 4;

/// Hash of whatever a cull result depends on besides the pool itself.
pub fn view_epoch(parts: &[&[u8]]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    revision: u64,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
    Idle,
    Recording,
    Mapping,
    Ready,
    Failed,
}

struct ReadbackSlot {
    buffer: wgpu::Buffer,
    capacity: usize,
    entries: Vec<(PoolKey, Stamp)>,
    state: Arc<Mutex<MapState>>,
}

impl ReadbackSlot {
    fn new(ctx: &RenderContext, capacity: usize) -> Self {
        let capacity = capacity.max(8).next_power_of_two();
        Self {
            buffer: ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("Survivor Count Readback"),
                size: capacity as wgpu::BufferAddress * COUNT_BYTES,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            capacity,
            entries: Vec::with_capacity(capacity),
            state: Arc::new(Mutex::new(MapState::Idle)),
        }
    }

    fn state(&self) -> MapState {
        *self.state.lock()
    }

    fn set_state(&self, state: MapState) {
        *self.state.lock() = state;
    }

    fn mapped_len(&self) -> wgpu::BufferAddress {
        self.entries.len() as wgpu::BufferAddress * COUNT_BYTES
    }
}

/// Ring of mappable buffers holding survivor counts.
pub struct CountReadback {
    mode: ReadbackMode,
    slots: Vec<ReadbackSlot>,
    recording: Option<usize>,
    latest: HashMap<PoolKey, (Stamp, u32)>,
}

impl CountReadback {
    pub fn new(mode: ReadbackMode) -> Self {
        Self {
            mode,
            slots: Vec::with_capacity(RING_LEN),
            recording: None,
            latest: HashMap::new(),
        }
    }

    pub fn mode(&self) -> ReadbackMode {
        self.mode
    }

    /// Picks an idle buffer able to hold `pools` counts, the total to be
    /// recorded before the next [`CountReadback::submit`]. Returns false when
    /// every buffer is still in flight; nothing is recorded then.
    pub fn begin(&mut self, ctx: &RenderContext, pools: usize) -> bool {
        if self.recording.is_some() {
            return true;
        }
        let idle = self.slots.iter().position(|slot| slot.state() == MapState::Idle);
        let index = match idle {
            Some(index) => index,
            None if self.slots.len() < RING_LEN => {
                self.slots.push(ReadbackSlot::new(ctx, pools));
                self.slots.len() - 1
            }
            None => {
                tracing::trace!("Every readback buffer in flight, skipping this frame");
                self.recording = None;
                return false;
            }
        };
        if self.slots[index].capacity < pools {
            self.slots[index].buffer.destroy();
            self.slots[index] = ReadbackSlot::new(ctx, pools);
        }
        let slot = &mut self.slots[index];
        slot.entries.clear();
        slot.set_state(MapState::Recording);
        self.recording = Some(index);
        true
    }

    /// Copies the survivor count of `args` into the recording buffer.
    pub fn record(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pool: PoolKey,
        revision: u64,
        epoch: u64,
        args: &wgpu::Buffer,
    ) {
        let Some(slot) = self.recording.map(|i| &mut self.slots[i]) else {
            return;
        };
        if slot.entries.len() >= slot.capacity {
            tracing::trace!(pool = ?pool, "Readback buffer full, count not recorded");
            return;
        }
        let offset = slot.mapped_len();
        encoder.copy_buffer_to_buffer(args, INSTANCE_COUNT_OFFSET, &slot.buffer, offset, COUNT_BYTES);
        slot.entries.push((pool, Stamp { revision, epoch }));
    }

    /// Starts mapping the recording buffer. Call after the encoder holding
    /// the copies was submitted.
    pub fn submit(&mut self) {
        let Some(index) = self.recording.take() else {
            return;
        };
        let slot = &self.slots[index];
        if slot.entries.is_empty() {
            slot.set_state(MapState::Idle);
            return;
        }
        slot.set_state(MapState::Mapping);
        let state = Arc::clone(&slot.state);
        slot.buffer
            .slice(..slot.mapped_len())
            .map_async(wgpu::MapMode::Read, move |result| {
                *state.lock() = if result.is_ok() {
                    MapState::Ready
                } else {
                    MapState::Failed
                };
            });
    }

    /// Polls the device and folds every finished map into the latest counts.
    /// Returns how many buffers were resolved.
    pub fn resolve(&mut self, device: &wgpu::Device, wait: bool) -> usize {
        if !self.slots.iter().any(|slot| slot.state() == MapState::Mapping) {
            return 0;
        }
        let _ = device.poll(if wait {
            wgpu::Maintain::Wait
        } else {
            wgpu::Maintain::Poll
        });

        let mut resolved = 0;
        for slot in &mut self.slots {
            match slot.state() {
                MapState::Ready => {
                    {
                        let view = slot.buffer.slice(..slot.mapped_len()).get_mapped_range();
                        for ((pool, stamp), bytes) in slot.entries.iter().zip(view.chunks_exact(4)) {
                            let count = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                            self.latest.insert(*pool, (*stamp, count));
                        }
                    }
                    slot.buffer.unmap();
                    slot.set_state(MapState::Idle);
                    resolved += 1;
                }
                MapState::Failed => {
                    tracing::warn!("Survivor count readback failed to map");
                    slot.set_state(MapState::Idle);
                }
                _ => {}
            }
        }
        resolved
    }

    /// Survivor count of `pool` if a readback for the same revision and
    /// epoch has completed.
    pub fn lookup(&self, pool: &PoolKey, revision: u64, epoch: u64) -> VisibleCount {
        match self.latest.get(pool) {
            Some((stamp, count)) if *stamp == (Stamp { revision, epoch }) => VisibleCount::Known(*count),
            _ => VisibleCount::Unknown,
        }
    }

    /// Forgets counts of pools that no longer exist.
    pub fn retain(&mut self, mut live: impl FnMut(&PoolKey) -> bool) {
        self.latest.retain(|key, _| live(key));
    }

    pub fn destroy(&mut self) {
        for slot in self.slots.drain(..) {
            slot.buffer.destroy();
        }
        self.latest.clear();
        self.recording = None;
    }
}
