//! Growable instance pool with sentinel-encoded free slots.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use thiserror::Error;

use super::{MaterialClass, OwnerId, PoolKey, VisibilityGroup};
use crate::bounds::BoundingBox;

/// Instance pool errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("Slot {slot} is out of range (capacity {capacity})")]
    OutOfRange { slot: usize, capacity: usize },

    #[error("Slot {0} is not occupied")]
    NotOccupied(usize),

    #[error("Transform contains non-finite components")]
    InvalidTransform,

    #[error("Owner {0:?} already has an instance")]
    DuplicateOwner(OwnerId),

    #[error("Owner {0:?} has no instance")]
    UnknownOwner(OwnerId),

    #[error("Pool {0:?} does not exist")]
    UnknownPool(PoolKey),

    #[error("Pool {pool:?} holds {existing:?} instances, not {requested:?}")]
    GroupMismatch {
        pool: PoolKey,
        existing: VisibilityGroup,
        requested: VisibilityGroup,
    },
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Element of the transform that carries the slot-state sentinels.
const SENTINEL_ELEMENT: usize = 15;

/// World transform of one instance, 16 floats in row-major order.
///
/// Two values unreachable by a real transform mark slot state:
/// [`InstanceTransform::EMPTY`] (`+inf` in the last element) and
/// [`InstanceTransform::TOMBSTONE`] (`-inf` in the last element).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceTransform(pub [f32; 16]);

impl InstanceTransform {
    /// Slot available for allocation.
    pub const EMPTY: Self = Self::sentinel(f32::INFINITY);

    /// Slot logically removed, waiting for its GPU copy to be overwritten.
    pub const TOMBSTONE: Self = Self::sentinel(f32::NEG_INFINITY);

    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    const fn sentinel(marker: f32) -> Self {
        let mut m = [0.0; 16];
        m[SENTINEL_ELEMENT] = marker;
        Self(m)
    }

    /// Converts a glam (column-major) matrix.
    pub fn from_mat4(matrix: &Mat4) -> Self {
        Self(matrix.transpose().to_cols_array())
    }

    /// Converts back to a glam matrix.
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols_array(&self.0).transpose()
    }

    pub fn is_empty(&self) -> bool {
        self.0[SENTINEL_ELEMENT] == f32::INFINITY
    }

    pub fn is_tombstone(&self) -> bool {
        self.0[SENTINEL_ELEMENT] == f32::NEG_INFINITY
    }

    /// Returns true for either sentinel.
    pub fn is_free(&self) -> bool {
        self.is_empty() || self.is_tombstone()
    }

    /// Returns true if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl Default for InstanceTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Mat4> for InstanceTransform {
    fn from(matrix: Mat4) -> Self {
        Self::from_mat4(&matrix)
    }
}

/// Static properties of a pool, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolDescriptor {
    pub key: PoolKey,
    pub group: VisibilityGroup,
    pub material_class: MaterialClass,
    /// Mesh bounds in local space.
    pub bounds: BoundingBox,
}

/// Growable array of instance transforms for one mesh and material pair.
///
/// Slot indices handed out by [`InstancePool::add`] stay valid until the
/// matching [`InstancePool::remove`]; growth only appends new slots.
#[derive(Debug, Clone)]
pub struct InstancePool {
    desc: PoolDescriptor,
    slots: Vec<InstanceTransform>,
    owners: Vec<Option<OwnerId>>,
    initial_capacity: usize,
    min_empty_index: usize,
    max_empty_index_bound: usize,
    max_occupied_index: Option<usize>,
    count: usize,
    /// Bumped whenever the backing storage is reallocated.
    generation: u64,
    /// Bumped on every mutation, used to invalidate stale visibility results.
    revision: u64,
    dirty: Option<Range<usize>>,
    pending_tombstones: Vec<usize>,
}

impl InstancePool {
    /// Creates an empty pool. `initial_capacity` is rounded up to at least one.
    pub fn new(desc: PoolDescriptor, initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            desc,
            slots: vec![InstanceTransform::EMPTY; capacity],
            owners: vec![None; capacity],
            initial_capacity: capacity,
            min_empty_index: 0,
            max_empty_index_bound: capacity - 1,
            max_occupied_index: None,
            count: 0,
            generation: 0,
            revision: 0,
            dirty: None,
            pending_tombstones: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &PoolDescriptor {
        &self.desc
    }

    pub fn key(&self) -> PoolKey {
        self.desc.key
    }

    /// Number of live instances.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    /// Lowest slot known to be free.
    pub fn min_empty_index(&self) -> usize {
        self.min_empty_index
    }

    /// Highest occupied slot, or `None` when the pool is logically empty.
    pub fn max_occupied_index(&self) -> Option<usize> {
        self.max_occupied_index
    }

    /// Number of leading slots the GPU has to scan to see every instance.
    pub fn active_range(&self) -> usize {
        self.max_occupied_index.map_or(0, |i| i + 1)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// All slots including sentinels, in GPU layout.
    pub fn slots(&self) -> &[InstanceTransform] {
        &self.slots
    }

    pub fn transform(&self, slot: usize) -> Option<&InstanceTransform> {
        self.slots.get(slot).filter(|t| !t.is_free())
    }

    pub fn owner(&self, slot: usize) -> Option<OwnerId> {
        self.owners.get(slot).copied().flatten()
    }

    /// Iterates over occupied slots as `(slot, owner, transform)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, OwnerId, &InstanceTransform)> {
        self.slots[..self.active_range()]
            .iter()
            .zip(&self.owners)
            .enumerate()
            .filter_map(|(i, (t, o))| o.map(|owner| (i, owner, t)))
    }

    /// Stores a new instance and returns its slot index.
    pub fn add(&mut self, owner: OwnerId, transform: InstanceTransform) -> PoolResult<usize> {
        if !transform.is_finite() {
            return Err(PoolError::InvalidTransform);
        }
        if self.count >= self.capacity() {
            self.grow_to_fit(self.min_empty_index);
        }

        let slot = self.min_empty_index;
        debug_assert!(self.slots[slot].is_free());
        self.slots[slot] = transform;
        self.owners[slot] = Some(owner);
        self.count += 1;
        self.max_occupied_index = Some(self.max_occupied_index.map_or(slot, |m| m.max(slot)));
        self.mark_dirty(slot);

        self.min_empty_index = (slot + 1..=self.max_empty_index_bound)
            .find(|&i| self.slots[i].is_free())
            .unwrap_or(self.capacity());

        Ok(slot)
    }

    /// Frees a slot and returns the owner that held it.
    ///
    /// Removing a slot that is not occupied is a contract violation and is
    /// rejected without touching pool state.
    pub fn remove(&mut self, slot: usize) -> PoolResult<OwnerId> {
        self.check_range(slot)?;
        let owner = self.owners[slot].ok_or(PoolError::NotOccupied(slot))?;

        self.slots[slot] = InstanceTransform::TOMBSTONE;
        self.owners[slot] = None;
        self.pending_tombstones.push(slot);
        self.count -= 1;
        self.min_empty_index = self.min_empty_index.min(slot);
        self.mark_dirty(slot);

        if self.max_occupied_index == Some(slot) {
            self.max_occupied_index = (0..slot).rev().find(|&i| self.owners[i].is_some());
        }

        Ok(owner)
    }

    /// Replaces the transform of an occupied slot.
    pub fn set(&mut self, slot: usize, transform: InstanceTransform) -> PoolResult<()> {
        self.check_range(slot)?;
        if self.owners[slot].is_none() {
            return Err(PoolError::NotOccupied(slot));
        }
        if !transform.is_finite() {
            return Err(PoolError::InvalidTransform);
        }
        self.slots[slot] = transform;
        self.mark_dirty(slot);
        Ok(())
    }

    /// Slot range modified since the last [`InstancePool::finish_upload`].
    pub fn dirty_range(&self) -> Option<Range<usize>> {
        self.dirty.clone()
    }

    /// Marks the current contents as mirrored on the GPU.
    ///
    /// Tombstones are now overwritten on the GPU side, so they become plain
    /// empty slots.
    pub fn finish_upload(&mut self) {
        for slot in self.pending_tombstones.drain(..) {
            if self.slots[slot].is_tombstone() {
                self.slots[slot] = InstanceTransform::EMPTY;
            }
        }
        self.dirty = None;
    }

    fn check_range(&self, slot: usize) -> PoolResult<()> {
        if slot >= self.capacity() {
            return Err(PoolError::OutOfRange {
                slot,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn mark_dirty(&mut self, slot: usize) {
        self.revision += 1;
        self.dirty = Some(match self.dirty.take() {
            Some(r) => r.start.min(slot)..r.end.max(slot + 1),
            None => slot..slot + 1,
        });
    }

    fn grow_to_fit(&mut self, index: usize) {
        let old = self.capacity();
        let mut capacity = old;
        while capacity <= index {
            capacity *= 2;
        }
        if capacity == old {
            return;
        }

        self.slots.resize(capacity, InstanceTransform::EMPTY);
        self.owners.resize(capacity, None);
        self.max_empty_index_bound = capacity - 1;
        self.generation += 1;
        tracing::debug!(
            pool = ?self.desc.key,
            from = old,
            to = capacity,
            "Instance pool grown"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{MaterialId, MeshId};

    fn pool(capacity: usize) -> InstancePool {
        InstancePool::new(
            PoolDescriptor {
                key: PoolKey::new(MeshId(1), MaterialId(1)),
                group: VisibilityGroup::NonOccluder,
                material_class: MaterialClass::Opaque,
                bounds: BoundingBox::default(),
            },
            capacity,
        )
    }

    fn translation(x: f32) -> InstanceTransform {
        InstanceTransform::from_mat4(&Mat4::from_translation(glam::Vec3::new(x, 0.0, 0.0)))
    }

    fn live_slots(pool: &InstancePool) -> usize {
        pool.slots().iter().filter(|t| !t.is_free()).count()
    }

    /// Cheap deterministic generator so the sequence test is reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }
    }

    #[test]
    fn test_sentinels_are_not_transforms() {
        assert!(InstanceTransform::EMPTY.is_empty());
        assert!(InstanceTransform::TOMBSTONE.is_tombstone());
        assert!(!InstanceTransform::EMPTY.is_finite());
        assert!(!InstanceTransform::IDENTITY.is_free());
        assert_eq!(InstanceTransform::from_mat4(&Mat4::IDENTITY), InstanceTransform::IDENTITY);
    }

    #[test]
    fn test_row_major_layout() {
        let t = translation(7.0);
        // Translation lives in the last column, i.e. element 3 of row 0.
        assert_eq!(t.0[3], 7.0);
        assert_eq!(t.to_mat4(), Mat4::from_translation(glam::Vec3::new(7.0, 0.0, 0.0)));
    }

    #[test]
    fn test_growth_from_capacity_one() {
        let mut pool = pool(1);
        let mut capacities = vec![pool.capacity()];
        for i in 0..70 {
            pool.add(OwnerId(i), translation(i as f32)).unwrap();
            if *capacities.last().unwrap() != pool.capacity() {
                capacities.push(pool.capacity());
            }
        }
        assert_eq!(capacities, vec![1, 2, 4, 8, 16, 32, 64, 128]);
        assert_eq!(pool.count(), 70);
        assert_eq!(live_slots(&pool), 70);
        for (slot, _, t) in pool.iter() {
            assert!(!t.is_free(), "slot {slot} holds a sentinel");
        }
        assert_eq!(pool.generation(), 7);
    }

    #[test]
    fn test_growth_preserves_indices() {
        let mut pool = pool(2);
        let a = pool.add(OwnerId(1), translation(1.0)).unwrap();
        let b = pool.add(OwnerId(2), translation(2.0)).unwrap();
        let c = pool.add(OwnerId(3), translation(3.0)).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.transform(a), Some(&translation(1.0)));
        assert_eq!(pool.transform(b), Some(&translation(2.0)));
        assert_eq!(pool.owner(b), Some(OwnerId(2)));
    }

    #[test]
    fn test_min_empty_index_monotonic_across_adds() {
        let mut pool = pool(4);
        let mut last = pool.min_empty_index();
        let mut generation = pool.generation();
        for i in 0..40 {
            pool.add(OwnerId(i), translation(0.0)).unwrap();
            if pool.generation() == generation {
                assert!(pool.min_empty_index() >= last);
            }
            generation = pool.generation();
            last = pool.min_empty_index();
        }
    }

    #[test]
    fn test_remove_reuses_lowest_slot() {
        let mut pool = pool(8);
        for i in 0..5 {
            pool.add(OwnerId(i), translation(i as f32)).unwrap();
        }
        pool.remove(3).unwrap();
        pool.remove(1).unwrap();
        assert_eq!(pool.min_empty_index(), 1);
        assert_eq!(pool.add(OwnerId(10), translation(0.0)).unwrap(), 1);
        assert_eq!(pool.add(OwnerId(11), translation(0.0)).unwrap(), 3);
        assert_eq!(pool.add(OwnerId(12), translation(0.0)).unwrap(), 5);
    }

    #[test]
    fn test_remove_max_occupied_rescans() {
        let mut pool = pool(8);
        for i in 0..6 {
            pool.add(OwnerId(i), translation(0.0)).unwrap();
        }
        pool.remove(4).unwrap();
        assert_eq!(pool.max_occupied_index(), Some(5));
        pool.remove(5).unwrap();
        assert_eq!(pool.max_occupied_index(), Some(3));
        for slot in [3, 2, 1, 0] {
            pool.remove(slot).unwrap();
        }
        assert_eq!(pool.max_occupied_index(), None);
        assert!(pool.is_empty());
        assert_eq!(pool.active_range(), 0);
    }

    #[test]
    fn test_remove_unoccupied_is_rejected() {
        let mut pool = pool(4);
        let slot = pool.add(OwnerId(1), translation(0.0)).unwrap();
        assert_eq!(pool.remove(2), Err(PoolError::NotOccupied(2)));
        pool.remove(slot).unwrap();
        assert_eq!(pool.remove(slot), Err(PoolError::NotOccupied(slot)));
        assert!(matches!(pool.remove(99), Err(PoolError::OutOfRange { .. })));
        assert_eq!(pool.count(), 0);
    }

    #[test]
    fn test_rejects_non_finite_transform() {
        let mut pool = pool(4);
        assert_eq!(
            pool.add(OwnerId(1), InstanceTransform::EMPTY),
            Err(PoolError::InvalidTransform)
        );
        let slot = pool.add(OwnerId(1), translation(0.0)).unwrap();
        assert_eq!(
            pool.set(slot, InstanceTransform::TOMBSTONE),
            Err(PoolError::InvalidTransform)
        );
    }

    #[test]
    fn test_tombstones_become_empty_after_upload() {
        let mut pool = pool(4);
        pool.add(OwnerId(1), translation(0.0)).unwrap();
        pool.add(OwnerId(2), translation(0.0)).unwrap();
        pool.finish_upload();
        pool.remove(0).unwrap();
        assert!(pool.slots()[0].is_tombstone());
        assert_eq!(pool.dirty_range(), Some(0..1));
        pool.finish_upload();
        assert!(pool.slots()[0].is_empty());
        assert_eq!(pool.dirty_range(), None);
    }

    #[test]
    fn test_dirty_range_spans_touched_slots() {
        let mut pool = pool(8);
        for i in 0..6 {
            pool.add(OwnerId(i), translation(0.0)).unwrap();
        }
        pool.finish_upload();
        pool.set(4, translation(1.0)).unwrap();
        pool.set(1, translation(1.0)).unwrap();
        assert_eq!(pool.dirty_range(), Some(1..5));
    }

    #[test]
    fn test_count_matches_live_slots_for_random_sequences() {
        let mut rng = Lcg(0x5eed);
        let mut pool = pool(1);
        let mut live: Vec<usize> = Vec::new();
        let mut next_owner = 0;
        for _ in 0..2000 {
            if live.is_empty() || rng.next() % 3 != 0 {
                let slot = pool.add(OwnerId(next_owner), translation(1.0)).unwrap();
                assert!(!live.contains(&slot), "slot {slot} handed out twice");
                live.push(slot);
                next_owner += 1;
            } else {
                let i = (rng.next() as usize) % live.len();
                let slot = live.swap_remove(i);
                pool.remove(slot).unwrap();
            }
            if rng.next() % 7 == 0 {
                pool.finish_upload();
            }
            assert_eq!(pool.count(), live.len());
            assert_eq!(live_slots(&pool), live.len());
            assert_eq!(pool.max_occupied_index(), live.iter().copied().max());
            assert!(pool.capacity().is_power_of_two());
        }
    }
}
