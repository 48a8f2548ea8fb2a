//! Per-pool visibility results of one frame.

use std::collections::HashMap;

use vela_core::PoolKey;

/// Survivor count of a pool as far as the CPU knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibleCount {
    /// No matching readback yet; the pool is drawn indirect and the GPU
    /// decides.
    #[default]
    Unknown,
    Known(u32),
}

impl VisibleCount {
    /// Returns true if the pool is known to have no survivors.
    pub fn is_culled(&self) -> bool {
        matches!(self, VisibleCount::Known(0))
    }
}

/// Culling phase a pool went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullPhase {
    /// Frustum only, for occluders.
    Frustum,
    /// Frustum and hierarchical depth, for non-occluders.
    Occlusion,
}

/// Visibility result of one pool for one camera and frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityQuery {
    pub pool: PoolKey,
    pub phase: CullPhase,
    /// Pool revision the cull ran against.
    pub revision: u64,
    pub visible: VisibleCount,
}

/// Visibility of every pool culled for the current frame.
#[derive(Debug, Default)]
pub struct VisibilityTable {
    queries: HashMap<PoolKey, VisibilityQuery>,
}

impl VisibilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.queries.clear();
    }

    pub fn insert(&mut self, query: VisibilityQuery) {
        self.queries.insert(query.pool, query);
    }

    pub fn get(&self, pool: &PoolKey) -> Option<&VisibilityQuery> {
        self.queries.get(pool)
    }

    /// Visible count of a pool; pools not culled yet are `Unknown`.
    pub fn visible(&self, pool: &PoolKey) -> VisibleCount {
        self.queries.get(pool).map_or(VisibleCount::Unknown, |q| q.visible)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Sum of known survivor counts.
    pub fn known_visible(&self) -> u64 {
        self.queries
            .values()
            .filter_map(|q| match q.visible {
                VisibleCount::Known(n) => Some(n as u64),
                VisibleCount::Unknown => None,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::{MaterialId, MeshId};

    fn key(n: u64) -> PoolKey {
        PoolKey::new(MeshId(n), MaterialId(0))
    }

    #[test]
    fn test_only_known_zero_is_culled() {
        assert!(VisibleCount::Known(0).is_culled());
        assert!(!VisibleCount::Known(3).is_culled());
        assert!(!VisibleCount::Unknown.is_culled());
    }

    #[test]
    fn test_table_defaults_to_unknown() {
        let mut table = VisibilityTable::new();
        assert_eq!(table.visible(&key(1)), VisibleCount::Unknown);
        table.insert(VisibilityQuery {
            pool: key(1),
            phase: CullPhase::Frustum,
            revision: 4,
            visible: VisibleCount::Known(7),
        });
        table.insert(VisibilityQuery {
            pool: key(2),
            phase: CullPhase::Occlusion,
            revision: 1,
            visible: VisibleCount::Unknown,
        });
        assert_eq!(table.visible(&key(1)), VisibleCount::Known(7));
        assert_eq!(table.known_visible(), 7);
        assert_eq!(table.len(), 2);
    }
}
