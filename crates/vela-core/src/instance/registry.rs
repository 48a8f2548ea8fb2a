//! Scene-wide instance bookkeeping.

use std::collections::{BTreeMap, HashMap};

use super::{InstancePool, InstanceTransform, OwnerId, PoolDescriptor, PoolError, PoolKey, PoolResult};

/// Where an owner's instance currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceLocation {
    pub pool: PoolKey,
    pub slot: usize,
}

/// All instance pools of a scene plus the owner → slot index.
///
/// Pools are kept in key order so that pass iteration is deterministic.
pub struct InstanceRegistry {
    pools: BTreeMap<PoolKey, InstancePool>,
    owners: HashMap<OwnerId, InstanceLocation>,
    initial_capacity: usize,
}

impl InstanceRegistry {
    /// Creates an empty registry whose new pools start at `initial_capacity`.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            pools: BTreeMap::new(),
            owners: HashMap::new(),
            initial_capacity: initial_capacity.max(1),
        }
    }

    /// Returns the pool for a descriptor, creating it on first use.
    pub fn ensure_pool(&mut self, desc: PoolDescriptor) -> &mut InstancePool {
        let capacity = self.initial_capacity;
        self.pools.entry(desc.key).or_insert_with(|| {
            tracing::debug!(pool = ?desc.key, capacity, "Created instance pool");
            InstancePool::new(desc, capacity)
        })
    }

    /// Adds an instance for `owner` to the pool described by `desc`.
    pub fn add_instance(
        &mut self,
        owner: OwnerId,
        desc: PoolDescriptor,
        transform: InstanceTransform,
    ) -> PoolResult<InstanceLocation> {
        if self.owners.contains_key(&owner) {
            return Err(PoolError::DuplicateOwner(owner));
        }
        // The group decides the culling phase of the whole pool.
        if let Some(pool) = self.pools.get(&desc.key)
            && pool.descriptor().group != desc.group
        {
            return Err(PoolError::GroupMismatch {
                pool: desc.key,
                existing: pool.descriptor().group,
                requested: desc.group,
            });
        }
        let slot = self.ensure_pool(desc).add(owner, transform)?;
        let location = InstanceLocation {
            pool: desc.key,
            slot,
        };
        self.owners.insert(owner, location);
        Ok(location)
    }

    /// Removes the instance held by `owner`.
    pub fn remove_instance(&mut self, owner: OwnerId) -> PoolResult<InstanceLocation> {
        let location = *self
            .owners
            .get(&owner)
            .ok_or(PoolError::UnknownOwner(owner))?;
        let pool = self
            .pools
            .get_mut(&location.pool)
            .ok_or(PoolError::UnknownPool(location.pool))?;
        pool.remove(location.slot)?;
        self.owners.remove(&owner);
        Ok(location)
    }

    /// Updates the world transform of `owner`'s instance.
    pub fn set_transform(&mut self, owner: OwnerId, transform: InstanceTransform) -> PoolResult<()> {
        let location = *self
            .owners
            .get(&owner)
            .ok_or(PoolError::UnknownOwner(owner))?;
        self.pools
            .get_mut(&location.pool)
            .ok_or(PoolError::UnknownPool(location.pool))?
            .set(location.slot, transform)
    }

    pub fn location(&self, owner: OwnerId) -> Option<InstanceLocation> {
        self.owners.get(&owner).copied()
    }

    pub fn pool(&self, key: &PoolKey) -> Option<&InstancePool> {
        self.pools.get(key)
    }

    pub fn pool_mut(&mut self, key: &PoolKey) -> Option<&mut InstancePool> {
        self.pools.get_mut(key)
    }

    /// Pools in key order.
    pub fn pools(&self) -> impl Iterator<Item = &InstancePool> {
        self.pools.values()
    }

    pub fn pools_mut(&mut self) -> impl Iterator<Item = &mut InstancePool> {
        self.pools.values_mut()
    }

    /// Number of pools.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Total number of live instances across all pools.
    pub fn instance_count(&self) -> usize {
        self.owners.len()
    }

    /// Drops pools with no live instances and returns their keys.
    pub fn remove_empty_pools(&mut self) -> Vec<PoolKey> {
        let empty: Vec<PoolKey> = self
            .pools
            .iter()
            .filter(|(_, p)| p.is_empty())
            .map(|(k, _)| *k)
            .collect();
        for key in &empty {
            self.pools.remove(key);
        }
        empty
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::BoundingBox;
    use crate::instance::{MaterialClass, MaterialId, MeshId, VisibilityGroup};

    fn desc(mesh: u64) -> PoolDescriptor {
        PoolDescriptor {
            key: PoolKey::new(MeshId(mesh), MaterialId(1)),
            group: VisibilityGroup::Occluder,
            material_class: MaterialClass::Opaque,
            bounds: BoundingBox::default(),
        }
    }

    #[test]
    fn test_add_and_lookup() {
        let mut registry = InstanceRegistry::new(2);
        let a = registry
            .add_instance(OwnerId(1), desc(1), InstanceTransform::IDENTITY)
            .unwrap();
        let b = registry
            .add_instance(OwnerId(2), desc(2), InstanceTransform::IDENTITY)
            .unwrap();
        assert_ne!(a.pool, b.pool);
        assert_eq!(registry.location(OwnerId(1)), Some(a));
        assert_eq!(registry.pool_count(), 2);
        assert_eq!(registry.instance_count(), 2);
    }

    #[test]
    fn test_duplicate_owner_rejected() {
        let mut registry = InstanceRegistry::new(2);
        registry
            .add_instance(OwnerId(1), desc(1), InstanceTransform::IDENTITY)
            .unwrap();
        assert_eq!(
            registry.add_instance(OwnerId(1), desc(1), InstanceTransform::IDENTITY),
            Err(PoolError::DuplicateOwner(OwnerId(1)))
        );
    }

    #[test]
    fn test_remove_and_unknown_owner() {
        let mut registry = InstanceRegistry::new(2);
        registry
            .add_instance(OwnerId(1), desc(1), InstanceTransform::IDENTITY)
            .unwrap();
        registry.remove_instance(OwnerId(1)).unwrap();
        assert_eq!(
            registry.remove_instance(OwnerId(1)),
            Err(PoolError::UnknownOwner(OwnerId(1)))
        );
        assert_eq!(
            registry.set_transform(OwnerId(1), InstanceTransform::IDENTITY),
            Err(PoolError::UnknownOwner(OwnerId(1)))
        );
        assert_eq!(registry.remove_empty_pools(), vec![desc(1).key]);
        assert_eq!(registry.pool_count(), 0);
    }

    #[test]
    fn test_group_is_fixed_by_first_add() {
        let mut registry = InstanceRegistry::new(2);
        registry
            .add_instance(OwnerId(1), desc(1), InstanceTransform::IDENTITY)
            .unwrap();
        let other_group = PoolDescriptor {
            group: VisibilityGroup::NonOccluder,
            ..desc(1)
        };
        assert_eq!(
            registry.add_instance(OwnerId(2), other_group, InstanceTransform::IDENTITY),
            Err(PoolError::GroupMismatch {
                pool: desc(1).key,
                existing: VisibilityGroup::Occluder,
                requested: VisibilityGroup::NonOccluder,
            })
        );
        assert_eq!(registry.location(OwnerId(2)), None);
        assert_eq!(registry.pool(&desc(1).key).unwrap().count(), 1);
    }

    #[test]
    fn test_set_transform_updates_slot() {
        let mut registry = InstanceRegistry::new(2);
        let loc = registry
            .add_instance(OwnerId(5), desc(1), InstanceTransform::IDENTITY)
            .unwrap();
        let moved = InstanceTransform::from_mat4(&glam::Mat4::from_translation(glam::Vec3::X));
        registry.set_transform(OwnerId(5), moved).unwrap();
        assert_eq!(registry.pool(&loc.pool).unwrap().transform(loc.slot), Some(&moved));
    }
}
