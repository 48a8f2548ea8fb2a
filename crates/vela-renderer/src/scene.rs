//! Instance bookkeeping of the render world.
//!
//! Owns the instance registry, the resource cache and the mesh and material
//! reference every pool holds. Nothing here records GPU commands, so deferred
//! instance commands can be applied against any [`ResourceBackend`].

use std::collections::{HashMap, HashSet};

use vela_core::{
    InstanceRegistry, InstanceTransform, MaterialId, MeshId, OwnerId, PoolDescriptor, PoolKey, PoolResult,
    TaskState, VisibilityGroup,
};

use crate::error::{RenderError, RenderResult};
use crate::resources::{
    Acquired, AssetSource, LiveCounts, ResourceBackend, ResourceCache, ResourceHandle, ResourceKey, WgpuBackend,
};

/// Resources a pool holds one reference to for as long as it exists.
pub struct PoolBinding<B: ResourceBackend = WgpuBackend> {
    pub mesh: ResourceHandle<B>,
    pub material: ResourceHandle<B>,
}

impl<B: ResourceBackend> Clone for PoolBinding<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ResourceBackend> Copy for PoolBinding<B> {}

impl<B: ResourceBackend> PartialEq for PoolBinding<B> {
    fn eq(&self, other: &Self) -> bool {
        self.mesh == other.mesh && self.material == other.material
    }
}

impl<B: ResourceBackend> Eq for PoolBinding<B> {}

impl<B: ResourceBackend> std::fmt::Debug for PoolBinding<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBinding")
            .field("mesh", &self.mesh)
            .field("material", &self.material)
            .finish()
    }
}

/// Context that deferred instance commands run against.
pub trait SceneWorld {
    type Backend: ResourceBackend;

    fn instance_scene(&mut self) -> &mut InstanceScene<Self::Backend>;
}

/// Instances, their pools and the resources those pools reference.
pub struct InstanceScene<B: ResourceBackend = WgpuBackend> {
    pub(crate) registry: InstanceRegistry,
    pub(crate) bindings: HashMap<PoolKey, PoolBinding<B>>,
    pub(crate) cache: ResourceCache<B>,
    assets: Box<dyn AssetSource>,
    pending_owners: HashSet<OwnerId>,
}

impl<B: ResourceBackend> SceneWorld for InstanceScene<B> {
    type Backend = B;

    fn instance_scene(&mut self) -> &mut InstanceScene<B> {
        self
    }
}

impl<B: ResourceBackend> InstanceScene<B> {
    pub fn new(cache: ResourceCache<B>, assets: Box<dyn AssetSource>, initial_pool_capacity: usize) -> Self {
        Self {
            registry: InstanceRegistry::new(initial_pool_capacity),
            bindings: HashMap::new(),
            cache,
            assets,
            pending_owners: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResourceCache<B> {
        &self.cache
    }

    pub fn binding(&self, key: &PoolKey) -> Option<&PoolBinding<B>> {
        self.bindings.get(key)
    }

    /// Returns true while an add for `owner` waits on its assets.
    pub fn is_pending(&self, owner: OwnerId) -> bool {
        self.pending_owners.contains(&owner)
    }

    /// Adds an instance of `mesh` with `material`, acquiring both for its pool
    /// on first use. `Pending` while either asset is still loading.
    pub fn add_instance(
        &mut self,
        owner: OwnerId,
        mesh: MeshId,
        material: MaterialId,
        group: VisibilityGroup,
        transform: InstanceTransform,
    ) -> RenderResult<TaskState> {
        let key = PoolKey::new(mesh, material);
        let binding = match self.bindings.get(&key) {
            Some(binding) => *binding,
            None => match self.bind_pool(key)? {
                Some(binding) => binding,
                None => {
                    self.pending_owners.insert(owner);
                    return Ok(TaskState::Pending);
                }
            },
        };
        self.pending_owners.remove(&owner);

        let (Some(bounds), Some(material_class)) = (
            self.cache.mesh_bounds(binding.mesh),
            self.cache.material_class(binding.material),
        ) else {
            return Err(RenderError::MissingAsset(format!("pool {key:?} lost its resources")));
        };
        let desc = PoolDescriptor {
            key,
            group,
            material_class,
            bounds,
        };
        if let Err(err) = self.registry.add_instance(owner, desc, transform) {
            if self.registry.pool(&key).is_none() {
                self.unbind_pool(&key);
            }
            return Err(err.into());
        }
        Ok(TaskState::Complete)
    }

    fn bind_pool(&mut self, key: PoolKey) -> RenderResult<Option<PoolBinding<B>>> {
        let mesh_key = ResourceKey::Mesh(key.mesh);
        let material_key = ResourceKey::Material(key.material);
        // Nothing is uploaded until both halves can be.
        let assets = self.assets.as_ref();
        if self.cache.is_loading(assets, &mesh_key) || self.cache.is_loading(assets, &material_key) {
            return Ok(None);
        }

        let mesh = match self.cache.acquire(self.assets.as_ref(), &mesh_key)? {
            Acquired::Ready(handle) => handle,
            Acquired::Pending => return Ok(None),
        };
        let material = match self.cache.acquire(self.assets.as_ref(), &material_key) {
            Ok(Acquired::Ready(handle)) => handle,
            Ok(Acquired::Pending) => {
                self.cache.release(mesh)?;
                return Ok(None);
            }
            Err(err) => {
                self.cache.release(mesh)?;
                return Err(err);
            }
        };
        let binding = PoolBinding { mesh, material };
        self.bindings.insert(key, binding);
        Ok(Some(binding))
    }

    fn unbind_pool(&mut self, key: &PoolKey) {
        if let Some(binding) = self.bindings.remove(key) {
            // Errors are logged by the cache.
            let _ = self.cache.release(binding.mesh);
            let _ = self.cache.release(binding.material);
        }
    }

    /// Forgets a pending add, e.g. when the asset turned out to be missing.
    pub fn abandon_pending(&mut self, owner: OwnerId) {
        self.pending_owners.remove(&owner);
    }

    pub fn remove_instance(&mut self, owner: OwnerId) -> PoolResult<()> {
        self.registry.remove_instance(owner).map(|_| ())
    }

    pub fn set_transform(&mut self, owner: OwnerId, transform: InstanceTransform) -> PoolResult<()> {
        self.registry.set_transform(owner, transform)
    }

    /// Drops pools without instances and releases their resources.
    pub fn remove_empty_pools(&mut self) -> Vec<PoolKey> {
        let removed = self.registry.remove_empty_pools();
        for key in &removed {
            self.unbind_pool(key);
        }
        removed
    }

    /// Releases every pool binding, then destroys the cache. Returns what was
    /// still referenced afterwards.
    pub fn shutdown(&mut self) -> LiveCounts {
        for (_, binding) in std::mem::take(&mut self.bindings) {
            let _ = self.cache.release(binding.mesh);
            let _ = self.cache.release(binding.material);
        }
        self.cache.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands;
    use crate::resources::{AssetStore, CountingBackend, MaterialData, MeshData};
    use glam::{Mat4, Vec3};
    use vela_core::DeferredFrameQueue;

    const BOX: MeshId = MeshId(1);
    const GLASS: MaterialId = MaterialId(7);
    const STONE: MaterialId = MaterialId(8);

    fn scene(assets: &AssetStore) -> InstanceScene<CountingBackend> {
        InstanceScene::new(
            ResourceCache::with_backend(CountingBackend::default()),
            Box::new(assets.clone()),
            4,
        )
    }

    fn assets_with_pending_glass() -> AssetStore {
        let assets = AssetStore::new();
        assets.insert_mesh(BOX, MeshData::cube(1.0));
        assets.insert_material(STONE, MaterialData::opaque([0.5; 4]));
        assets.mark_material_pending(GLASS);
        assets
    }

    fn moved(x: f32) -> InstanceTransform {
        InstanceTransform::from_mat4(&Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
    }

    fn stored(scene: &InstanceScene<CountingBackend>, owner: OwnerId) -> Option<InstanceTransform> {
        let location = scene.registry().location(owner)?;
        scene.registry().pool(&location.pool)?.transform(location.slot).copied()
    }

    #[test]
    fn test_pending_add_is_retried_then_transform_follows() {
        let assets = assets_with_pending_glass();
        let mut scene = scene(&assets);
        let mut queue = DeferredFrameQueue::new(100);
        let sender = queue.sender();
        let owner = OwnerId(1);

        sender.enqueue(commands::add_instance(
            owner,
            BOX,
            GLASS,
            VisibilityGroup::NonOccluder,
            InstanceTransform::IDENTITY,
        ));
        sender.enqueue(commands::set_transform(owner, moved(2.0)));

        for _ in 0..3 {
            let report = queue.drain(&mut scene);
            assert_eq!(report.applied, 0);
            assert_eq!(report.retried, 2);
            assert!(scene.is_pending(owner));
            assert_eq!(scene.registry().instance_count(), 0);
        }

        assets.insert_material(GLASS, MaterialData::transparent([0.2, 0.4, 1.0, 0.5]));
        let report = queue.drain(&mut scene);
        assert_eq!(report.applied, 2);
        assert_eq!(report.retried, 0);
        assert!(!scene.is_pending(owner));
        // The transform landed on top of the add, not before it.
        assert_eq!(stored(&scene, owner), Some(moved(2.0)));
    }

    #[test]
    fn test_newer_transform_replaces_pending_one() {
        let assets = assets_with_pending_glass();
        let mut scene = scene(&assets);
        let mut queue = DeferredFrameQueue::new(100);
        let sender = queue.sender();
        let owner = OwnerId(3);

        sender.enqueue(commands::add_instance(
            owner,
            BOX,
            GLASS,
            VisibilityGroup::NonOccluder,
            InstanceTransform::IDENTITY,
        ));
        sender.enqueue(commands::set_transform(owner, moved(1.0)));
        queue.drain(&mut scene);

        sender.enqueue(commands::set_transform(owner, moved(5.0)));
        assets.insert_material(GLASS, MaterialData::transparent([1.0; 4]));
        let report = queue.drain(&mut scene);
        assert_eq!(report.merged, 1);
        assert_eq!(stored(&scene, owner), Some(moved(5.0)));
    }

    #[test]
    fn test_remove_waits_for_pending_add() {
        let assets = assets_with_pending_glass();
        let mut scene = scene(&assets);
        let mut queue = DeferredFrameQueue::new(100);
        let sender = queue.sender();
        let owner = OwnerId(2);

        sender.enqueue(commands::add_instance(
            owner,
            BOX,
            GLASS,
            VisibilityGroup::NonOccluder,
            InstanceTransform::IDENTITY,
        ));
        sender.enqueue(commands::remove_instance(owner));
        assert_eq!(queue.drain(&mut scene).retried, 2);

        assets.insert_material(GLASS, MaterialData::transparent([1.0; 4]));
        let report = queue.drain(&mut scene);
        assert_eq!(report.applied, 2);
        assert_eq!(scene.registry().location(owner), None);
        assert_eq!(scene.registry().pool_count(), 1);

        assert_eq!(scene.remove_empty_pools(), vec![PoolKey::new(BOX, GLASS)]);
        assert_eq!(scene.cache().live_counts(), LiveCounts::default());
    }

    #[test]
    fn test_pending_material_uploads_nothing() {
        let assets = assets_with_pending_glass();
        let mut scene = scene(&assets);
        for _ in 0..5 {
            let state = scene
                .add_instance(OwnerId(1), BOX, GLASS, VisibilityGroup::NonOccluder, InstanceTransform::IDENTITY)
                .unwrap();
            assert_eq!(state, TaskState::Pending);
        }
        let backend = scene.cache().backend();
        assert_eq!(backend.uploaded, LiveCounts::default());
        assert_eq!(backend.destroyed, LiveCounts::default());
    }

    #[test]
    fn test_pool_shares_one_reference_per_resource() {
        let assets = assets_with_pending_glass();
        let mut scene = scene(&assets);
        let mut queue = DeferredFrameQueue::new(100);
        let sender = queue.sender();
        for owner in 0..3 {
            sender.enqueue(commands::add_instance(
                OwnerId(owner),
                BOX,
                STONE,
                VisibilityGroup::Occluder,
                moved(owner as f32),
            ));
        }
        assert_eq!(queue.drain(&mut scene).applied, 3);

        let key = PoolKey::new(BOX, STONE);
        let binding = *scene.binding(&key).unwrap();
        assert_eq!(scene.cache().ref_count(binding.mesh), Some(1));
        assert_eq!(scene.cache().ref_count(binding.material), Some(1));
        assert_eq!(scene.cache().backend().uploaded.meshes, 1);

        for owner in 0..3 {
            sender.enqueue(commands::remove_instance(OwnerId(owner)));
        }
        assert_eq!(queue.drain(&mut scene).applied, 3);
        assert_eq!(scene.remove_empty_pools(), vec![key]);

        assert!(scene.binding(&key).is_none());
        assert_eq!(scene.cache().ref_count(binding.mesh), None);
        assert_eq!(scene.cache().ref_count(binding.material), None);
        assert_eq!(
            scene.cache().backend().destroyed,
            LiveCounts {
                meshes: 1,
                materials: 1,
                textures: 0
            }
        );
        assert_eq!(scene.shutdown(), LiveCounts::default());
    }

    #[test]
    fn test_missing_material_releases_mesh() {
        let assets = assets_with_pending_glass();
        let mut scene = scene(&assets);
        let mut queue = DeferredFrameQueue::new(100);
        queue.sender().enqueue(commands::add_instance(
            OwnerId(9),
            BOX,
            MaterialId(404),
            VisibilityGroup::NonOccluder,
            InstanceTransform::IDENTITY,
        ));
        let report = queue.drain(&mut scene);
        assert_eq!(report.applied, 1);
        assert!(!scene.is_pending(OwnerId(9)));
        assert_eq!(scene.registry().instance_count(), 0);
        assert_eq!(scene.cache().live_counts(), LiveCounts::default());
        let backend = scene.cache().backend();
        assert_eq!(backend.uploaded.meshes, backend.destroyed.meshes);
    }

    #[test]
    fn test_rejected_group_keeps_pool_binding() {
        let assets = assets_with_pending_glass();
        let mut scene = scene(&assets);
        scene
            .add_instance(OwnerId(1), BOX, STONE, VisibilityGroup::Occluder, InstanceTransform::IDENTITY)
            .unwrap();
        let err = scene
            .add_instance(OwnerId(2), BOX, STONE, VisibilityGroup::NonOccluder, InstanceTransform::IDENTITY)
            .unwrap_err();
        assert!(matches!(err, RenderError::Pool(vela_core::PoolError::GroupMismatch { .. })));
        let binding = *scene.binding(&PoolKey::new(BOX, STONE)).unwrap();
        assert_eq!(scene.cache().ref_count(binding.mesh), Some(1));
    }
}
