//! Shared GPU resource cache.
//!
//! Every GPU mesh, material and texture is reached through one
//! [`SharedRegistry`] of tagged [`CachedResource`] variants. Referrers pair each
//! [`ResourceCache::acquire`] with exactly one [`ResourceCache::release`].

use std::sync::Arc;

use vela_core::{BoundingBox, Handle, MaterialClass, MaterialId, MeshId, SharedRegistry};

use super::assets::{AssetSource, AssetState};
use super::backend::{ResourceBackend, WgpuBackend};
use super::material::{BlendMode, MaterialData};
use super::texture::{rgba_len, TextureKey};
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};

/// Content identity of a cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Mesh(MeshId),
    Material(MaterialId),
    Texture(TextureKey),
}

/// Kind tag of a cached resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Mesh,
    Material,
    Texture,
}

impl ResourceKey {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceKey::Mesh(_) => ResourceKind::Mesh,
            ResourceKey::Material(_) => ResourceKind::Material,
            ResourceKey::Texture(_) => ResourceKind::Texture,
        }
    }
}

/// A cached resource.
pub enum CachedResource<B: ResourceBackend> {
    Mesh {
        mesh: B::Mesh,
        bounds: BoundingBox,
    },
    Material {
        material: B::Material,
        class: MaterialClass,
        blend: BlendMode,
        /// Reference this material holds on its texture
        texture: Option<ResourceHandle<B>>,
    },
    Texture(B::Texture),
}

/// Handle to a cached resource.
pub type ResourceHandle<B = WgpuBackend> = Handle<CachedResource<B>>;

/// Outcome of [`ResourceCache::acquire`].
pub enum Acquired<B: ResourceBackend = WgpuBackend> {
    Ready(ResourceHandle<B>),
    /// The asset (or one it depends on) is still loading. No reference was taken.
    Pending,
}

impl<B: ResourceBackend> Clone for Acquired<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ResourceBackend> Copy for Acquired<B> {}

impl<B: ResourceBackend> PartialEq for Acquired<B> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Acquired::Ready(a), Acquired::Ready(b)) => a == b,
            (Acquired::Pending, Acquired::Pending) => true,
            _ => false,
        }
    }
}

impl<B: ResourceBackend> Eq for Acquired<B> {}

impl<B: ResourceBackend> std::fmt::Debug for Acquired<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquired::Ready(handle) => f.debug_tuple("Ready").field(handle).finish(),
            Acquired::Pending => f.write_str("Pending"),
        }
    }
}

/// Number of live resources per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveCounts {
    pub meshes: usize,
    pub materials: usize,
    pub textures: usize,
}

impl LiveCounts {
    pub fn from_kinds(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        let mut counts = Self::default();
        for kind in kinds {
            match kind {
                ResourceKind::Mesh => counts.meshes += 1,
                ResourceKind::Material => counts.materials += 1,
                ResourceKind::Texture => counts.textures += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.meshes + self.materials + self.textures
    }
}

/// Reference-counted cache of GPU resources.
pub struct ResourceCache<B: ResourceBackend = WgpuBackend> {
    registry: SharedRegistry<ResourceKey, CachedResource<B>>,
    backend: B,
}

impl ResourceCache {
    pub fn new(ctx: Arc<RenderContext>) -> Self {
        Self::with_backend(WgpuBackend::new(ctx))
    }
}

impl<B: ResourceBackend> ResourceCache<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            registry: SharedRegistry::new("gpu-resources"),
            backend,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns true while `key`, or a texture its material samples, is still
    /// loading and not cached yet. Takes no reference and uploads nothing.
    pub fn is_loading(&self, assets: &dyn AssetSource, key: &ResourceKey) -> bool {
        if self.registry.find(key).is_some() {
            return false;
        }
        match key {
            ResourceKey::Mesh(id) => matches!(assets.mesh(*id), AssetState::Pending),
            ResourceKey::Texture(TextureKey::Asset(id)) => matches!(assets.texture(*id), AssetState::Pending),
            ResourceKey::Texture(TextureKey::Pixels { .. }) => false,
            ResourceKey::Material(id) => match assets.material(*id) {
                AssetState::Pending => true,
                AssetState::Ready(data) => data
                    .texture
                    .as_ref()
                    .is_some_and(|texture| self.is_loading(assets, &ResourceKey::Texture(texture.clone()))),
                AssetState::Missing => false,
            },
        }
    }

    /// Takes a reference to the resource for `key`, uploading it on first use.
    pub fn acquire(&mut self, assets: &dyn AssetSource, key: &ResourceKey) -> RenderResult<Acquired<B>> {
        if let Some(handle) = self.registry.find(key) {
            self.registry.retain(handle)?;
            return Ok(Acquired::Ready(handle));
        }

        let resource = match key {
            ResourceKey::Mesh(id) => match assets.mesh(*id) {
                AssetState::Pending => return Ok(Acquired::Pending),
                AssetState::Missing => return Err(RenderError::MissingAsset(format!("mesh {}", id.0))),
                AssetState::Ready(data) => {
                    if data.indices.is_empty() {
                        return Err(RenderError::MissingAsset(format!("mesh {} has no indices", id.0)));
                    }
                    CachedResource::Mesh {
                        mesh: self.backend.upload_mesh(&data),
                        bounds: data.bounds,
                    }
                }
            },
            ResourceKey::Texture(TextureKey::Asset(id)) => match assets.texture(*id) {
                AssetState::Pending => return Ok(Acquired::Pending),
                AssetState::Missing => return Err(RenderError::MissingAsset(format!("texture {id}"))),
                AssetState::Ready(data) => {
                    if !data.is_valid() {
                        return Err(RenderError::MissingAsset(format!("texture {id} is malformed")));
                    }
                    let texture = self
                        .backend
                        .upload_texture("Texture", data.width, data.height, &data.rgba);
                    CachedResource::Texture(texture)
                }
            },
            ResourceKey::Texture(TextureKey::Pixels { bytes, width, height }) => {
                if *width == 0 || *height == 0 || rgba_len(*width, *height) != Some(bytes.bytes().len()) {
                    return Err(RenderError::MissingAsset(format!(
                        "pixel buffer does not match {width}x{height}"
                    )));
                }
                let texture = self
                    .backend
                    .upload_texture("Pixel Texture", *width, *height, bytes.bytes());
                CachedResource::Texture(texture)
            }
            ResourceKey::Material(id) => match assets.material(*id) {
                AssetState::Pending => return Ok(Acquired::Pending),
                AssetState::Missing => {
                    return Err(RenderError::MissingAsset(format!("material {}", id.0)));
                }
                AssetState::Ready(data) => match self.create_material(assets, &data)? {
                    Some(material) => material,
                    None => return Ok(Acquired::Pending),
                },
            },
        };

        let handle = self
            .registry
            .acquire(key, |_| Ok(resource))
            .unwrap_or_else(|never: std::convert::Infallible| match never {});
        tracing::debug!(kind = ?key.kind(), "Uploaded shared GPU resource");
        Ok(Acquired::Ready(handle))
    }

    /// Drops one reference; destroys the resource when it was the last one.
    pub fn release(&mut self, handle: ResourceHandle<B>) -> RenderResult<()> {
        match self.registry.release(handle) {
            Ok(Some(resource)) => self.destroy(resource),
            Ok(None) => Ok(()),
            Err(err) => {
                tracing::error!(error = %err, "Resource released more often than acquired");
                Err(err.into())
            }
        }
    }

    pub fn mesh(&self, handle: ResourceHandle<B>) -> Option<&B::Mesh> {
        match self.registry.get(handle)? {
            CachedResource::Mesh { mesh, .. } => Some(mesh),
            _ => None,
        }
    }

    pub fn mesh_bounds(&self, handle: ResourceHandle<B>) -> Option<BoundingBox> {
        match self.registry.get(handle)? {
            CachedResource::Mesh { bounds, .. } => Some(*bounds),
            _ => None,
        }
    }

    pub fn material(&self, handle: ResourceHandle<B>) -> Option<&B::Material> {
        match self.registry.get(handle)? {
            CachedResource::Material { material, .. } => Some(material),
            _ => None,
        }
    }

    pub fn material_class(&self, handle: ResourceHandle<B>) -> Option<MaterialClass> {
        match self.registry.get(handle)? {
            CachedResource::Material { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub fn material_blend(&self, handle: ResourceHandle<B>) -> Option<BlendMode> {
        match self.registry.get(handle)? {
            CachedResource::Material { blend, .. } => Some(*blend),
            _ => None,
        }
    }

    /// Texture a material samples, if it has its own.
    pub fn material_texture(&self, handle: ResourceHandle<B>) -> Option<ResourceHandle<B>> {
        match self.registry.get(handle)? {
            CachedResource::Material { texture, .. } => *texture,
            _ => None,
        }
    }

    pub fn texture(&self, handle: ResourceHandle<B>) -> Option<&B::Texture> {
        match self.registry.get(handle)? {
            CachedResource::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    /// Live handle for `key` without taking a reference.
    pub fn find(&self, key: &ResourceKey) -> Option<ResourceHandle<B>> {
        self.registry.find(key)
    }

    pub fn ref_count(&self, handle: ResourceHandle<B>) -> Option<u32> {
        self.registry.ref_count(handle)
    }

    pub fn live_counts(&self) -> LiveCounts {
        LiveCounts::from_kinds(self.registry.live().map(|(key, _)| key.kind()))
    }

    /// Destroys everything still cached. Returns what was still referenced.
    pub fn clear(&mut self) -> LiveCounts {
        let leaked = self.live_counts();
        if leaked.total() > 0 {
            tracing::warn!(
                meshes = leaked.meshes,
                materials = leaked.materials,
                textures = leaked.textures,
                "GPU resources still referenced at teardown"
            );
        }
        for resource in self.registry.drain_all() {
            match resource {
                CachedResource::Mesh { mesh, .. } => self.backend.destroy_mesh(mesh),
                CachedResource::Material { material, .. } => self.backend.destroy_material(material),
                CachedResource::Texture(texture) => self.backend.destroy_texture(texture),
            }
        }
        self.backend.shutdown();
        leaked
    }

    fn destroy(&mut self, resource: CachedResource<B>) -> RenderResult<()> {
        match resource {
            CachedResource::Mesh { mesh, .. } => self.backend.destroy_mesh(mesh),
            CachedResource::Texture(texture) => self.backend.destroy_texture(texture),
            CachedResource::Material { material, texture, .. } => {
                self.backend.destroy_material(material);
                // The texture is shared; only this material's reference goes.
                if let Some(texture) = texture {
                    self.release(texture)?;
                }
            }
        }
        tracing::debug!("Destroyed shared GPU resource");
        Ok(())
    }

    fn create_material(
        &mut self,
        assets: &dyn AssetSource,
        data: &MaterialData,
    ) -> RenderResult<Option<CachedResource<B>>> {
        let texture = match &data.texture {
            Some(key) => match self.acquire(assets, &ResourceKey::Texture(key.clone()))? {
                Acquired::Ready(handle) => Some(handle),
                Acquired::Pending => return Ok(None),
            },
            None => None,
        };

        let gpu_texture = texture.and_then(|h| match self.registry.get(h) {
            Some(CachedResource::Texture(texture)) => Some(texture),
            _ => None,
        });
        let material = self.backend.create_material(data, gpu_texture);
        Ok(Some(CachedResource::Material {
            material,
            class: data.class,
            blend: data.blend,
            texture,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AssetStore, CountingBackend, MeshData, TextureData};

    const BRICK: u64 = 5;

    fn counting_cache() -> ResourceCache<CountingBackend> {
        ResourceCache::with_backend(CountingBackend::default())
    }

    fn ready(
        cache: &mut ResourceCache<CountingBackend>,
        assets: &AssetStore,
        key: ResourceKey,
    ) -> ResourceHandle<CountingBackend> {
        match cache.acquire(assets, &key).unwrap() {
            Acquired::Ready(handle) => handle,
            Acquired::Pending => panic!("{key:?} is still pending"),
        }
    }

    fn textured_materials() -> AssetStore {
        let assets = AssetStore::new();
        assets.insert_texture(BRICK, TextureData::solid([200, 80, 60, 255]));
        for id in [1, 2] {
            assets.insert_material(
                MaterialId(id),
                MaterialData::opaque([1.0; 4]).with_texture(TextureKey::Asset(BRICK)),
            );
        }
        assets
    }

    #[test]
    fn test_live_counts_by_kind() {
        let keys = [
            ResourceKey::Mesh(MeshId(1)),
            ResourceKey::Mesh(MeshId(2)),
            ResourceKey::Material(MaterialId(1)),
            ResourceKey::Texture(TextureKey::Asset(3)),
        ];
        let counts = LiveCounts::from_kinds(keys.iter().map(ResourceKey::kind));
        assert_eq!(
            counts,
            LiveCounts {
                meshes: 2,
                materials: 1,
                textures: 1
            }
        );
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_texture_lives_until_last_material_goes() {
        let assets = textured_materials();
        let mut cache = counting_cache();
        let first = ready(&mut cache, &assets, ResourceKey::Material(MaterialId(1)));
        let second = ready(&mut cache, &assets, ResourceKey::Material(MaterialId(2)));

        let texture = cache.find(&ResourceKey::Texture(TextureKey::Asset(BRICK))).unwrap();
        assert_eq!(cache.material_texture(first), Some(texture));
        assert_eq!(cache.material_texture(second), Some(texture));
        assert_eq!(cache.ref_count(texture), Some(2));
        assert_eq!(cache.backend().uploaded.textures, 1);

        cache.release(first).unwrap();
        assert_eq!(cache.ref_count(texture), Some(1));
        assert_eq!(cache.texture(texture), Some(&(1, 1)));
        assert_eq!(cache.backend().destroyed.textures, 0);

        cache.release(second).unwrap();
        assert_eq!(cache.ref_count(texture), None);
        assert_eq!(cache.backend().destroyed.materials, 2);
        assert_eq!(cache.backend().destroyed.textures, 1);
        assert_eq!(cache.live_counts().total(), 0);
    }

    #[test]
    fn test_stale_release_is_rejected_without_side_effects() {
        let assets = AssetStore::new();
        assets.insert_mesh(MeshId(1), MeshData::quad(1.0));
        assets.insert_mesh(MeshId(2), MeshData::cube(1.0));
        let mut cache = counting_cache();

        let old = ready(&mut cache, &assets, ResourceKey::Mesh(MeshId(1)));
        cache.release(old).unwrap();
        // The freed slot is reused under a new generation.
        let live = ready(&mut cache, &assets, ResourceKey::Mesh(MeshId(2)));
        assert_eq!(live.index(), old.index());

        assert!(matches!(cache.release(old), Err(RenderError::Resource(_))));
        assert_eq!(cache.ref_count(live), Some(1));
        assert_eq!(cache.backend().destroyed.meshes, 1);
        assert_eq!(cache.live_counts().meshes, 1);

        cache.release(live).unwrap();
        assert!(cache.release(live).is_err());
        assert_eq!(cache.backend().destroyed.meshes, 2);
    }

    #[test]
    fn test_pending_texture_holds_back_material() {
        let assets = textured_materials();
        assets.mark_texture_pending(BRICK);
        let mut cache = counting_cache();
        let key = ResourceKey::Material(MaterialId(1));

        assert!(cache.is_loading(&assets, &key));
        assert_eq!(cache.acquire(&assets, &key).unwrap(), Acquired::Pending);
        assert_eq!(cache.backend().uploaded, LiveCounts::default());

        assets.insert_texture(BRICK, TextureData::solid([1, 2, 3, 4]));
        assert!(!cache.is_loading(&assets, &key));
        let material = ready(&mut cache, &assets, key);
        assert_eq!(cache.material_class(material), Some(MaterialClass::Opaque));
        assert_eq!(
            cache.live_counts(),
            LiveCounts {
                meshes: 0,
                materials: 1,
                textures: 1
            }
        );
    }

    #[test]
    fn test_oversized_pixel_key_is_rejected() {
        let mut cache = counting_cache();
        let key = ResourceKey::Texture(TextureKey::Pixels {
            bytes: vela_core::SharedBytes::new(Vec::new()),
            width: 65_536,
            height: 65_536,
        });
        assert!(matches!(
            cache.acquire(&AssetStore::new(), &key),
            Err(RenderError::MissingAsset(_))
        ));
        assert_eq!(cache.backend().uploaded.textures, 0);
    }

    #[test]
    fn test_clear_reports_leaks_and_shuts_backend_down() {
        let assets = textured_materials();
        let mut cache = counting_cache();
        ready(&mut cache, &assets, ResourceKey::Material(MaterialId(1)));
        let leaked = cache.clear();
        assert_eq!(leaked.materials, 1);
        assert_eq!(leaked.textures, 1);
        assert!(cache.backend().shut_down);
        assert_eq!(cache.live_counts().total(), 0);
    }
}
