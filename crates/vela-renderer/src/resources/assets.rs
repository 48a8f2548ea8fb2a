//! Asset collaborator interface.
//!
//! Decoding meshes, materials and images happens elsewhere. The renderer only
//! asks an [`AssetSource`] whether an asset is ready yet.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use vela_core::{MaterialId, MeshId};

use super::material::MaterialData;
use super::mesh::MeshData;
use super::texture::TextureData;

/// Load state of an asset.
#[derive(Debug)]
pub enum AssetState<T> {
    /// Still loading; ask again later.
    Pending,
    Ready(Arc<T>),
    /// Unknown or failed to load.
    Missing,
}

impl<T> Clone for AssetState<T> {
    fn clone(&self) -> Self {
        match self {
            AssetState::Pending => AssetState::Pending,
            AssetState::Ready(data) => AssetState::Ready(Arc::clone(data)),
            AssetState::Missing => AssetState::Missing,
        }
    }
}

/// Source of decoded asset data.
pub trait AssetSource: Send {
    fn mesh(&self, id: MeshId) -> AssetState<MeshData>;
    fn material(&self, id: MaterialId) -> AssetState<MaterialData>;
    fn texture(&self, id: u64) -> AssetState<TextureData>;
}

#[derive(Default)]
struct Entries {
    meshes: HashMap<MeshId, AssetState<MeshData>>,
    materials: HashMap<MaterialId, AssetState<MaterialData>>,
    textures: HashMap<u64, AssetState<TextureData>>,
}

/// In-memory asset store shared between a loader and the renderer.
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct AssetStore {
    entries: Arc<RwLock<Entries>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_mesh(&self, id: MeshId, data: MeshData) {
        self.entries.write().meshes.insert(id, AssetState::Ready(Arc::new(data)));
    }

    pub fn insert_material(&self, id: MaterialId, data: MaterialData) {
        self.entries
            .write()
            .materials
            .insert(id, AssetState::Ready(Arc::new(data)));
    }

    pub fn insert_texture(&self, id: u64, data: TextureData) {
        self.entries
            .write()
            .textures
            .insert(id, AssetState::Ready(Arc::new(data)));
    }

    /// Announces a mesh that is still loading.
    pub fn mark_mesh_pending(&self, id: MeshId) {
        self.entries.write().meshes.insert(id, AssetState::Pending);
    }

    /// Announces a texture that is still loading.
    pub fn mark_texture_pending(&self, id: u64) {
        self.entries.write().textures.insert(id, AssetState::Pending);
    }

    /// Announces a material that is still loading.
    pub fn mark_material_pending(&self, id: MaterialId) {
        self.entries.write().materials.insert(id, AssetState::Pending);
    }
}

impl AssetSource for AssetStore {
    fn mesh(&self, id: MeshId) -> AssetState<MeshData> {
        self.entries
            .read()
            .meshes
            .get(&id)
            .cloned()
            .unwrap_or(AssetState::Missing)
    }

    fn material(&self, id: MaterialId) -> AssetState<MaterialData> {
        self.entries
            .read()
            .materials
            .get(&id)
            .cloned()
            .unwrap_or(AssetState::Missing)
    }

    fn texture(&self, id: u64) -> AssetState<TextureData> {
        self.entries
            .read()
            .textures
            .get(&id)
            .cloned()
            .unwrap_or(AssetState::Missing)
    }
}
