//! Instance pools keyed by mesh and material.
//!
//! - [`InstancePool`]: growable slot array with sentinel-encoded free slots
//! - [`InstanceRegistry`]: owner lookup and pool ownership for a whole scene

mod pool;
mod registry;

pub use pool::*;
pub use registry::*;

use serde::{Deserialize, Serialize};

/// Identifier of the scene entity that owns an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

/// Identity of a mesh asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub u64);

/// Identity of a material asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

/// Key of an instance pool: one pool per mesh and material pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    pub mesh: MeshId,
    pub material: MaterialId,
}

impl PoolKey {
    pub fn new(mesh: MeshId, material: MaterialId) -> Self {
        Self { mesh, material }
    }
}

/// Which culling phase a pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VisibilityGroup {
    /// Rendered first to seed the hierarchical depth buffer.
    Occluder,
    /// Culled against the hierarchical depth buffer.
    #[default]
    NonOccluder,
}

/// Shading class of a material, used by pass predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MaterialClass {
    /// Fully opaque surfaces.
    #[default]
    Opaque,
    /// Opaque surfaces with alpha-tested holes.
    Cutoff,
    /// Additive or multiplicative blending, drawn unsorted.
    Blended,
    /// Weighted order-independent transparency.
    Transparent,
}

impl MaterialClass {
    /// Returns true if surfaces of this class write depth.
    pub fn writes_depth(&self) -> bool {
        matches!(self, MaterialClass::Opaque | MaterialClass::Cutoff)
    }
}
