//! GPU resource management.

mod assets;
mod backend;
mod cache;
mod material;
mod mesh;
mod texture;

pub use assets::*;
pub use backend::*;
pub use cache::*;
pub use material::*;
pub use mesh::*;
pub use texture::*;

#[cfg(test)]
pub(crate) use backend::CountingBackend;
