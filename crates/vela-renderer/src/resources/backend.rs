//! Creation and destruction of the GPU objects behind cached resources.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::material::{GpuMaterial, MaterialData};
use super::mesh::{GpuMesh, MeshData};
use super::texture::GpuTexture;
use crate::context::RenderContext;
#[cfg(test)]
use super::cache::LiveCounts;
#[cfg(test)]
use vela_core::MaterialClass;

/// Builds and frees the objects a [`super::ResourceCache`] hands out.
///
/// The cache owns the reference counts and the material → texture links;
/// a backend only turns decoded data into device objects and back.
pub trait ResourceBackend {
    type Mesh;
    type Material;
    type Texture;

    fn upload_mesh(&mut self, data: &MeshData) -> Self::Mesh;

    /// `rgba` holds exactly `width * height * 4` bytes.
    fn upload_texture(&mut self, label: &str, width: u32, height: u32, rgba: &[u8]) -> Self::Texture;

    /// Untextured materials get `None` and sample the backend's default texture.
    fn create_material(&mut self, data: &MaterialData, texture: Option<&Self::Texture>) -> Self::Material;

    fn destroy_mesh(&mut self, mesh: Self::Mesh);
    fn destroy_material(&mut self, material: Self::Material);
    fn destroy_texture(&mut self, texture: Self::Texture);

    /// Frees objects the backend itself owns. Called once at teardown.
    fn shutdown(&mut self) {}
}

/// The wgpu device backend.
pub struct WgpuBackend {
    ctx: Arc<RenderContext>,
    default_texture: GpuTexture,
}

impl WgpuBackend {
    pub fn new(ctx: Arc<RenderContext>) -> Self {
        let default_texture = GpuTexture::white(ctx.device(), ctx.queue());
        Self { ctx, default_texture }
    }

    /// The 1×1 white texture used by untextured materials.
    pub fn default_texture(&self) -> &GpuTexture {
        &self.default_texture
    }
}

impl ResourceBackend for WgpuBackend {
    type Mesh = GpuMesh;
    type Material = GpuMaterial;
    type Texture = GpuTexture;

    fn upload_mesh(&mut self, data: &MeshData) -> GpuMesh {
        GpuMesh::upload(self.ctx.device(), "Mesh", data)
    }

    fn upload_texture(&mut self, label: &str, width: u32, height: u32, rgba: &[u8]) -> GpuTexture {
        GpuTexture::upload(self.ctx.device(), self.ctx.queue(), label, width, height, rgba)
    }

    fn create_material(&mut self, data: &MaterialData, texture: Option<&GpuTexture>) -> GpuMaterial {
        let view = &texture.unwrap_or(&self.default_texture).view;
        let device = self.ctx.device();

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Material Uniform Buffer"),
            contents: bytemuck::cast_slice(&[data.uniform()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Bind Group"),
            layout: self.ctx.material_bind_group_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.ctx.sampler()),
                },
            ],
        });

        GpuMaterial {
            uniform_buffer,
            bind_group,
            class: data.class,
            blend: data.blend,
        }
    }

    fn destroy_mesh(&mut self, mesh: GpuMesh) {
        mesh.destroy();
    }

    fn destroy_material(&mut self, material: GpuMaterial) {
        material.destroy();
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        texture.destroy();
    }

    fn shutdown(&mut self) {
        self.default_texture.destroy();
    }
}

/// Backend without a device that counts what it was asked to do.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CountingBackend {
    pub uploaded: LiveCounts,
    pub destroyed: LiveCounts,
    pub shut_down: bool,
}

#[cfg(test)]
impl ResourceBackend for CountingBackend {
    type Mesh = ();
    type Material = MaterialClass;
    type Texture = (u32, u32);

    fn upload_mesh(&mut self, _data: &MeshData) {
        self.uploaded.meshes += 1;
    }

    fn upload_texture(&mut self, _label: &str, width: u32, height: u32, _rgba: &[u8]) -> (u32, u32) {
        self.uploaded.textures += 1;
        (width, height)
    }

    fn create_material(&mut self, data: &MaterialData, _texture: Option<&(u32, u32)>) -> MaterialClass {
        self.uploaded.materials += 1;
        data.class
    }

    fn destroy_mesh(&mut self, _mesh: ()) {
        self.destroyed.meshes += 1;
    }

    fn destroy_material(&mut self, _material: MaterialClass) {
        self.destroyed.materials += 1;
    }

    fn destroy_texture(&mut self, _texture: (u32, u32)) {
        self.destroyed.textures += 1;
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }
}
