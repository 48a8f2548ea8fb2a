//! Offscreen textures a camera pipeline renders through.

use crate::context::{COLOR_FORMAT, DEPTH_FORMAT};
use crate::culling::HiZPyramid;

/// Format of the WBOIT accumulation target.
pub const ACCUM_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Format of the WBOIT reveal target.
pub const REVEAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// A texture and its default view.
pub struct Attachment {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Attachment {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

/// Color, depth, transparency, post and Hi-Z targets of one camera.
///
/// Every texture has the size of the camera's render target. Recreated as a
/// whole on resize; `generation` then changes so cached bind groups rebuild.
pub struct FrameTargets {
    pub color: Attachment,
    pub depth: Attachment,
    pub accum: Attachment,
    pub reveal: Attachment,
    pub post: [Attachment; 2],
    pub hiz: HiZPyramid,
    width: u32,
    height: u32,
    generation: u64,
}

impl FrameTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, generation: u64) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let sampled = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        let color = |label| Attachment::new(device, label, width, height, COLOR_FORMAT, sampled);
        Self {
            color: color("Scene Color"),
            depth: Attachment::new(device, "Scene Depth", width, height, DEPTH_FORMAT, sampled),
            accum: Attachment::new(device, "WBOIT Accum", width, height, ACCUM_FORMAT, sampled),
            reveal: Attachment::new(device, "WBOIT Reveal", width, height, REVEAL_FORMAT, sampled),
            post: [color("Post Ping"), color("Post Pong")],
            hiz: HiZPyramid::new(device, width, height),
            width,
            height,
            generation,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn destroy(&self) {
        self.color.destroy();
        self.depth.destroy();
        self.accum.destroy();
        self.reveal.destroy();
        for post in &self.post {
            post.destroy();
        }
        self.hiz.destroy();
    }
}
