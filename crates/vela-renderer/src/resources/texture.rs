//! Texture data and its GPU upload.

use vela_core::SharedBytes;

/// Content key of a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TextureKey {
    /// A texture decoded by the asset collaborator.
    Asset(u64),
    /// Raw RGBA8 pixels shared by the caller; equal only for the same allocation.
    Pixels {
        bytes: SharedBytes,
        width: u32,
        height: u32,
    },
}

/// Byte length of a tightly packed RGBA8 image, `None` if it overflows.
pub fn rgba_len(width: u32, height: u32) -> Option<usize> {
    (width as usize).checked_mul(height as usize)?.checked_mul(4)
}

/// Decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    /// Single-color 1×1 image.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: rgba.to_vec(),
        }
    }

    /// Returns true if the pixel buffer matches the dimensions.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && rgba_len(self.width, self.height) == Some(self.rgba.len())
    }
}

/// GPU texture with a default view.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    /// The 1×1 white texture bound when a material has none.
    pub fn white(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::upload(device, queue, "Default White Texture", 1, 1, &[255, 255, 255, 255])
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_keys_compare_by_allocation() {
        let pixels = SharedBytes::new(vec![255u8; 4]);
        let a = TextureKey::Pixels {
            bytes: pixels.clone(),
            width: 1,
            height: 1,
        };
        let b = TextureKey::Pixels {
            bytes: pixels,
            width: 1,
            height: 1,
        };
        let c = TextureKey::Pixels {
            bytes: SharedBytes::new(vec![255u8; 4]),
            width: 1,
            height: 1,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_texture_data_validation() {
        assert!(TextureData::solid([1, 2, 3, 4]).is_valid());
        let bad = TextureData {
            width: 2,
            height: 2,
            rgba: vec![0; 4],
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_rgba_len_does_not_wrap() {
        assert_eq!(rgba_len(2, 3), Some(24));
        // 65536 * 65536 * 4 wraps to zero in u32.
        assert_eq!(rgba_len(65_536, 65_536), Some(1 << 34));
        let huge = TextureData {
            width: 65_536,
            height: 65_536,
            rgba: Vec::new(),
        };
        assert!(!huge.is_valid());
    }
}
