//! Material data and GPU material bind groups.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use vela_core::MaterialClass;

use super::texture::TextureKey;

/// Blend equation of a [`MaterialClass::Blended`] material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    /// `dst + src`
    #[default]
    Additive,
    /// `dst * src`
    Multiplicative,
}

/// Decoded material as supplied by the asset collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    /// Linear RGBA; alpha drives transparency and alpha testing.
    pub base_color: [f32; 4],
    pub class: MaterialClass,
    pub blend: BlendMode,
    /// Fragments below this alpha are discarded for `Cutoff` materials.
    pub alpha_cutoff: f32,
    pub texture: Option<TextureKey>,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            class: MaterialClass::Opaque,
            blend: BlendMode::Additive,
            alpha_cutoff: 0.5,
            texture: None,
        }
    }
}

impl MaterialData {
    pub fn opaque(base_color: [f32; 4]) -> Self {
        Self {
            base_color,
            ..Default::default()
        }
    }

    pub fn transparent(base_color: [f32; 4]) -> Self {
        Self {
            base_color,
            class: MaterialClass::Transparent,
            ..Default::default()
        }
    }

    pub fn blended(base_color: [f32; 4], blend: BlendMode) -> Self {
        Self {
            base_color,
            class: MaterialClass::Blended,
            blend,
            ..Default::default()
        }
    }

    pub fn with_texture(mut self, texture: TextureKey) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn uniform(&self) -> MaterialUniform {
        let cutoff = match self.class {
            MaterialClass::Cutoff => self.alpha_cutoff,
            _ => -1.0,
        };
        let multiply = match (self.class, self.blend) {
            (MaterialClass::Blended, BlendMode::Multiplicative) => 1.0,
            _ => 0.0,
        };
        MaterialUniform {
            base_color: self.base_color,
            params: [cutoff, multiply, 0.0, 0.0],
        }
    }
}

/// Material uniform (32 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: [f32; 4],
    /// x = alpha cutoff (negative disables alpha testing), y = 1 for
    /// multiplicative blending
    pub params: [f32; 4],
}

/// GPU side of a material.
///
/// The uniform buffer and bind group are owned exclusively. The texture the
/// bind group samples is shared, and the cache holds its reference.
pub struct GpuMaterial {
    pub uniform_buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub class: MaterialClass,
    pub blend: BlendMode,
}

impl GpuMaterial {
    pub fn destroy(&self) {
        self.uniform_buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_test_only_for_cutoff() {
        assert!(MaterialData::opaque([1.0; 4]).uniform().params[0] < 0.0);
        let cutout = MaterialData {
            class: MaterialClass::Cutoff,
            alpha_cutoff: 0.3,
            ..Default::default()
        };
        assert_eq!(cutout.uniform().params[0], 0.3);
    }
}
