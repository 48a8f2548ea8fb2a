//! Directional scene light

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::LightConfig;

/// Light uniform buffer data sent to GPU (48 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightUniform {
    /// Direction toward the light (normalized, world space), w unused
    pub direction: [f32; 4],
    /// Light color (RGB) and intensity (A)
    pub color_intensity: [f32; 4],
    /// Ambient color (RGB) and strength (A)
    pub ambient: [f32; 4],
}

impl Default for LightUniform {
    fn default() -> Self {
        DirectionalLight::default().uniform()
    }
}

/// A distant light source whose rays are all parallel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction toward the light source (normalized)
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub ambient_color: Vec3,
    pub ambient_strength: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::from_config(&LightConfig::default())
    }
}

impl DirectionalLight {
    pub fn from_config(config: &LightConfig) -> Self {
        Self {
            direction: Vec3::from(config.direction).normalize_or(Vec3::Y),
            color: Vec3::from(config.color),
            intensity: config.intensity,
            ambient_color: Vec3::ONE,
            ambient_strength: config.ambient_strength,
        }
    }

    /// Set light direction (will be normalized)
    pub fn set_direction(&mut self, dir: Vec3) {
        self.direction = dir.normalize_or(Vec3::Y);
    }

    pub fn uniform(&self) -> LightUniform {
        LightUniform {
            direction: self.direction.extend(0.0).to_array(),
            color_intensity: self.color.extend(self.intensity).to_array(),
            ambient: self.ambient_color.extend(self.ambient_strength).to_array(),
        }
    }
}
