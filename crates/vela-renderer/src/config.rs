//! Renderer configuration.

use serde::{Deserialize, Serialize};

/// How survivor counts from the culling stage reach the CPU.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ReadbackMode {
    /// Submit culling work, wait for it and read counts within the same frame.
    /// Blocks the render thread once per cull phase.
    Immediate,
    /// Use the most recent completed readback; never wait on the GPU.
    #[default]
    Latent,
}

/// Directional light settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LightConfig {
    /// Direction toward the light source (normalized on use)
    pub direction: [f32; 3],
    /// Light color (RGB, 0.0-1.0)
    pub color: [f32; 3],
    /// Intensity multiplier
    pub intensity: f32,
    /// Ambient strength (0.0-1.0)
    pub ambient_strength: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            direction: [0.5, 1.0, 0.5],
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            ambient_strength: 0.25,
        }
    }
}

/// Renderer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Offscreen target width in pixels
    pub width: u32,
    /// Offscreen target height in pixels
    pub height: u32,
    /// Slot capacity of newly created instance pools
    pub initial_pool_capacity: usize,
    /// Survivor count readback strategy
    pub readback: ReadbackMode,
    /// Enable hierarchical-Z occlusion culling of non-occluders
    pub hiz_enabled: bool,
    /// Clear color of the main color target (linear RGBA)
    pub clear_color: [f32; 4],
    /// Drains after which a pending deferred command is reported as stalled
    pub stall_warning_drains: u32,
    /// Scene light
    pub light: LightConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            initial_pool_capacity: 64,
            readback: ReadbackMode::default(),
            hiz_enabled: true,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            stall_warning_drains: 240,
            light: LightConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_readback_never_waits() {
        assert_eq!(RendererConfig::default().readback, ReadbackMode::Latent);
        let parsed: RendererConfig = ron::from_str("(width: 64)").unwrap();
        assert_eq!(parsed.readback, ReadbackMode::Latent);
        assert_eq!(parsed.width, 64);
    }
}
