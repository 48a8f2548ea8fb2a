//! Runtime configuration
//!
//! Loop rates, renderer settings and the demo scene, stored as RON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vela_renderer::RendererConfig;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] ron::error::SpannedError),
}

/// Pacing of a loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Fixed time step; missed steps are caught up, bounded by `max_catch_up_steps`.
    #[default]
    Fixed,
    /// Sleeps to the target rate and never catches up.
    Adaptive,
}

/// Target frequency of one loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Iterations per second
    pub rate_hz: f64,
    pub mode: LoopMode,
    /// Most steps a fixed loop runs back to back after falling behind
    pub max_catch_up_steps: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            rate_hz: 60.0,
            mode: LoopMode::Fixed,
            max_catch_up_steps: 5,
        }
    }
}

impl LoopConfig {
    pub fn adaptive(rate_hz: f64) -> Self {
        Self {
            rate_hz,
            mode: LoopMode::Adaptive,
            ..Default::default()
        }
    }
}

/// Demo scene settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// Instances spawned by the simulation
    pub instance_count: u32,
    /// Seconds until both loops shut down
    pub duration_secs: f64,
    /// Share of instances rendered as occluders (0.0-1.0)
    pub occluder_ratio: f32,
    /// Simulation ticks before the demo's transparent material finishes loading
    pub asset_delay_ticks: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            instance_count: 256,
            duration_secs: 5.0,
            occluder_ratio: 0.25,
            asset_delay_ticks: 30,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Configuration format version
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub simulation: LoopConfig,
    #[serde(default = "default_render_loop")]
    pub render: LoopConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

fn default_render_loop() -> LoopConfig {
    LoopConfig::adaptive(60.0)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            simulation: LoopConfig::default(),
            render: default_render_loop(),
            renderer: RendererConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Current configuration version
    pub const CURRENT_VERSION: u32 = 1;
}

/// Loads, holds and saves the runtime configuration.
pub struct ConfigManager {
    config: RuntimeConfig,
    config_path: PathBuf,
    dirty: bool,
}

impl ConfigManager {
    /// Loads from `path`, falling back to defaults when the file is absent or
    /// does not parse.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let config_path = path.into();
        let config = Self::load_from_path(&config_path).unwrap_or_else(|| {
            tracing::info!(path = %config_path.display(), "No usable config file, using defaults");
            RuntimeConfig::default()
        });
        Self {
            config,
            config_path,
            dirty: false,
        }
    }

    fn load_from_path(path: &Path) -> Option<RuntimeConfig> {
        let content = std::fs::read_to_string(path).ok()?;
        match ron::from_str::<RuntimeConfig>(&content) {
            Ok(config) => {
                if config.version != RuntimeConfig::CURRENT_VERSION {
                    tracing::warn!(
                        found = config.version,
                        expected = RuntimeConfig::CURRENT_VERSION,
                        "Config version mismatch"
                    );
                }
                tracing::info!(path = %path.display(), "Loaded config");
                Some(config)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse config file");
                None
            }
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Mutable access; marks the configuration dirty.
    pub fn config_mut(&mut self) -> &mut RuntimeConfig {
        self.dirty = true;
        &mut self.config
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Writes pretty RON if anything changed.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = to_ron(&self.config)?;
        std::fs::write(&self.config_path, content)?;
        tracing::info!(path = %self.config_path.display(), "Saved config");
        self.dirty = false;
        Ok(())
    }
}

pub fn to_ron(config: &RuntimeConfig) -> Result<String, ConfigError> {
    Ok(ron::ser::to_string_pretty(config, ron::ser::PrettyConfig::default())?)
}

pub fn from_ron(content: &str) -> Result<RuntimeConfig, ConfigError> {
    Ok(ron::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_renderer::ReadbackMode;

    #[test]
    fn test_config_roundtrip() {
        let mut config = RuntimeConfig::default();
        config.renderer.readback = ReadbackMode::Immediate;
        config.demo.instance_count = 12;
        let parsed = from_ron(&to_ron(&config).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed = from_ron("(version: 1, demo: (instance_count: 3))").unwrap();
        assert_eq!(parsed.demo.instance_count, 3);
        assert_eq!(parsed.demo.duration_secs, DemoConfig::default().duration_secs);
        assert_eq!(parsed.render.mode, LoopMode::Adaptive);
        assert_eq!(parsed.renderer, RendererConfig::default());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let manager = ConfigManager::load("/nonexistent/vela/config.ron");
        assert_eq!(manager.config(), &RuntimeConfig::default());
        assert!(!manager.is_dirty());
    }

    #[test]
    fn test_config_mut_marks_dirty() {
        let mut manager = ConfigManager::load("/nonexistent/vela/config.ron");
        manager.config_mut().demo.duration_secs = 1.0;
        assert!(manager.is_dirty());
    }
}
