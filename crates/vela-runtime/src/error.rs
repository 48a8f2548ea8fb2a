//! Runtime error types.

use thiserror::Error;
use vela_core::{ArenaError, PoolError};
use vela_renderer::RenderError;

use crate::config::ConfigError;

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Transform hierarchy error: {0}")]
    Arena(#[from] ArenaError),

    #[error("Instance pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Thread {0} panicked")]
    ThreadPanicked(&'static str),

    #[error("Thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
