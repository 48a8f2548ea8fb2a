//! Renderer error types.

use thiserror::Error;
use vela_core::{PoolError, ResourceError};

use crate::ids::{CameraId, TargetId};

/// Renderer errors
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No suitable GPU adapter found")]
    AdapterNotFound,

    #[error("Device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("Instance pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Asset missing: {0}")]
    MissingAsset(String),

    #[error("Camera not found: {0}")]
    MissingCamera(CameraId),

    #[error("Render target not found: {0}")]
    MissingTarget(TargetId),

    #[error("Invalid target size: {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Readback failed: {0}")]
    Readback(String),
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Failure of a single render pass.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PassError {
    pub message: String,
}

impl PassError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RenderError> for PassError {
    fn from(err: RenderError) -> Self {
        Self::new(err.to_string())
    }
}
