//! Uploads the scene light before shading.

use vela_core::PoolKey;

use crate::error::PassError;
use crate::frame::{GpuFrame, GpuPasses};
use crate::scheduler::{PassFilter, RenderPass};

pub struct LightingPass;

impl RenderPass<GpuPasses> for LightingPass {
    fn name(&self) -> &str {
        "lighting"
    }

    fn filter(&self) -> Option<PassFilter> {
        None
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, _pools: &[PoolKey]) -> Result<(), PassError> {
        let uniform = frame.scene.light.uniform();
        frame
            .ctx
            .write_buffer(&frame.uniforms.light, 0, bytemuck::bytes_of(&uniform));
        Ok(())
    }
}
