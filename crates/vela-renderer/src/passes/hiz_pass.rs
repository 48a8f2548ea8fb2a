//! Hi-Z pyramid build followed by the occlusion cull of non-occluders.

use vela_core::PoolKey;

use crate::culling::CullPhase;
use crate::error::PassError;
use crate::frame::{GpuFrame, GpuPasses};
use crate::scheduler::{PassFilter, RenderPass};

pub struct HiZPass;

impl RenderPass<GpuPasses> for HiZPass {
    fn name(&self) -> &str {
        "hiz"
    }

    fn filter(&self) -> Option<PassFilter> {
        None
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, _pools: &[PoolKey]) -> Result<(), PassError> {
        if frame.settings.hiz_enabled {
            frame.stats.hiz_steps += frame.pipelines.hiz.build(
                frame.ctx,
                &mut frame.encoder,
                &frame.targets.depth.view,
                &frame.targets.hiz,
            );
        }
        // Without Hi-Z the second phase degrades to a frustum cull.
        frame.cull(CullPhase::Occlusion);
        Ok(())
    }
}
