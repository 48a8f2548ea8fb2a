//! Depth-only rendering of opaque and alpha-tested pools.

use vela_core::PoolKey;

use crate::error::PassError;
use crate::frame::{draw_pools, GpuFrame, GpuPasses};
use crate::scheduler::{GroupFilter, MaterialFilter, PassFilter, RenderPass};

/// Depth prepass over one visibility group.
pub struct DepthPrepass {
    name: &'static str,
    group: GroupFilter,
}

impl DepthPrepass {
    /// Seeds the depth buffer the Hi-Z pyramid is built from.
    pub fn occluders() -> Self {
        Self {
            name: "occluder_depth",
            group: GroupFilter::Occluder,
        }
    }

    /// Runs on the survivors of the occlusion cull.
    pub fn non_occluders() -> Self {
        Self {
            name: "non_occluder_depth",
            group: GroupFilter::NonOccluder,
        }
    }
}

impl RenderPass<GpuPasses> for DepthPrepass {
    fn name(&self) -> &str {
        self.name
    }

    fn filter(&self) -> Option<PassFilter> {
        Some(PassFilter::new(self.group, MaterialFilter::DepthWriting))
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, pools: &[PoolKey]) -> Result<(), PassError> {
        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(self.name),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &frame.targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&frame.pipelines.depth);
        pass.set_bind_group(0, &frame.uniforms.bind_group, &[]);
        draw_pools(&mut pass, &frame.scene, &frame.culling.culler, pools, &mut frame.stats);
        Ok(())
    }
}
