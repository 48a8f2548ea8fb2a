//! Lit shading of opaque and alpha-tested pools over the prepass depth.

use vela_core::PoolKey;

use crate::error::PassError;
use crate::frame::{draw_pools, GpuFrame, GpuPasses};
use crate::scheduler::{GroupFilter, MaterialFilter, PassFilter, RenderPass};

pub struct OpaquePass;

impl RenderPass<GpuPasses> for OpaquePass {
    fn name(&self) -> &str {
        "opaque"
    }

    fn filter(&self) -> Option<PassFilter> {
        Some(PassFilter::new(GroupFilter::Any, MaterialFilter::DepthWriting))
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, pools: &[PoolKey]) -> Result<(), PassError> {
        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Opaque Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.targets.color.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(super::read_only_depth(&frame.targets.depth.view)),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&frame.pipelines.opaque);
        pass.set_bind_group(0, &frame.uniforms.bind_group, &[]);
        draw_pools(&mut pass, &frame.scene, &frame.culling.culler, pools, &mut frame.stats);
        Ok(())
    }
}
