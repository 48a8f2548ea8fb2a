//! First pass of every frame: clears and the frustum cull of occluders.

use vela_core::PoolKey;

use crate::config::ReadbackMode;
use crate::culling::CullPhase;
use crate::error::PassError;
use crate::frame::{GpuFrame, GpuPasses};
use crate::scheduler::{PassFilter, RenderPass};

pub struct FrameBeginPass;

impl RenderPass<GpuPasses> for FrameBeginPass {
    fn name(&self) -> &str {
        "frame_begin"
    }

    fn filter(&self) -> Option<PassFilter> {
        None
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, _pools: &[PoolKey]) -> Result<(), PassError> {
        frame.culling.table.clear();
        if frame.settings.readback == ReadbackMode::Latent {
            frame.culling.readback.resolve(frame.ctx.device(), false);
            frame.culling.readback.begin(frame.ctx, frame.views.len());
        }

        let [r, g, b, a] = frame.settings.clear_color.map(f64::from);
        // Clears on begin; the pass records nothing else.
        drop(frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Frame Begin"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.targets.color.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &frame.targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        }));

        frame.cull(CullPhase::Frustum);
        Ok(())
    }
}
