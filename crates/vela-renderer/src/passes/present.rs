//! Final blit of the frame color into the presentation target.

use vela_core::PoolKey;

use super::pipelines::texture_bind_group;
use crate::error::PassError;
use crate::frame::{GpuFrame, GpuPasses};
use crate::scheduler::{PassFilter, RenderPass};

pub struct PresentPass;

impl RenderPass<GpuPasses> for PresentPass {
    fn name(&self) -> &str {
        "present"
    }

    fn filter(&self) -> Option<PassFilter> {
        None
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, _pools: &[PoolKey]) -> Result<(), PassError> {
        let bind_group = texture_bind_group(
            frame.ctx.device(),
            "Present Bind Group",
            &frame.pipelines.present_layout,
            &[frame.color_view()],
        );
        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Present"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: frame.output,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&frame.pipelines.present);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}
