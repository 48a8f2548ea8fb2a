//! Additive and multiplicative blending.
//!
//! Pools are drawn in submission order without a depth sort. Overlapping
//! blended surfaces can therefore composite differently depending on draw
//! order once other blend equations are mixed in.

use vela_core::PoolKey;

use crate::error::PassError;
use crate::frame::{draw_pools, GpuFrame, GpuPasses};
use crate::resources::BlendMode;
use crate::scheduler::{GroupFilter, MaterialFilter, PassFilter, RenderPass};

pub struct BlendedPass;

/// Splits `pools` into consecutive runs of one blend mode, keeping their order.
pub fn blend_runs(
    pools: &[PoolKey],
    mut blend_of: impl FnMut(&PoolKey) -> Option<BlendMode>,
) -> Vec<(BlendMode, Vec<PoolKey>)> {
    let mut runs: Vec<(BlendMode, Vec<PoolKey>)> = Vec::new();
    for key in pools {
        let Some(mode) = blend_of(key) else {
            continue;
        };
        match runs.last_mut() {
            Some((last, keys)) if *last == mode => keys.push(*key),
            _ => runs.push((mode, vec![*key])),
        }
    }
    runs
}

impl RenderPass<GpuPasses> for BlendedPass {
    fn name(&self) -> &str {
        "blended"
    }

    fn filter(&self) -> Option<PassFilter> {
        Some(PassFilter::new(GroupFilter::Any, MaterialFilter::Blended))
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, pools: &[PoolKey]) -> Result<(), PassError> {
        let scene = frame.scene;
        let runs = blend_runs(pools, |key| {
            let binding = scene.bindings.get(key)?;
            scene.cache.material(binding.material).map(|m| m.blend)
        });

        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blended Pass"),
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
        pass.set_bind_group(0, &frame.uniforms.bind_group, &[]);
        for (mode, keys) in &runs {
            pass.set_pipeline(match mode {
                BlendMode::Additive => &frame.pipelines.blended_additive,
                BlendMode::Multiplicative => &frame.pipelines.blended_multiplicative,
            });
            draw_pools(&mut pass, &frame.scene, &frame.culling.culler, keys, &mut frame.stats);
        }
        Ok(())
    }
}
