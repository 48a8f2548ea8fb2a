//! Weighted blended order-independent transparency.
//!
//! Transparent pools accumulate premultiplied, depth-weighted color into an
//! RGBA16F target while an R8 target multiplies up their remaining
//! transmittance. A fullscreen resolve divides color by accumulated weight
//! and composites the average over the opaque color. Draw order does not
//! change the result.

use glam::{Vec3, Vec4};
use vela_core::PoolKey;

use super::pipelines::texture_bind_group;
use crate::error::PassError;
use crate::frame::{draw_pools, GpuFrame, GpuPasses};
use crate::scheduler::{GroupFilter, MaterialFilter, PassFilter, RenderPass};

/// Reveal values at or above this leave the destination untouched.
pub const REVEAL_EPSILON: f32 = 0.9999;

/// Depth weight of a transparent fragment; nearer fragments weigh more.
pub fn wboit_weight(alpha: f32, depth: f32) -> f32 {
    let d = 1.0 - depth;
    (alpha * (3e3 * d * d * d).max(1e-2)).clamp(1e-2, 3e3)
}

/// One pixel of the accumulation and reveal targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WboitPixel {
    pub accum: Vec4,
    pub reveal: f32,
}

impl Default for WboitPixel {
    /// The cleared state: nothing accumulated, fully revealed.
    fn default() -> Self {
        Self {
            accum: Vec4::ZERO,
            reveal: 1.0,
        }
    }
}

impl WboitPixel {
    /// Blends one fragment in, as the accumulate pipeline does.
    pub fn accumulate(&mut self, color: Vec3, alpha: f32, depth: f32) {
        let w = wboit_weight(alpha, depth);
        self.accum += (color * alpha).extend(alpha) * w;
        self.reveal *= 1.0 - alpha;
    }

    /// Composites the resolved pixel over `background`.
    pub fn resolve_over(&self, background: Vec3) -> Vec3 {
        if self.reveal >= REVEAL_EPSILON {
            return background;
        }
        let average = self.accum.truncate() / self.accum.w.max(1e-5);
        let coverage = 1.0 - self.reveal;
        average * coverage + background * (1.0 - coverage)
    }
}

#[derive(Default)]
pub struct TransparencyPass {
    /// Resolve bind group and the targets generation it reads
    resolve: Option<(u64, wgpu::BindGroup)>,
}

impl RenderPass<GpuPasses> for TransparencyPass {
    fn name(&self) -> &str {
        "transparency"
    }

    fn filter(&self) -> Option<PassFilter> {
        Some(PassFilter::new(GroupFilter::Any, MaterialFilter::Transparent))
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, pools: &[PoolKey]) -> Result<(), PassError> {
        {
            let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("WBOIT Accumulate"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: &frame.targets.accum.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &frame.targets.reveal.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: Some(super::read_only_depth(&frame.targets.depth.view)),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&frame.pipelines.wboit_accum);
            pass.set_bind_group(0, &frame.uniforms.bind_group, &[]);
            draw_pools(&mut pass, &frame.scene, &frame.culling.culler, pools, &mut frame.stats);
        }

        let generation = frame.targets.generation();
        if self.resolve.as_ref().is_none_or(|(g, _)| *g != generation) {
            let bind_group = texture_bind_group(
                frame.ctx.device(),
                "WBOIT Resolve Bind Group",
                &frame.pipelines.resolve_layout,
                &[&frame.targets.accum.view, &frame.targets.reveal.view],
            );
            self.resolve = Some((generation, bind_group));
        }
        let Some((_, bind_group)) = &self.resolve else {
            return Err(PassError::new("resolve bind group missing"));
        };

        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("WBOIT Resolve"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.targets.color.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&frame.pipelines.wboit_resolve);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const BACKGROUND: Vec3 = Vec3::new(0.1, 0.2, 0.3);

    #[test]
    fn test_opaque_surface_reproduces_its_color() {
        let color = Vec3::new(0.8, 0.4, 0.2);
        let mut pixel = WboitPixel::default();
        pixel.accumulate(color, 1.0, 0.7);
        let out = pixel.resolve_over(BACKGROUND);
        assert_relative_eq!(out.x, color.x, epsilon = 1e-5);
        assert_relative_eq!(out.y, color.y, epsilon = 1e-5);
        assert_relative_eq!(out.z, color.z, epsilon = 1e-5);
    }

    #[test]
    fn test_result_is_order_independent() {
        let surfaces = [
            (Vec3::new(1.0, 0.0, 0.0), 0.4, 0.3),
            (Vec3::new(0.0, 1.0, 0.0), 0.6, 0.5),
            (Vec3::new(0.0, 0.0, 1.0), 0.25, 0.9),
        ];
        let mut forward = WboitPixel::default();
        for (c, a, z) in surfaces {
            forward.accumulate(c, a, z);
        }
        let mut backward = WboitPixel::default();
        for (c, a, z) in surfaces.iter().rev() {
            backward.accumulate(*c, *a, *z);
        }
        let f = forward.resolve_over(BACKGROUND);
        let b = backward.resolve_over(BACKGROUND);
        assert_relative_eq!(f.x, b.x, epsilon = 1e-5);
        assert_relative_eq!(f.y, b.y, epsilon = 1e-5);
        assert_relative_eq!(f.z, b.z, epsilon = 1e-5);
        assert_relative_eq!(forward.reveal, 0.6 * 0.4 * 0.75, epsilon = 1e-6);
    }

    #[test]
    fn test_nothing_drawn_keeps_background() {
        let pixel = WboitPixel::default();
        assert_eq!(pixel.resolve_over(BACKGROUND), BACKGROUND);
        let mut invisible = WboitPixel::default();
        invisible.accumulate(Vec3::ONE, 0.0, 0.5);
        assert_eq!(invisible.resolve_over(BACKGROUND), BACKGROUND);
    }

    #[test]
    fn test_weight_is_clamped_and_prefers_near() {
        assert!(wboit_weight(1.0, 0.1) > wboit_weight(1.0, 0.9));
        assert_relative_eq!(wboit_weight(1.0, 0.0), 3e3);
        assert_relative_eq!(wboit_weight(0.0, 0.5), 1e-2);
    }
}
