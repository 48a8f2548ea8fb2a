//! Post-processing extension point.
//!
//! Externally authored [`PostEffect`]s are appended to a pipeline's chain at
//! construction. Each runs as its own pass, reading the current color and
//! writing the other of two ping-pong targets.

use bytemuck::{Pod, Zeroable};
use vela_core::PoolKey;

use super::pipelines::texture_entry;
use crate::context::{RenderContext, COLOR_FORMAT};
use crate::error::PassError;
use crate::frame::{ColorSource, GpuFrame, GpuPasses};
use crate::pipeline::PipelineConfig;
use crate::scheduler::{PassFilter, RenderPass};

/// A fullscreen effect over the frame color.
pub trait PostEffect: Send {
    /// Returns the unique name of this effect.
    fn name(&self) -> &str;

    /// Records the effect. `output` has [`COLOR_FORMAT`] and the size of `input`.
    fn apply(
        &mut self,
        ctx: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
    ) -> Result<(), PassError>;
}

/// Target index the next effect writes, given where the color currently is.
pub fn next_target(current: ColorSource) -> usize {
    match current {
        ColorSource::Scene => 0,
        ColorSource::Post(i) => 1 - i,
    }
}

/// Schedules one [`PostEffect`].
pub struct PostPass {
    effect: Box<dyn PostEffect>,
}

impl PostPass {
    pub fn new(effect: Box<dyn PostEffect>) -> Self {
        Self { effect }
    }
}

impl RenderPass<GpuPasses> for PostPass {
    fn name(&self) -> &str {
        self.effect.name()
    }

    fn filter(&self) -> Option<PassFilter> {
        None
    }

    fn execute(&mut self, frame: &mut GpuFrame<'_>, _pools: &[PoolKey]) -> Result<(), PassError> {
        let next = next_target(frame.color);
        let input = frame.color_view();
        let output = &frame.targets.post[next].view;
        self.effect.apply(frame.ctx, &mut frame.encoder, input, output)?;
        frame.color = ColorSource::Post(next);
        Ok(())
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ExposureUniform {
    params: [f32; 4],
}

struct ToneMapGpu {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
    uniform: wgpu::Buffer,
}

/// Exposure-scaled Reinhard tone mapping.
pub struct ExposureToneMap {
    pub exposure: f32,
    gpu: Option<ToneMapGpu>,
}

impl ExposureToneMap {
    pub fn new(exposure: f32) -> Self {
        Self { exposure, gpu: None }
    }

    /// CPU reference of the shader.
    pub fn map(&self, color: [f32; 3]) -> [f32; 3] {
        color.map(|c| {
            let e = c.max(0.0) * self.exposure;
            e / (1.0 + e)
        })
    }

    fn gpu(&mut self, ctx: &RenderContext) -> &ToneMapGpu {
        self.gpu.get_or_insert_with(|| {
            let device = ctx.device();
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Tone Map Layout"),
                entries: &[
                    texture_entry(0),
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
            let pipeline = PipelineConfig::new("Tone Map Pipeline", include_str!("../shaders/post_tonemap.wgsl"), &[
                &layout,
            ])
            .with_target(COLOR_FORMAT, None)
            .with_cull_mode(None)
            .build(device);
            let uniform = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Tone Map Uniform"),
                size: std::mem::size_of::<ExposureUniform>() as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            ToneMapGpu {
                layout,
                pipeline,
                uniform,
            }
        })
    }
}

impl Default for ExposureToneMap {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PostEffect for ExposureToneMap {
    fn name(&self) -> &str {
        "tonemap"
    }

    fn apply(
        &mut self,
        ctx: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
    ) -> Result<(), PassError> {
        let exposure = ExposureUniform {
            params: [self.exposure, 0.0, 0.0, 0.0],
        };
        let gpu = self.gpu(ctx);
        ctx.write_buffer(&gpu.uniform, 0, bytemuck::bytes_of(&exposure));

        let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tone Map Bind Group"),
            layout: &gpu.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gpu.uniform.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Tone Map"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
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
        pass.set_pipeline(&gpu.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ping_pong_alternates() {
        assert_eq!(next_target(ColorSource::Scene), 0);
        assert_eq!(next_target(ColorSource::Post(0)), 1);
        assert_eq!(next_target(ColorSource::Post(1)), 0);
    }

    #[test]
    fn test_tone_map_compresses_highlights() {
        let tone = ExposureToneMap::new(2.0);
        let [r, g, b] = tone.map([1.0, 0.0, -1.0]);
        assert_relative_eq!(r, 2.0 / 3.0);
        assert_relative_eq!(g, 0.0);
        assert_relative_eq!(b, 0.0);
        assert!(tone.map([100.0; 3])[0] < 1.0);
    }
}
