//! Hierarchical depth pyramid.
//!
//! Level 0 is a copy of the scene depth after the occluder prepass. Every
//! further level holds the max of the 2×2 block below it, so a texel always
//! bounds the farthest depth of the screen area it covers. Odd edges fold the
//! trailing row or column into the last texel instead of dropping it.

use crate::context::RenderContext;
use crate::pipeline::compute_pipeline;

/// Format of every pyramid level.
pub const HIZ_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

const WORKGROUP_SIZE: u32 = 8;

/// Number of levels for a `width`×`height` depth buffer:
/// `1 + floor(log2(max(width, height)))`.
pub fn level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Size of pyramid level `level`.
pub fn level_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiZStepKind {
    /// Copies resolved depth into level 0.
    CopyDepth,
    /// Reduces the previous level by 2×2 max.
    Reduce,
}

/// One compute pass of a pyramid build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HiZStep {
    pub kind: HiZStepKind,
    /// Level written by this step.
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub workgroups: [u32; 2],
}

/// Every step needed to build the pyramid of a `width`×`height` buffer.
pub fn plan(width: u32, height: u32) -> Vec<HiZStep> {
    (0..level_count(width, height))
        .map(|level| {
            let (w, h) = level_size(width, height, level);
            HiZStep {
                kind: if level == 0 {
                    HiZStepKind::CopyDepth
                } else {
                    HiZStepKind::Reduce
                },
                level,
                width: w,
                height: h,
                workgroups: [w.div_ceil(WORKGROUP_SIZE), h.div_ceil(WORKGROUP_SIZE)],
            }
        })
        .collect()
}

/// The pyramid texture with one storage view per level.
pub struct HiZPyramid {
    texture: wgpu::Texture,
    full_view: wgpu::TextureView,
    level_views: Vec<wgpu::TextureView>,
    width: u32,
    height: u32,
}

impl HiZPyramid {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let levels = level_count(width, height);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Hi-Z Pyramid"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HIZ_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING,
            view_formats: &[],
        });
        let full_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Hi-Z Pyramid View"),
            ..Default::default()
        });
        let level_views = (0..levels)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Hi-Z Level View"),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        Self {
            texture,
            full_view,
            level_views,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn levels(&self) -> u32 {
        self.level_views.len() as u32
    }

    /// View over every level, read by the occlusion cull.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.full_view
    }

    pub fn level_view(&self, level: u32) -> Option<&wgpu::TextureView> {
        self.level_views.get(level as usize)
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

/// Compute pipelines that fill a [`HiZPyramid`].
pub struct HiZBuilder {
    copy_layout: wgpu::BindGroupLayout,
    copy_pipeline: wgpu::ComputePipeline,
    reduce_layout: wgpu::BindGroupLayout,
    reduce_pipeline: wgpu::ComputePipeline,
}

impl HiZBuilder {
    pub fn new(ctx: &RenderContext) -> Self {
        let device = ctx.device();
        let copy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Hi-Z Copy Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureSampleType::Depth),
                storage_entry(1),
            ],
        });
        let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Hi-Z Reduce Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureSampleType::Float { filterable: false }),
                storage_entry(1),
            ],
        });
        let copy_pipeline = compute_pipeline(
            device,
            "Hi-Z Copy",
            include_str!("../shaders/hiz_copy.wgsl"),
            &[&copy_layout],
        );
        let reduce_pipeline = compute_pipeline(
            device,
            "Hi-Z Reduce",
            include_str!("../shaders/hiz_reduce.wgsl"),
            &[&reduce_layout],
        );
        Self {
            copy_layout,
            copy_pipeline,
            reduce_layout,
            reduce_pipeline,
        }
    }

    /// Records the full build, one compute pass per step. Returns the number
    /// of steps issued.
    pub fn build(
        &self,
        ctx: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        depth_view: &wgpu::TextureView,
        pyramid: &HiZPyramid,
    ) -> u32 {
        let steps = plan(pyramid.width(), pyramid.height());
        for step in &steps {
            let Some(target) = pyramid.level_view(step.level) else {
                break;
            };
            let (pipeline, layout, source) = match step.kind {
                HiZStepKind::CopyDepth => (&self.copy_pipeline, &self.copy_layout, depth_view),
                HiZStepKind::Reduce => match pyramid.level_view(step.level - 1) {
                    Some(previous) => (&self.reduce_pipeline, &self.reduce_layout, previous),
                    None => break,
                },
            };
            let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Hi-Z Step Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(target),
                    },
                ],
            });

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Hi-Z Step"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(step.workgroups[0], step.workgroups[1], 1);
        }
        tracing::trace!(steps = steps.len(), "Hi-Z pyramid recorded");
        steps.len() as u32
    }
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: HIZ_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_count_512_by_256() {
        assert_eq!(level_count(512, 256), 10);
    }

    #[test]
    fn test_level_count_edges() {
        assert_eq!(level_count(1, 1), 1);
        assert_eq!(level_count(0, 0), 1);
        assert_eq!(level_count(2, 1), 2);
        assert_eq!(level_count(1280, 720), 11);
        assert_eq!(level_count(1023, 1), 10);
        assert_eq!(level_count(1024, 1), 11);
    }

    #[test]
    fn test_plan_512_by_256_issues_ten_steps() {
        let steps = plan(512, 256);
        assert_eq!(steps.len(), 10);
        assert_eq!(steps[0].kind, HiZStepKind::CopyDepth);
        assert!(steps[1..].iter().all(|s| s.kind == HiZStepKind::Reduce));
        assert_eq!((steps[0].width, steps[0].height), (512, 256));
        assert_eq!((steps[8].width, steps[8].height), (2, 1));
        assert_eq!((steps[9].width, steps[9].height), (1, 1));
        assert_eq!(steps[0].workgroups, [64, 32]);
    }

    #[test]
    fn test_plan_odd_sizes_end_at_one_texel() {
        let steps = plan(13, 7);
        let sizes: Vec<_> = steps.iter().map(|s| (s.width, s.height)).collect();
        assert_eq!(sizes, vec![(13, 7), (6, 3), (3, 1), (1, 1)]);
        assert_eq!(steps[0].workgroups, [2, 1]);
    }
}
