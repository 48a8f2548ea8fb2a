//! Compute cull of instance pools into compacted, indirectly drawn buffers.
//!
//! Each pool gets a [`CullSlot`] per camera: a compacted transform buffer the
//! geometry passes bind as their instance stream and an indexed indirect args
//! buffer whose `instance_count` the shader increments atomically. The same
//! shader runs both phases; the occlusion phase additionally tests the
//! projected bounds against the Hi-Z pyramid.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};
use vela_core::{BoundingBox, Frustum, InstanceTransform, PoolKey};

use super::hiz::HiZPyramid;
use super::visibility::CullPhase;
use crate::context::RenderContext;
use crate::instances::{slot_bytes, GpuInstancePool};
use crate::pipeline::compute_pipeline;

const WORKGROUP_SIZE: u32 = 64;

/// Byte offset of `instance_count` inside [`DrawArgs`].
pub const INSTANCE_COUNT_OFFSET: wgpu::BufferAddress = 4;

/// `DrawIndexedIndirect` arguments, as laid out by wgpu.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct DrawArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// Per-pool uniform of the cull shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullParams {
    /// Local bounds center, `w` unused
    pub center: [f32; 4],
    /// Local bounds half extents, `w` unused
    pub extents: [f32; 4],
    /// `x` = slots to scan, `y` = test against Hi-Z
    pub counts: [u32; 4],
}

impl CullParams {
    pub fn new(bounds: &BoundingBox, active_range: u32, use_hiz: bool) -> Self {
        Self {
            center: bounds.center().extend(0.0).to_array(),
            extents: bounds.extents().extend(0.0).to_array(),
            counts: [active_range, u32::from(use_hiz), 0, 0],
        }
    }
}

/// One pool to cull this frame.
pub struct CullRequest<'a> {
    pub pool: &'a GpuInstancePool,
    pub bounds: BoundingBox,
    pub index_count: u32,
    pub phase: CullPhase,
}

/// Cull outputs of one pool for one camera.
pub struct CullSlot {
    culled: wgpu::Buffer,
    args: wgpu::Buffer,
    params: wgpu::Buffer,
    capacity: usize,
    bind_group: Option<wgpu::BindGroup>,
    /// `(pool generation, targets generation)` the bind group was built for
    bound: (u64, u64),
}

impl CullSlot {
    fn new(ctx: &RenderContext, capacity: usize, index_count: u32) -> Self {
        let args = DrawArgs {
            index_count,
            ..DrawArgs::zeroed()
        };
        Self {
            culled: Self::culled_buffer(ctx, capacity),
            args: ctx.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Cull Draw Args"),
                contents: bytemuck::bytes_of(&args),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::INDIRECT
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            }),
            params: ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("Cull Params"),
                size: std::mem::size_of::<CullParams>() as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            capacity,
            bind_group: None,
            bound: (u64::MAX, u64::MAX),
        }
    }

    fn culled_buffer(ctx: &RenderContext, capacity: usize) -> wgpu::Buffer {
        ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Culled Instances"),
            size: slot_bytes(capacity.max(1)),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX,
            mapped_at_creation: false,
        })
    }

    /// Compacted surviving transforms, bound as the instance vertex stream.
    pub fn culled(&self) -> &wgpu::Buffer {
        &self.culled
    }

    /// Indirect draw arguments with the survivor count.
    pub fn args(&self) -> &wgpu::Buffer {
        &self.args
    }

    fn destroy(&self) {
        self.culled.destroy();
        self.args.destroy();
        self.params.destroy();
    }
}

/// Compute pipeline shared by every camera's culler.
pub struct CullPipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl CullPipeline {
    pub fn new(ctx: &RenderContext) -> Self {
        let layout = ctx.device().create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull Bind Group Layout"),
            entries: &[
                buffer_entry(0, wgpu::BufferBindingType::Uniform),
                buffer_entry(1, wgpu::BufferBindingType::Uniform),
                buffer_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_entry(3, wgpu::BufferBindingType::Storage { read_only: false }),
                buffer_entry(4, wgpu::BufferBindingType::Storage { read_only: false }),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let pipeline = compute_pipeline(
            ctx.device(),
            "Instance Cull",
            include_str!("../shaders/cull.wgsl"),
            &[&layout],
        );
        Self { layout, pipeline }
    }
}

/// Cull slots of one camera, one per pool.
#[derive(Default)]
pub struct InstanceCuller {
    slots: HashMap<PoolKey, CullSlot>,
}

impl InstanceCuller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the cull of every request. Survivor counts are reset first, so
    /// a pool with nothing to scan ends up with a count of zero.
    ///
    /// Returns the number of dispatches recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        ctx: &RenderContext,
        pipeline: &CullPipeline,
        encoder: &mut wgpu::CommandEncoder,
        camera: &wgpu::Buffer,
        hiz: &HiZPyramid,
        targets_generation: u64,
        requests: &[CullRequest<'_>],
        hiz_enabled: bool,
    ) -> u32 {
        for request in requests {
            let key = request.pool.key();
            let slot = self
                .slots
                .entry(key)
                .or_insert_with(|| CullSlot::new(ctx, request.pool.capacity(), request.index_count));

            if slot.capacity < request.pool.capacity() {
                // Dropped rather than destroyed; last frame's draws may still read it.
                slot.culled = CullSlot::culled_buffer(ctx, request.pool.capacity());
                slot.capacity = request.pool.capacity();
                slot.bind_group = None;
            }

            let bound = (request.pool.generation(), targets_generation);
            if slot.bind_group.is_none() || slot.bound != bound {
                slot.bind_group = Some(ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Cull Bind Group"),
                    layout: &pipeline.layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: camera.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: slot.params.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: request.pool.buffer().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: slot.culled.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: slot.args.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: wgpu::BindingResource::TextureView(hiz.view()),
                        },
                    ],
                }));
                slot.bound = bound;
            }

            let use_hiz = hiz_enabled && request.phase == CullPhase::Occlusion;
            let params = CullParams::new(&request.bounds, request.pool.active_range(), use_hiz);
            ctx.write_buffer(&slot.params, 0, bytemuck::bytes_of(&params));
            encoder.clear_buffer(&slot.args, INSTANCE_COUNT_OFFSET, Some(4));
        }

        let mut dispatches = 0;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Instance Cull Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline.pipeline);
        for request in requests {
            let active = request.pool.active_range();
            if active == 0 {
                continue;
            }
            let Some(bind_group) = self
                .slots
                .get(&request.pool.key())
                .and_then(|slot| slot.bind_group.as_ref())
            else {
                continue;
            };
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(active.div_ceil(WORKGROUP_SIZE), 1, 1);
            dispatches += 1;
        }
        dispatches
    }

    pub fn slot(&self, key: &PoolKey) -> Option<&CullSlot> {
        self.slots.get(key)
    }

    /// Drops slots of pools that no longer exist.
    pub fn retain(&mut self, mut live: impl FnMut(&PoolKey) -> bool) {
        self.slots.retain(|key, slot| {
            let keep = live(key);
            if !keep {
                slot.destroy();
            }
            keep
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn destroy(&mut self) {
        for slot in self.slots.values() {
            slot.destroy();
        }
        self.slots.clear();
    }
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Frustum test of one slot, as performed by the cull shader. Free slots
/// never survive.
pub fn instance_in_frustum(frustum: &Frustum, transform: &InstanceTransform, local: &BoundingBox) -> bool {
    if transform.is_free() {
        return false;
    }
    frustum.intersects_box(&local.transform(&transform.to_mat4()))
}

/// Screen footprint of a world-space box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    /// Top-left in `[0, 1]` texture coordinates
    pub uv_min: Vec2,
    pub uv_max: Vec2,
    /// Nearest depth of the box
    pub min_depth: f32,
}

/// Projects `bounds` to the screen. `None` when any corner lies behind the
/// eye, in which case the box is treated as visible.
pub fn project_bounds(view_proj: &Mat4, bounds: &BoundingBox) -> Option<ScreenRect> {
    let mut lo = Vec3::splat(f32::INFINITY);
    let mut hi = Vec3::splat(f32::NEG_INFINITY);
    for corner in bounds.corners() {
        let clip = *view_proj * corner.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.xyz() / clip.w;
        lo = lo.min(ndc);
        hi = hi.max(ndc);
    }
    let to_uv = |x: f32, y: f32| Vec2::new(x * 0.5 + 0.5, 0.5 - y * 0.5);
    let a = to_uv(lo.x, hi.y).clamp(Vec2::ZERO, Vec2::ONE);
    let b = to_uv(hi.x, lo.y).clamp(Vec2::ZERO, Vec2::ONE);
    Some(ScreenRect {
        uv_min: a,
        uv_max: b,
        min_depth: lo.z,
    })
}

/// Pyramid level whose texels cover `rect` with at most 2×2 samples.
pub fn hiz_level(rect: &ScreenRect, viewport: Vec2, levels: u32) -> u32 {
    let extent = (rect.uv_max - rect.uv_min) * viewport;
    let largest = extent.x.max(extent.y).max(1.0);
    (largest.log2().ceil() as u32).min(levels.saturating_sub(1))
}

/// Hi-Z test with a caller supplied sampler `(level, x, y) -> max depth`.
/// Returns true if the box is hidden behind everything already drawn.
pub fn occluded_by(
    rect: &ScreenRect,
    viewport: Vec2,
    levels: u32,
    level_size: impl Fn(u32) -> (u32, u32),
    sample: impl Fn(u32, u32, u32) -> f32,
) -> bool {
    let level = hiz_level(rect, viewport, levels);
    let (w, h) = level_size(level);
    let texel = |uv: Vec2| {
        let x = ((uv.x * w as f32) as u32).min(w - 1);
        let y = ((uv.y * h as f32) as u32).min(h - 1);
        (x, y)
    };
    let (x0, y0) = texel(rect.uv_min);
    let (x1, y1) = texel(rect.uv_max);
    let farthest = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)]
        .into_iter()
        .map(|(x, y)| sample(level, x, y))
        .fold(0.0f32, f32::max);
    rect.min_depth > farthest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::culling::hiz::{level_count, level_size};

    fn translation(x: f32, y: f32, z: f32) -> InstanceTransform {
        InstanceTransform::from_mat4(&Mat4::from_translation(Vec3::new(x, y, z)))
    }

    #[test]
    fn test_draw_args_layout() {
        assert_eq!(std::mem::size_of::<DrawArgs>(), 20);
        assert_eq!(std::mem::size_of::<CullParams>(), 48);
        let args = DrawArgs {
            index_count: 36,
            instance_count: 7,
            ..DrawArgs::zeroed()
        };
        let bytes = bytemuck::bytes_of(&args);
        let offset = INSTANCE_COUNT_OFFSET as usize;
        assert_eq!(u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap()), 7);
    }

    #[test]
    fn test_frustum_rejects_sentinels_and_outside() {
        let camera = Camera::default();
        let frustum = camera.frustum(1.0);
        let unit = BoundingBox::default();
        assert!(instance_in_frustum(&frustum, &InstanceTransform::IDENTITY, &unit));
        assert!(!instance_in_frustum(&frustum, &InstanceTransform::EMPTY, &unit));
        assert!(!instance_in_frustum(&frustum, &InstanceTransform::TOMBSTONE, &unit));
        assert!(!instance_in_frustum(&frustum, &translation(0.0, 0.0, 50.0), &unit));
        assert!(!instance_in_frustum(&frustum, &translation(500.0, 0.0, 0.0), &unit));
    }

    #[test]
    fn test_hiz_level_selection() {
        let viewport = Vec2::new(512.0, 256.0);
        let rect = |w: f32, h: f32| ScreenRect {
            uv_min: Vec2::ZERO,
            uv_max: Vec2::new(w / 512.0, h / 256.0),
            min_depth: 0.5,
        };
        assert_eq!(hiz_level(&rect(0.5, 0.5), viewport, 10), 0);
        assert_eq!(hiz_level(&rect(3.0, 1.0), viewport, 10), 2);
        assert_eq!(hiz_level(&rect(512.0, 256.0), viewport, 10), 9);
        assert_eq!(hiz_level(&rect(512.0, 256.0), viewport, 4), 3);
    }

    #[test]
    fn test_box_behind_wall_is_occluded() {
        let camera = Camera::default();
        let (w, h) = (512, 256);
        let view_proj = camera.view_proj(w as f32 / h as f32);
        let viewport = Vec2::new(w as f32, h as f32);
        let levels = level_count(w, h);

        // A wall two units in front of the eye covers the whole screen.
        let wall = (view_proj * Vec3::new(0.0, 2.0, 6.0).extend(1.0)).z
            / (view_proj * Vec3::new(0.0, 2.0, 6.0).extend(1.0)).w;
        let sample = |_: u32, _: u32, _: u32| wall;

        let far_box = BoundingBox::default();
        let rect = project_bounds(&view_proj, &far_box).unwrap();
        assert!(occluded_by(&rect, viewport, levels, |l| level_size(w, h, l), sample));

        let near_box = BoundingBox::new(Vec3::new(-0.1, 1.9, 6.9), Vec3::new(0.1, 2.1, 7.0));
        let rect = project_bounds(&view_proj, &near_box).unwrap();
        assert!(!occluded_by(&rect, viewport, levels, |l| level_size(w, h, l), sample));
    }

    #[test]
    fn test_box_around_eye_is_not_projected() {
        let camera = Camera::default();
        let view_proj = camera.view_proj(1.0);
        let around = BoundingBox::new(camera.position - Vec3::ONE, camera.position + Vec3::ONE);
        assert!(project_bounds(&view_proj, &around).is_none());
    }
}
