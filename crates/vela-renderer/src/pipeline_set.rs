//! Per-camera render pipelines.
//!
//! Every camera owns one [`FramePipeline`]: its pass chain, its frame
//! targets sized to the camera's render target, and the culling state carried
//! across frames. [`PipelineSet`] keeps that set in step with the cameras of
//! the [`RenderWorld`].

use std::collections::HashMap;

use vela_core::VisibilityGroup;

use crate::camera::CameraUniform;
use crate::config::{ReadbackMode, RendererConfig};
use crate::context::RenderContext;
use crate::culling::{view_epoch, VisibleCount};
use crate::error::{RenderError, RenderResult};
use crate::frame::{
    ColorSource, FrameCulling, FrameSettings, FrameStats, FrameUniforms, GpuFrame, GpuPasses, ViewEpochs,
};
use crate::ids::{CameraId, TargetId};
use crate::light::LightUniform;
use crate::passes::{canonical_chain, ExposureToneMap, PassPipelines, PostEffect};
use crate::scheduler::{PassScheduler, PoolView, ScheduleReport};
use crate::targets::FrameTargets;
use crate::world::{CameraEntry, RenderTarget, RenderWorld};

/// Builds the post-processing chain of each new pipeline.
pub type EffectFactory = Box<dyn Fn() -> Vec<Box<dyn PostEffect>> + Send>;

/// The default chain: a single exposure tone map.
pub fn default_effects() -> Vec<Box<dyn PostEffect>> {
    vec![Box::new(ExposureToneMap::default())]
}

impl FrameSettings {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            clear_color: config.clear_color,
            hiz_enabled: config.hiz_enabled,
            readback: config.readback,
        }
    }
}

impl FrameUniforms {
    pub fn new(ctx: &RenderContext) -> Self {
        let uniform_buffer = |label, size| {
            ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let camera = uniform_buffer("Camera Uniform", std::mem::size_of::<CameraUniform>() as u64);
        let light = uniform_buffer("Light Uniform", std::mem::size_of::<LightUniform>() as u64);
        let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: ctx.frame_bind_group_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: camera.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: light.as_entire_binding(),
                },
            ],
        });
        Self {
            camera,
            light,
            bind_group,
        }
    }

    pub fn destroy(&self) {
        self.camera.destroy();
        self.light.destroy();
    }
}

/// Epochs of one camera view. The occlusion epoch also covers the occluders
/// that fed the Hi-Z pyramid.
pub fn view_epochs(uniform: &CameraUniform, world: &RenderWorld, hiz_enabled: bool) -> ViewEpochs {
    let frustum = view_epoch(&[bytemuck::bytes_of(uniform)]);
    let mut occluders = Vec::new();
    for pool in world.scene.registry.pools() {
        if pool.descriptor().group == VisibilityGroup::Occluder {
            let key = pool.key();
            occluders.extend_from_slice(&key.mesh.0.to_le_bytes());
            occluders.extend_from_slice(&key.material.0.to_le_bytes());
            occluders.extend_from_slice(&pool.revision().to_le_bytes());
        }
    }
    let occlusion = view_epoch(&[&frustum.to_le_bytes(), &occluders, &[u8::from(hiz_enabled)]]);
    ViewEpochs { frustum, occlusion }
}

/// Pools a frame can draw: those with GPU buffers and bound resources.
pub fn pool_views(world: &RenderWorld) -> Vec<PoolView> {
    world
        .registry()
        .pools()
        .filter(|pool| world.gpu_pools.contains_key(&pool.key()) && world.scene.bindings.contains_key(&pool.key()))
        .map(|pool| {
            let desc = pool.descriptor();
            PoolView {
                key: desc.key,
                group: desc.group,
                material_class: desc.material_class,
                visible: VisibleCount::Unknown,
                instances: pool.count() as u32,
            }
        })
        .collect()
}

/// Render pipeline of one camera.
pub struct FramePipeline {
    camera: CameraId,
    target: TargetId,
    targets: FrameTargets,
    scheduler: PassScheduler<GpuPasses>,
    culling: FrameCulling,
    uniforms: FrameUniforms,
    last_report: ScheduleReport,
}

impl FramePipeline {
    pub fn new(
        ctx: &RenderContext,
        camera: CameraId,
        entry: &CameraEntry,
        target: &RenderTarget,
        readback: ReadbackMode,
        effects: Vec<Box<dyn PostEffect>>,
    ) -> Self {
        let (width, height) = target.size();
        tracing::info!(pipeline = %camera, width, height, "Camera pipeline created");
        Self {
            camera,
            target: entry.target,
            targets: FrameTargets::new(ctx.device(), width, height, target.generation()),
            scheduler: canonical_chain(camera.to_string(), effects),
            culling: FrameCulling::new(readback),
            uniforms: FrameUniforms::new(ctx),
            last_report: ScheduleReport::default(),
        }
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    pub fn scheduler(&self) -> &PassScheduler<GpuPasses> {
        &self.scheduler
    }

    pub fn last_report(&self) -> &ScheduleReport {
        &self.last_report
    }

    /// Regenerates framebuffers and the Hi-Z pyramid at the target's size.
    pub fn resize(&mut self, ctx: &RenderContext, target: &RenderTarget) {
        let (width, height) = target.size();
        self.targets.destroy();
        self.targets = FrameTargets::new(ctx.device(), width, height, target.generation());
        tracing::debug!(pipeline = %self.camera, width, height, "Camera pipeline resized");
    }

    /// Renders one frame of the camera into its target.
    pub fn render(
        &mut self,
        ctx: &RenderContext,
        pipelines: &PassPipelines,
        world: &RenderWorld,
        settings: FrameSettings,
    ) -> RenderResult<FrameStats> {
        let entry = world.camera(self.camera).ok_or(RenderError::MissingCamera(self.camera))?;
        if entry.target != self.target {
            return Err(RenderError::MissingTarget(self.target));
        }
        let target = world.target(self.target).ok_or(RenderError::MissingTarget(self.target))?;
        if target.generation() != self.targets.generation() {
            self.resize(ctx, target);
        }

        self.culling
            .culler
            .retain(|key| world.gpu_pools.contains_key(key));
        self.culling
            .readback
            .retain(|key| world.gpu_pools.contains_key(key));

        let uniform = CameraUniform::new(
            &entry.camera,
            self.targets.width(),
            self.targets.height(),
            self.targets.hiz.levels(),
            settings.hiz_enabled,
        );
        ctx.write_buffer(&self.uniforms.camera, 0, bytemuck::bytes_of(&uniform));

        let mut frame = GpuFrame {
            ctx,
            pipelines,
            scene: world.frame_scene(),
            targets: &self.targets,
            output: target.view(),
            uniforms: &self.uniforms,
            culling: &mut self.culling,
            settings,
            epochs: view_epochs(&uniform, world, settings.hiz_enabled),
            encoder: ctx.create_encoder("Frame Encoder"),
            views: pool_views(world),
            color: ColorSource::Scene,
            stats: FrameStats::default(),
        };
        let report = self.scheduler.run(&mut frame);

        let GpuFrame {
            encoder, mut stats, ..
        } = frame;
        ctx.submit(encoder);
        if settings.readback == ReadbackMode::Latent {
            self.culling.readback.submit();
        }

        stats.pass_failures += report.failed;
        stats.skipped_pools += report.skipped_culled;
        stats.visible_instances = self.culling.table.known_visible();
        self.last_report = report;
        Ok(stats)
    }

    pub fn destroy(&mut self) {
        self.targets.destroy();
        self.culling.destroy();
        self.uniforms.destroy();
    }
}

/// Camera pipelines of the renderer, keyed by camera.
pub struct PipelineSet {
    pipelines: HashMap<CameraId, FramePipeline>,
    effects: EffectFactory,
}

impl Default for PipelineSet {
    fn default() -> Self {
        Self::new(Box::new(default_effects))
    }
}

impl PipelineSet {
    pub fn new(effects: EffectFactory) -> Self {
        Self {
            pipelines: HashMap::new(),
            effects,
        }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn get(&self, camera: CameraId) -> Option<&FramePipeline> {
        self.pipelines.get(&camera)
    }

    pub fn cameras(&self) -> impl Iterator<Item = &CameraId> {
        self.pipelines.keys()
    }

    /// Tears down pipelines whose camera or target is gone and creates
    /// pipelines for new cameras with a live target. Returns how many were
    /// torn down.
    pub fn sync(&mut self, ctx: &RenderContext, world: &RenderWorld, readback: ReadbackMode) -> usize {
        let stale: Vec<CameraId> = self
            .pipelines
            .iter()
            .filter(|(id, pipeline)| match world.camera(**id) {
                Some(entry) => entry.target != pipeline.target() || world.target(entry.target).is_none(),
                None => true,
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.tear_down(*id, "camera or render target no longer exists");
        }

        for (id, entry) in world.cameras() {
            if self.pipelines.contains_key(id) {
                continue;
            }
            let Some(target) = world.target(entry.target) else {
                continue;
            };
            let pipeline = FramePipeline::new(ctx, *id, entry, target, readback, (self.effects)());
            self.pipelines.insert(*id, pipeline);
        }
        stale.len()
    }

    /// Renders every camera. Pipelines that fail are torn down.
    pub fn render(
        &mut self,
        ctx: &RenderContext,
        pipelines: &PassPipelines,
        world: &RenderWorld,
        settings: FrameSettings,
    ) -> FrameStats {
        let mut total = FrameStats::default();
        let mut failed = Vec::new();
        for (id, pipeline) in &mut self.pipelines {
            match pipeline.render(ctx, pipelines, world, settings) {
                Ok(stats) => total.accumulate(&stats),
                Err(err) => {
                    tracing::error!(pipeline = %id, error = %err, "Camera pipeline failed");
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            self.tear_down(id, "render error");
        }
        total
    }

    fn tear_down(&mut self, id: CameraId, reason: &str) {
        if let Some(mut pipeline) = self.pipelines.remove(&id) {
            pipeline.destroy();
            tracing::info!(pipeline = %id, reason, "Camera pipeline torn down");
        }
    }

    pub fn clear(&mut self) {
        for (_, mut pipeline) in self.pipelines.drain() {
            pipeline.destroy();
        }
    }
}
