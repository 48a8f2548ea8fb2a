//! Per-frame state handed to every pass of a camera pipeline.

use std::collections::{BTreeMap, HashMap};

use vela_core::{InstanceRegistry, PoolKey, VisibilityGroup};

use crate::config::ReadbackMode;
use crate::context::RenderContext;
use crate::culling::{
    CountReadback, CullPhase, CullRequest, InstanceCuller, VisibilityQuery, VisibilityTable, VisibleCount,
};
use crate::instances::GpuInstancePool;
use crate::light::DirectionalLight;
use crate::passes::PassPipelines;
use crate::resources::ResourceCache;
use crate::scheduler::{FramePools, PassContext, PoolView};
use crate::targets::FrameTargets;
use crate::scene::PoolBinding;

/// Counters of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub draw_calls: u32,
    /// Pools a pass left out because they were known to be culled
    pub skipped_pools: u32,
    pub hiz_steps: u32,
    pub cull_dispatches: u32,
    pub pass_failures: u32,
    /// Survivors of pools with a known count
    pub visible_instances: u64,
}

impl FrameStats {
    pub fn accumulate(&mut self, other: &FrameStats) {
        self.draw_calls += other.draw_calls;
        self.skipped_pools += other.skipped_pools;
        self.hiz_steps += other.hiz_steps;
        self.cull_dispatches += other.cull_dispatches;
        self.pass_failures += other.pass_failures;
        self.visible_instances += other.visible_instances;
    }
}

/// Scene data a frame reads.
#[derive(Clone, Copy)]
pub struct FrameScene<'f> {
    pub registry: &'f InstanceRegistry,
    pub gpu_pools: &'f BTreeMap<PoolKey, GpuInstancePool>,
    pub bindings: &'f HashMap<PoolKey, PoolBinding>,
    pub cache: &'f ResourceCache,
    pub light: &'f DirectionalLight,
}

/// Culling state a camera pipeline keeps across frames.
pub struct FrameCulling {
    pub culler: InstanceCuller,
    pub readback: CountReadback,
    pub table: VisibilityTable,
}

impl FrameCulling {
    pub fn new(mode: ReadbackMode) -> Self {
        Self {
            culler: InstanceCuller::new(),
            readback: CountReadback::new(mode),
            table: VisibilityTable::new(),
        }
    }

    pub fn destroy(&mut self) {
        self.culler.destroy();
        self.readback.destroy();
        self.table.clear();
    }
}

/// Camera and light uniforms with their bind group.
pub struct FrameUniforms {
    pub camera: wgpu::Buffer,
    pub light: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

/// Frame-wide switches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    pub clear_color: [f32; 4],
    pub hiz_enabled: bool,
    pub readback: ReadbackMode,
}

/// Epochs stamped onto survivor counts of each cull phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewEpochs {
    pub frustum: u64,
    pub occlusion: u64,
}

impl ViewEpochs {
    pub fn get(&self, phase: CullPhase) -> u64 {
        match phase {
            CullPhase::Frustum => self.frustum,
            CullPhase::Occlusion => self.occlusion,
        }
    }
}

/// Texture currently holding the frame's final color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSource {
    Scene,
    Post(usize),
}

/// Everything a GPU pass needs for one camera and frame.
pub struct GpuFrame<'f> {
    pub ctx: &'f RenderContext,
    pub pipelines: &'f PassPipelines,
    pub scene: FrameScene<'f>,
    pub targets: &'f FrameTargets,
    /// Presentation target view
    pub output: &'f wgpu::TextureView,
    pub uniforms: &'f FrameUniforms,
    pub culling: &'f mut FrameCulling,
    pub settings: FrameSettings,
    pub epochs: ViewEpochs,
    pub encoder: wgpu::CommandEncoder,
    pub views: Vec<PoolView>,
    pub color: ColorSource,
    pub stats: FrameStats,
}

/// [`PassContext`] of the GPU pass chain.
pub struct GpuPasses;

impl PassContext for GpuPasses {
    type Frame<'f> = GpuFrame<'f>;
}

impl FramePools for GpuFrame<'_> {
    fn pool_views(&self) -> &[PoolView] {
        &self.views
    }
}

impl<'f> GpuFrame<'f> {
    /// Submits what was recorded so far and continues in a fresh encoder.
    pub fn flush(&mut self) {
        let encoder = std::mem::replace(&mut self.encoder, self.ctx.create_encoder("Frame Encoder"));
        self.ctx.submit(encoder);
    }

    /// View of the texture holding the current color.
    pub fn color_view(&self) -> &'f wgpu::TextureView {
        match self.color {
            ColorSource::Scene => &self.targets.color.view,
            ColorSource::Post(i) => &self.targets.post[i].view,
        }
    }

    /// Culls every pool of the phase's visibility group and updates their
    /// [`PoolView::visible`].
    pub fn cull(&mut self, phase: CullPhase) {
        let group = match phase {
            CullPhase::Frustum => VisibilityGroup::Occluder,
            CullPhase::Occlusion => VisibilityGroup::NonOccluder,
        };
        let scene = self.scene;
        let epoch = self.epochs.get(phase);

        let requests: Vec<CullRequest<'f>> = self
            .views
            .iter()
            .filter(|view| view.group == group)
            .filter_map(|view| {
                let pool = scene.gpu_pools.get(&view.key)?;
                let binding = scene.bindings.get(&view.key)?;
                let mesh = scene.cache.mesh(binding.mesh)?;
                let bounds = scene.registry.pool(&view.key)?.descriptor().bounds;
                Some(CullRequest {
                    pool,
                    bounds,
                    index_count: mesh.index_count,
                    phase,
                })
            })
            .collect();

        let immediate = self.settings.readback == ReadbackMode::Immediate;
        if immediate {
            self.culling.readback.begin(self.ctx, requests.len());
        }

        self.stats.cull_dispatches += self.culling.culler.dispatch(
            self.ctx,
            &self.pipelines.cull,
            &mut self.encoder,
            &self.uniforms.camera,
            &self.targets.hiz,
            self.targets.generation(),
            &requests,
            self.settings.hiz_enabled,
        );

        for request in &requests {
            let key = request.pool.key();
            let revision = scene.registry.pool(&key).map_or(0, |p| p.revision());
            if let Some(slot) = self.culling.culler.slot(&key) {
                self.culling
                    .readback
                    .record(&mut self.encoder, key, revision, epoch, slot.args());
            }
        }

        if immediate {
            self.flush();
            self.culling.readback.submit();
            self.culling.readback.resolve(self.ctx.device(), true);
        }

        for view in self.views.iter_mut().filter(|view| view.group == group) {
            let revision = scene.registry.pool(&view.key).map_or(0, |p| p.revision());
            view.visible = if view.instances == 0 {
                VisibleCount::Known(0)
            } else {
                self.culling.readback.lookup(&view.key, revision, epoch)
            };
            self.culling.table.insert(VisibilityQuery {
                pool: view.key,
                phase,
                revision,
                visible: view.visible,
            });
        }
    }
}

/// Issues one indirect draw per pool. The caller has set the pipeline.
pub fn draw_pools(
    pass: &mut wgpu::RenderPass<'_>,
    scene: &FrameScene<'_>,
    culler: &InstanceCuller,
    pools: &[PoolKey],
    stats: &mut FrameStats,
) {
    for key in pools {
        let Some(binding) = scene.bindings.get(key) else {
            continue;
        };
        let (Some(mesh), Some(material), Some(slot)) = (
            scene.cache.mesh(binding.mesh),
            scene.cache.material(binding.material),
            culler.slot(key),
        ) else {
            tracing::trace!(pool = ?key, "Pool resources not ready, draw skipped");
            continue;
        };
        pass.set_bind_group(1, &material.bind_group, &[]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_vertex_buffer(1, slot.culled().slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed_indirect(slot.args(), 0);
        stats.draw_calls += 1;
    }
}
