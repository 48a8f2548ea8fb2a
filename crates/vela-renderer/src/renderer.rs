//! Render-thread entry point.

use std::sync::Arc;

use vela_core::{DeferredFrameQueue, DrainReport, FrameQueueSender};

use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameSettings, FrameStats};
use crate::ids::TargetId;
use crate::light::DirectionalLight;
use crate::passes::PassPipelines;
use crate::pipeline_set::{EffectFactory, PipelineSet};
use crate::resources::{AssetSource, LiveCounts};
use crate::world::{PoolSyncReport, RenderWorld};

/// What one [`Renderer::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub frame: u64,
    pub drain: DrainReport,
    pub pools: PoolSyncReport,
    pub stats: FrameStats,
    /// Pipelines torn down because their camera or target vanished
    pub torn_down: usize,
    /// Retired buffers destroyed after their fence signaled
    pub retired: usize,
}

/// Owns the render world, its command queue and every camera pipeline.
///
/// Lives on the render thread. The simulation thread talks to it only
/// through the [`FrameQueueSender`] from [`Renderer::sender`].
pub struct Renderer {
    ctx: Arc<RenderContext>,
    pipelines: PassPipelines,
    world: RenderWorld,
    set: PipelineSet,
    queue: DeferredFrameQueue<RenderWorld>,
    config: RendererConfig,
    frame: u64,
}

impl Renderer {
    pub fn new(ctx: Arc<RenderContext>, assets: Box<dyn AssetSource>, config: RendererConfig) -> Self {
        let pipelines = PassPipelines::new(&ctx);
        let light = DirectionalLight::from_config(&config.light);
        let world = RenderWorld::new(Arc::clone(&ctx), assets, config.initial_pool_capacity, light);
        tracing::info!(
            readback = ?config.readback,
            hiz = config.hiz_enabled,
            "Renderer initialized"
        );
        Self {
            ctx,
            pipelines,
            world,
            set: PipelineSet::default(),
            queue: DeferredFrameQueue::new(config.stall_warning_drains),
            config,
            frame: 0,
        }
    }

    /// Replaces the post-processing chain of pipelines created from now on.
    pub fn with_effects(mut self, effects: EffectFactory) -> Self {
        self.set = PipelineSet::new(effects);
        self
    }

    pub fn sender(&self) -> FrameQueueSender<RenderWorld> {
        self.queue.sender()
    }

    pub fn ctx(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn world(&self) -> &RenderWorld {
        &self.world
    }

    pub fn pipelines(&self) -> &PipelineSet {
        &self.set
    }

    pub fn queue(&self) -> &DeferredFrameQueue<RenderWorld> {
        &self.queue
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Drains the queue, mirrors pools to the GPU and renders every camera.
    pub fn render_frame(&mut self) -> FrameReport {
        self.frame += 1;
        let drain = self.queue.drain(&mut self.world);
        let pools = self.world.sync_pools();
        let torn_down = self.set.sync(&self.ctx, &self.world, self.config.readback);

        let settings = FrameSettings::from_config(&self.config);
        let stats = self.set.render(&self.ctx, &self.pipelines, &self.world, settings);
        let retired = self.world.collect_retired();

        tracing::trace!(
            frame = self.frame,
            applied = drain.applied,
            draws = stats.draw_calls,
            skipped = stats.skipped_pools,
            "Frame rendered"
        );
        FrameReport {
            frame: self.frame,
            drain,
            pools,
            stats,
            torn_down,
            retired,
        }
    }

    /// Reads a render target back as RGBA8 rows.
    pub fn read_target(&self, id: TargetId) -> RenderResult<Vec<u8>> {
        self.world
            .target(id)
            .ok_or(RenderError::MissingTarget(id))?
            .read_pixels(&self.ctx)
    }

    /// Waits for in-flight GPU work and releases every resource. Returns the
    /// resources that were still referenced; non-zero counts are leaks.
    pub fn shutdown(mut self) -> LiveCounts {
        let drain = self.queue.drain(&mut self.world);
        if drain.retried > 0 {
            tracing::debug!(retried = drain.retried, "Pending commands dropped at shutdown");
        }
        self.ctx.wait_idle();
        self.set.clear();
        let leaked = self.world.shutdown();
        if leaked.total() > 0 {
            tracing::error!(
                meshes = leaked.meshes,
                materials = leaked.materials,
                textures = leaked.textures,
                "Resources still referenced at shutdown"
            );
        } else {
            tracing::info!(frames = self.frame, "Renderer shut down");
        }
        leaked
    }
}
