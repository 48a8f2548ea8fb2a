//! Render thread: owns the GPU device and every GPU object.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

use vela_core::FrameQueueSender;
use vela_renderer::resources::LiveCounts;
use vela_renderer::{AssetStore, FrameStats, RenderContext, RenderWorld, Renderer};

use crate::clock::{LoopClock, ShutdownFlag};
use crate::config::RuntimeConfig;
use crate::error::RuntimeResult;

/// Totals of a finished render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderSummary {
    pub frames: u64,
    pub stats: FrameStats,
    pub pipelines_torn_down: usize,
    /// Resources still referenced at teardown
    pub leaked: LiveCounts,
}

/// Creates the device and renderer, hands the queue's sender to the
/// simulation through `ready`, then renders until `shutdown` is requested.
pub fn run_render_loop(
    config: &RuntimeConfig,
    assets: AssetStore,
    shutdown: ShutdownFlag,
    ready: mpsc::Sender<FrameQueueSender<RenderWorld>>,
) -> RuntimeResult<RenderSummary> {
    let ctx = Arc::new(pollster::block_on(RenderContext::headless())?);
    let mut renderer = Renderer::new(ctx, Box::new(assets), config.renderer.clone());
    if ready.send(renderer.sender()).is_err() {
        tracing::warn!("Simulation thread gone before the renderer started");
        shutdown.request();
    }
    drop(ready);

    let mut clock = LoopClock::new(&config.render);
    let mut summary = RenderSummary::default();
    while !shutdown.is_requested() {
        let started = Instant::now();
        let tick = clock.advance(started);
        if tick.steps > 0 {
            let report = renderer.render_frame();
            summary.frames += 1;
            summary.stats.accumulate(&report.stats);
            summary.pipelines_torn_down += report.torn_down;
            if report.drain.stalled > 0 {
                tracing::warn!(stalled = report.drain.stalled, "Deferred commands stalled");
            }
            if summary.frames % 60 == 0 {
                tracing::debug!(
                    frame = report.frame,
                    pipelines = renderer.pipelines().len(),
                    instances = renderer.world().registry().instance_count(),
                    draws = report.stats.draw_calls,
                    visible = report.stats.visible_instances,
                    "Render loop status"
                );
            }
        }
        clock.wait(started);
    }

    summary.leaked = renderer.shutdown();
    tracing::info!(
        frames = summary.frames,
        draws = summary.stats.draw_calls,
        pass_failures = summary.stats.pass_failures,
        "Render loop finished"
    );
    Ok(summary)
}
