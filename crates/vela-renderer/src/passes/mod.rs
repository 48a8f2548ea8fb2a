//! The canonical pass chain.
//!
//! frame begin → occluder depth → Hi-Z → non-occluder depth → lighting →
//! opaque → blended → transparency → post effects → present

mod blended;
mod depth_prepass;
mod frame_begin;
mod hiz_pass;
mod lighting;
mod opaque;
mod pipelines;
mod post;
mod present;
mod transparency;

pub use blended::{blend_runs, BlendedPass};
pub use depth_prepass::DepthPrepass;
pub use frame_begin::FrameBeginPass;
pub use hiz_pass::HiZPass;
pub use lighting::LightingPass;
pub use opaque::OpaquePass;
pub use pipelines::{texture_bind_group, texture_layout, PassPipelines};
pub use post::{next_target, ExposureToneMap, PostEffect, PostPass};
pub use present::PresentPass;
pub use transparency::{wboit_weight, TransparencyPass, WboitPixel, REVEAL_EPSILON};

use crate::frame::GpuPasses;
use crate::scheduler::PassScheduler;

/// Builds the fixed chain of one camera pipeline with `effects` appended
/// before presentation.
pub fn canonical_chain(label: impl Into<String>, effects: Vec<Box<dyn PostEffect>>) -> PassScheduler<GpuPasses> {
    let mut scheduler = PassScheduler::new(label)
        .with_pass(FrameBeginPass)
        .with_pass(DepthPrepass::occluders())
        .with_pass(HiZPass)
        .with_pass(DepthPrepass::non_occluders())
        .with_pass(LightingPass)
        .with_pass(OpaquePass)
        .with_pass(BlendedPass)
        .with_pass(TransparencyPass::default());
    for effect in effects {
        scheduler.push(Box::new(PostPass::new(effect)));
    }
    scheduler.with_pass(PresentPass)
}

/// Depth attachment tested but never written.
fn read_only_depth(view: &wgpu::TextureView) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: None,
    }
}
