//! GPU pipelines shared by every camera's pass chain.

use crate::context::{RenderContext, COLOR_FORMAT, OUTPUT_FORMAT};
use crate::culling::{CullPipeline, HiZBuilder};
use crate::pipeline::{DepthConfig, PipelineConfig, PREMULTIPLIED_OVER};
use crate::targets::{ACCUM_FORMAT, REVEAL_FORMAT};
use crate::vertex::{instance_layout, MeshVertex};

const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

const MULTIPLICATIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Dst,
        dst_factor: wgpu::BlendFactor::Zero,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// `dst * (1 - src.a)`, the reveal product of weighted transparency.
const REVEAL: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Every pipeline of the canonical pass chain.
pub struct PassPipelines {
    pub depth: wgpu::RenderPipeline,
    pub opaque: wgpu::RenderPipeline,
    pub blended_additive: wgpu::RenderPipeline,
    pub blended_multiplicative: wgpu::RenderPipeline,
    pub wboit_accum: wgpu::RenderPipeline,
    pub resolve_layout: wgpu::BindGroupLayout,
    pub wboit_resolve: wgpu::RenderPipeline,
    pub present_layout: wgpu::BindGroupLayout,
    pub present: wgpu::RenderPipeline,
    pub hiz: HiZBuilder,
    pub cull: CullPipeline,
}

impl PassPipelines {
    pub fn new(ctx: &RenderContext) -> Self {
        let device = ctx.device();
        let geometry_layouts = [ctx.frame_bind_group_layout(), ctx.material_bind_group_layout()];
        let geometry = |label, source| {
            PipelineConfig::new(label, source, &geometry_layouts)
                .with_vertex_layouts(vec![MeshVertex::layout(), instance_layout()])
        };

        let depth = geometry("Depth Prepass Pipeline", include_str!("../shaders/depth.wgsl"))
            .with_depth(DepthConfig::PREPASS)
            .with_fragment()
            .build(device);

        let opaque = geometry("Opaque Pipeline", include_str!("../shaders/opaque.wgsl"))
            .with_target(COLOR_FORMAT, None)
            .with_depth(DepthConfig::READ_ONLY)
            .build(device);

        let blended = |label, blend| {
            geometry(label, include_str!("../shaders/blended.wgsl"))
                .with_target(COLOR_FORMAT, Some(blend))
                .with_depth(DepthConfig::READ_ONLY)
                .with_cull_mode(None)
                .build(device)
        };
        let blended_additive = blended("Additive Blend Pipeline", ADDITIVE);
        let blended_multiplicative = blended("Multiplicative Blend Pipeline", MULTIPLICATIVE);

        let wboit_accum = geometry("WBOIT Accumulate Pipeline", include_str!("../shaders/wboit_accum.wgsl"))
            .with_target(ACCUM_FORMAT, Some(ADDITIVE))
            .with_target_state(wgpu::ColorTargetState {
                format: REVEAL_FORMAT,
                blend: Some(REVEAL),
                write_mask: wgpu::ColorWrites::RED,
            })
            .with_depth(DepthConfig::READ_ONLY)
            .with_cull_mode(None)
            .build(device);

        let resolve_layout = texture_layout(device, "WBOIT Resolve Layout", 2);
        let wboit_resolve = PipelineConfig::new(
            "WBOIT Resolve Pipeline",
            include_str!("../shaders/wboit_resolve.wgsl"),
            &[&resolve_layout],
        )
        .with_target(COLOR_FORMAT, Some(PREMULTIPLIED_OVER))
        .with_cull_mode(None)
        .build(device);

        let present_layout = texture_layout(device, "Present Layout", 1);
        let present = PipelineConfig::new("Present Pipeline", include_str!("../shaders/present.wgsl"), &[
            &present_layout,
        ])
        .with_target(OUTPUT_FORMAT, None)
        .with_cull_mode(None)
        .build(device);

        Self {
            depth,
            opaque,
            blended_additive,
            blended_multiplicative,
            wboit_accum,
            resolve_layout,
            wboit_resolve,
            present_layout,
            present,
            hiz: HiZBuilder::new(ctx),
            cull: CullPipeline::new(ctx),
        }
    }
}

/// Layout of `count` unfilterable 2D textures read with `textureLoad`.
pub fn texture_layout(device: &wgpu::Device, label: &str, count: u32) -> wgpu::BindGroupLayout {
    let entries: Vec<_> = (0..count).map(texture_entry).collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

pub(crate) fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Bind group of texture views for a [`texture_layout`].
pub fn texture_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    views: &[&wgpu::TextureView],
) -> wgpu::BindGroup {
    let entries: Vec<_> = views
        .iter()
        .enumerate()
        .map(|(i, view)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: wgpu::BindingResource::TextureView(view),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}
