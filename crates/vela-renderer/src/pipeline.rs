//! Render pipeline builder.

use crate::context::DEPTH_FORMAT;

/// Depth state of a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct DepthConfig {
    pub write: bool,
    pub compare: wgpu::CompareFunction,
}

impl DepthConfig {
    /// Writes depth, passes on `Less`.
    pub const PREPASS: Self = Self {
        write: true,
        compare: wgpu::CompareFunction::Less,
    };

    /// Tests against an already populated depth buffer without writing it.
    pub const READ_ONLY: Self = Self {
        write: false,
        compare: wgpu::CompareFunction::LessEqual,
    };
}

/// Builder for render pipelines.
///
/// Shaders are expected to expose `vs_main` and, when color targets or a
/// fragment stage are requested, `fs_main`.
pub struct PipelineConfig<'a> {
    label: &'a str,
    shader_source: &'a str,
    bind_group_layouts: &'a [&'a wgpu::BindGroupLayout],
    vertex_layouts: Vec<wgpu::VertexBufferLayout<'static>>,
    targets: Vec<Option<wgpu::ColorTargetState>>,
    depth: Option<DepthConfig>,
    fragment: bool,
    cull_mode: Option<wgpu::Face>,
}

impl<'a> PipelineConfig<'a> {
    pub fn new(
        label: &'a str,
        shader_source: &'a str,
        bind_group_layouts: &'a [&'a wgpu::BindGroupLayout],
    ) -> Self {
        Self {
            label,
            shader_source,
            bind_group_layouts,
            vertex_layouts: Vec::new(),
            targets: Vec::new(),
            depth: None,
            fragment: false,
            cull_mode: Some(wgpu::Face::Back),
        }
    }

    pub fn with_vertex_layouts(mut self, layouts: Vec<wgpu::VertexBufferLayout<'static>>) -> Self {
        self.vertex_layouts = layouts;
        self
    }

    /// Adds a color target with the given blend state.
    pub fn with_target(mut self, format: wgpu::TextureFormat, blend: Option<wgpu::BlendState>) -> Self {
        self.targets.push(Some(wgpu::ColorTargetState {
            format,
            blend,
            write_mask: wgpu::ColorWrites::ALL,
        }));
        self.fragment = true;
        self
    }

    /// Adds a fully specified color target.
    pub fn with_target_state(mut self, state: wgpu::ColorTargetState) -> Self {
        self.targets.push(Some(state));
        self.fragment = true;
        self
    }

    pub fn with_depth(mut self, depth: DepthConfig) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Runs `fs_main` even without color targets, e.g. for alpha-tested depth.
    pub fn with_fragment(mut self) -> Self {
        self.fragment = true;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: Option<wgpu::Face>) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn build(self, device: &wgpu::Device) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(self.label),
            source: wgpu::ShaderSource::Wgsl(self.shader_source.into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(self.label),
            bind_group_layouts: self.bind_group_layouts,
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(self.label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &self.vertex_layouts,
                compilation_options: Default::default(),
            },
            fragment: self.fragment.then(|| wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &self.targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: self.cull_mode,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: self.depth.map(|d| wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: d.write,
                depth_compare: d.compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

/// Builds a compute pipeline for `main` of a WGSL module.
pub fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    shader_source: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(shader_source.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Standard premultiplied compositing: `src + dst * (1 - src.a)`.
pub const PREMULTIPLIED_OVER: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
        operation: wgpu::BlendOperation::Add,
    },
};
