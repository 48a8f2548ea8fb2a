//! Vela Renderer
//!
//! GPU-driven frame core on wgpu.
//!
//! # Architecture
//!
//! - [`world::RenderWorld`] - render-thread scene state, mutated only by deferred commands
//! - [`scene::InstanceScene`] - instances, pool bindings and their resource references
//! - [`instances::GpuInstancePool`] - GPU mirror of an instance pool, grown behind fences
//! - [`culling`] - frustum and Hi-Z compute culling with survivor readback
//! - [`scheduler::PassScheduler`] - ordered pass chain with predicate filtering
//! - [`passes`] - the canonical chain, WBOIT compositor and post effects
//! - [`pipeline_set::PipelineSet`] - one pipeline per camera
//! - [`resources::ResourceCache`] - reference-counted meshes, materials and textures
//!
//! # Example
//!
//! ```ignore
//! use vela_renderer::{commands, Renderer, RendererConfig};
//!
//! let mut renderer = Renderer::new(ctx, Box::new(assets), RendererConfig::default());
//! let sender = renderer.sender();
//! sender.enqueue(commands::create_target(target, 1280, 720));
//! sender.enqueue(commands::set_camera(camera, Camera::default(), target));
//!
//! let report = renderer.render_frame();
//! ```

// Core abstractions
pub mod config;
pub mod context;
pub mod error;
pub mod ids;

// Scene and resources
pub mod camera;
pub mod commands;
pub mod fence;
pub mod instances;
pub mod light;
pub mod resources;
pub mod scene;
pub mod vertex;
pub mod world;

// Frame
pub mod culling;
pub mod frame;
pub mod passes;
pub mod pipeline;
pub mod pipeline_set;
pub mod renderer;
pub mod scheduler;
pub mod targets;

// Re-exports for convenience
pub use camera::{Camera, CameraUniform};
pub use config::{LightConfig, ReadbackMode, RendererConfig};
pub use context::RenderContext;
pub use error::{PassError, RenderError, RenderResult};
pub use frame::{FrameSettings, FrameStats};
pub use ids::{CameraId, TargetId};
pub use light::DirectionalLight;
pub use passes::{ExposureToneMap, PostEffect};
pub use pipeline_set::{FramePipeline, PipelineSet};
pub use renderer::{FrameReport, Renderer};
pub use resources::{AssetSource, AssetState, AssetStore, BlendMode, MaterialData, MeshData, TextureData};
pub use scene::{InstanceScene, PoolBinding, SceneWorld};
pub use scheduler::{PassFilter, PassScheduler, RenderPass, ScheduleReport};
pub use world::{RenderTarget, RenderWorld};
