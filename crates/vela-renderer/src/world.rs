//! Render-thread world state, the context every deferred command runs on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use vela_core::{InstanceRegistry, OwnerId, PoolKey};

use crate::camera::Camera;
use crate::context::{RenderContext, OUTPUT_FORMAT};
use crate::error::{RenderError, RenderResult};
use crate::fence::RetiredBuffers;
use crate::frame::FrameScene;
use crate::ids::{CameraId, TargetId};
use crate::instances::GpuInstancePool;
use crate::light::DirectionalLight;
use crate::resources::{AssetSource, LiveCounts, ResourceCache, WgpuBackend};
use crate::scene::{InstanceScene, PoolBinding, SceneWorld};
use crate::targets::Attachment;

/// A camera and the target it renders into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraEntry {
    pub camera: Camera,
    pub target: TargetId,
}

/// Offscreen image a camera presents to.
pub struct RenderTarget {
    attachment: Attachment,
    width: u32,
    height: u32,
    generation: u64,
}

impl RenderTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, generation: u64) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidSize { width, height });
        }
        let attachment = Attachment::new(
            device,
            "Render Target",
            width,
            height,
            OUTPUT_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        );
        Ok(Self {
            attachment,
            width,
            height,
            generation,
        })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.attachment.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.attachment.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Changes on every resize.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copies the target back to the CPU as tightly packed RGBA8 rows.
    /// Blocks until the GPU has finished.
    pub fn read_pixels(&self, ctx: &RenderContext) -> RenderResult<Vec<u8>> {
        let unpadded = self.width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Render Target Readback"),
            size: (padded * self.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx.create_encoder("Render Target Readback");
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.attachment.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        ctx.submit(encoder);

        let (sender, receiver) = std::sync::mpsc::channel();
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        ctx.wait_idle();
        receiver
            .recv()
            .map_err(|err| RenderError::Readback(err.to_string()))?
            .map_err(|err| RenderError::Readback(err.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded * self.height) as usize);
        {
            let mapped = buffer.slice(..).get_mapped_range();
            for row in mapped.chunks_exact(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();
        buffer.destroy();
        Ok(pixels)
    }

    pub fn destroy(&self) {
        self.attachment.destroy();
    }
}

/// Everything the render thread owns about the scene.
pub struct RenderWorld {
    ctx: Arc<RenderContext>,
    pub(crate) scene: InstanceScene,
    pub(crate) gpu_pools: BTreeMap<PoolKey, GpuInstancePool>,
    pub(crate) cameras: HashMap<CameraId, CameraEntry>,
    pub(crate) targets: HashMap<TargetId, RenderTarget>,
    pub(crate) light: DirectionalLight,
    retired: RetiredBuffers,
    next_generation: u64,
}

/// What [`RenderWorld::sync_pools`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSyncReport {
    pub created: u32,
    pub grown: u32,
    pub uploaded: u32,
    pub removed: u32,
}

impl RenderWorld {
    pub fn new(
        ctx: Arc<RenderContext>,
        assets: Box<dyn AssetSource>,
        initial_pool_capacity: usize,
        light: DirectionalLight,
    ) -> Self {
        let scene = InstanceScene::new(ResourceCache::new(Arc::clone(&ctx)), assets, initial_pool_capacity);
        Self {
            ctx,
            scene,
            gpu_pools: BTreeMap::new(),
            cameras: HashMap::new(),
            targets: HashMap::new(),
            light,
            retired: RetiredBuffers::new(),
            next_generation: 0,
        }
    }

    pub fn ctx(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn scene(&self) -> &InstanceScene {
        &self.scene
    }

    pub fn registry(&self) -> &InstanceRegistry {
        self.scene.registry()
    }

    pub fn cache(&self) -> &ResourceCache {
        self.scene.cache()
    }

    pub fn camera(&self, id: CameraId) -> Option<&CameraEntry> {
        self.cameras.get(&id)
    }

    pub fn cameras(&self) -> impl Iterator<Item = (&CameraId, &CameraEntry)> {
        self.cameras.iter()
    }

    pub fn target(&self, id: TargetId) -> Option<&RenderTarget> {
        self.targets.get(&id)
    }

    pub fn light(&self) -> &DirectionalLight {
        &self.light
    }

    pub fn binding(&self, key: &PoolKey) -> Option<&PoolBinding> {
        self.scene.binding(key)
    }

    /// Returns true while an add for `owner` waits on its assets.
    pub fn is_pending(&self, owner: OwnerId) -> bool {
        self.scene.is_pending(owner)
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub(crate) fn frame_scene(&self) -> FrameScene<'_> {
        FrameScene {
            registry: &self.scene.registry,
            gpu_pools: &self.gpu_pools,
            bindings: &self.scene.bindings,
            cache: &self.scene.cache,
            light: &self.light,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn set_camera(&mut self, id: CameraId, camera: Camera, target: TargetId) {
        self.cameras.insert(id, CameraEntry { camera, target });
    }

    pub fn remove_camera(&mut self, id: CameraId) -> bool {
        self.cameras.remove(&id).is_some()
    }

    pub fn create_target(&mut self, id: TargetId, width: u32, height: u32) -> RenderResult<()> {
        let generation = self.next_generation();
        let target = RenderTarget::new(self.ctx.device(), width, height, generation)?;
        if let Some(old) = self.targets.insert(id, target) {
            old.destroy();
        }
        tracing::debug!(target_id = %id, width, height, "Render target created");
        Ok(())
    }

    /// Recreates the target at a new size. Pipelines rendering into it
    /// regenerate their framebuffers and Hi-Z pyramid on the next frame.
    pub fn resize_target(&mut self, id: TargetId, width: u32, height: u32) -> RenderResult<()> {
        if !self.targets.contains_key(&id) {
            return Err(RenderError::MissingTarget(id));
        }
        if self.targets.get(&id).is_some_and(|t| t.size() == (width, height)) {
            return Ok(());
        }
        self.create_target(id, width, height)
    }

    pub fn remove_target(&mut self, id: TargetId) -> bool {
        match self.targets.remove(&id) {
            Some(target) => {
                target.destroy();
                true
            }
            None => false,
        }
    }

    pub fn set_light(&mut self, light: DirectionalLight) {
        self.light = light;
    }

    /// Drops empty pools and mirrors every pool's changes to the GPU.
    pub fn sync_pools(&mut self) -> PoolSyncReport {
        let mut report = PoolSyncReport::default();

        for key in self.scene.remove_empty_pools() {
            if let Some(gpu) = self.gpu_pools.remove(&key) {
                gpu.retire(&mut self.retired, self.ctx.queue());
            }
            report.removed += 1;
        }

        for pool in self.scene.registry.pools_mut() {
            let key = pool.key();
            match self.gpu_pools.get_mut(&key) {
                Some(gpu) => {
                    let sync = gpu.sync(&self.ctx, pool, &mut self.retired);
                    report.grown += u32::from(sync.grew);
                    report.uploaded += u32::from(!sync.writes.is_empty());
                }
                None => {
                    self.gpu_pools.insert(key, GpuInstancePool::new(&self.ctx, pool));
                    report.created += 1;
                }
            }
        }
        report
    }

    /// Destroys retired buffers whose fences have signaled.
    pub fn collect_retired(&mut self) -> usize {
        let _ = self.ctx.device().poll(wgpu::Maintain::Poll);
        self.retired.collect()
    }

    /// Waits for the GPU and releases everything. Returns resources that were
    /// still referenced besides the pools' own bindings.
    pub fn shutdown(&mut self) -> LiveCounts {
        self.ctx.wait_idle();
        self.retired.flush(self.ctx.device());
        for (_, gpu) in std::mem::take(&mut self.gpu_pools) {
            gpu.retire(&mut self.retired, self.ctx.queue());
        }
        for (_, target) in self.targets.drain() {
            target.destroy();
        }
        self.ctx.wait_idle();
        self.retired.flush(self.ctx.device());
        self.scene.shutdown()
    }
}

impl SceneWorld for RenderWorld {
    type Backend = WgpuBackend;

    fn instance_scene(&mut self) -> &mut InstanceScene {
        &mut self.scene
    }
}
