//! Simulation side of the demo: a transform hierarchy whose changes are sent
//! to the render thread as deferred commands.

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use glam::{Mat4, Quat, Vec3};
use vela_core::{
    FrameQueueSender, InstanceTransform, MaterialClass, MaterialId, MeshId, NodeHandle, OwnerId,
    TransformArena, VisibilityGroup,
};
use vela_renderer::commands;
use vela_renderer::{AssetStore, BlendMode, Camera, CameraId, MaterialData, MeshData, RenderWorld, TargetId};

use crate::clock::{LoopClock, ShutdownFlag};
use crate::config::{DemoConfig, RuntimeConfig};
use crate::error::RuntimeResult;

pub const CUBE: MeshId = MeshId(1);
pub const PANEL: MeshId = MeshId(2);

pub const STONE: MaterialId = MaterialId(1);
pub const FOLIAGE: MaterialId = MaterialId(2);
pub const GLOW: MaterialId = MaterialId(3);
pub const SHADOW: MaterialId = MaterialId(4);
pub const GLASS: MaterialId = MaterialId(5);

/// Registers the demo meshes and materials. The glass material is left
/// pending so instances using it wait in the queue until it loads.
pub fn populate_assets(assets: &AssetStore) {
    assets.insert_mesh(CUBE, MeshData::cube(1.0));
    assets.insert_mesh(PANEL, MeshData::quad(1.0));
    assets.insert_material(STONE, MaterialData::opaque([0.6, 0.6, 0.65, 1.0]));
    assets.insert_material(
        FOLIAGE,
        MaterialData {
            base_color: [0.2, 0.7, 0.25, 0.8],
            class: MaterialClass::Cutoff,
            alpha_cutoff: 0.5,
            ..Default::default()
        },
    );
    assets.insert_material(GLOW, MaterialData::blended([1.0, 0.6, 0.2, 0.5], BlendMode::Additive));
    assets.insert_material(SHADOW, MaterialData::blended([0.3, 0.3, 0.4, 0.6], BlendMode::Multiplicative));
    assets.mark_material_pending(GLASS);
}

pub fn glass_material() -> MaterialData {
    MaterialData::transparent([0.4, 0.7, 1.0, 0.35])
}

/// Material and mesh of the `i`-th non-occluder.
fn detail_kind(i: u32) -> (MeshId, MaterialId) {
    match i % 5 {
        0 => (PANEL, STONE),
        1 => (CUBE, FOLIAGE),
        2 => (PANEL, GLOW),
        3 => (PANEL, SHADOW),
        _ => (CUBE, GLASS),
    }
}

/// An instance spawned by the demo.
#[derive(Debug, Clone, Copy)]
struct Spawned {
    owner: OwnerId,
    mesh: MeshId,
    material: MaterialId,
    group: VisibilityGroup,
}

/// Demo scene state owned by the simulation thread.
pub struct Simulation {
    arena: TransformArena,
    root: NodeHandle,
    spawned: HashMap<NodeHandle, Spawned>,
    order: Vec<NodeHandle>,
    sender: FrameQueueSender<RenderWorld>,
    assets: AssetStore,
    config: DemoConfig,
    camera: CameraId,
    target: TargetId,
    changed: Vec<NodeHandle>,
    next_owner: u64,
    tick: u64,
    elapsed: f64,
}

impl Simulation {
    pub fn new(
        sender: FrameQueueSender<RenderWorld>,
        assets: AssetStore,
        config: DemoConfig,
        width: u32,
        height: u32,
    ) -> RuntimeResult<Self> {
        let mut arena = TransformArena::new();
        let root = arena.insert(Mat4::IDENTITY, None)?;
        let camera = CameraId::new();
        let target = TargetId::new();

        sender.enqueue(commands::create_target(target, width, height));
        sender.enqueue(commands::set_camera(camera, Self::camera_at(0.0), target));

        let mut sim = Self {
            arena,
            root,
            spawned: HashMap::new(),
            order: Vec::new(),
            sender,
            assets,
            config,
            camera,
            target,
            changed: Vec::new(),
            next_owner: 1,
            tick: 0,
            elapsed: 0.0,
        };

        let count = sim.config.instance_count;
        let occluders = (count as f32 * sim.config.occluder_ratio.clamp(0.0, 1.0)).round() as u32;
        let side = (count as f32).sqrt().ceil().max(1.0) as u32;
        for i in 0..count {
            let (x, z) = ((i % side) as f32, (i / side) as f32);
            let offset = (side as f32 - 1.0) * 0.5;
            let position = Vec3::new((x - offset) * 2.0, 0.0, (z - offset) * 2.0);
            if i < occluders {
                let local = Mat4::from_scale_rotation_translation(
                    Vec3::new(1.8, 3.0, 0.3),
                    Quat::IDENTITY,
                    position + Vec3::Y * 1.5,
                );
                sim.spawn(local, CUBE, STONE, VisibilityGroup::Occluder)?;
            } else {
                let (mesh, material) = detail_kind(i);
                let local = Mat4::from_scale_rotation_translation(Vec3::splat(0.6), Quat::IDENTITY, position);
                sim.spawn(local, mesh, material, VisibilityGroup::NonOccluder)?;
            }
        }
        sim.flush_changes();
        tracing::info!(instances = count, occluders, "Demo scene spawned");
        Ok(sim)
    }

    fn camera_at(t: f64) -> Camera {
        let angle = t as f32 * 0.2;
        Camera {
            position: Vec3::new(angle.sin() * 30.0, 12.0, angle.cos() * 30.0),
            ..Default::default()
        }
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn instance_count(&self) -> usize {
        self.spawned.len()
    }

    fn spawn(
        &mut self,
        local: Mat4,
        mesh: MeshId,
        material: MaterialId,
        group: VisibilityGroup,
    ) -> RuntimeResult<NodeHandle> {
        let node = self.arena.insert(local, Some(self.root))?;
        let owner = OwnerId(self.next_owner);
        self.next_owner += 1;
        self.spawned.insert(
            node,
            Spawned {
                owner,
                mesh,
                material,
                group,
            },
        );
        self.order.push(node);
        // The world transform is sent after propagation.
        self.sender.enqueue(commands::add_instance(
            owner,
            mesh,
            material,
            group,
            InstanceTransform::from_mat4(&local),
        ));
        Ok(node)
    }

    /// Sends a transform update for every node whose world transform changed.
    fn flush_changes(&mut self) {
        self.changed.clear();
        self.arena.propagate(&mut self.changed);
        for node in &self.changed {
            let (Some(spawned), Some(world)) = (self.spawned.get(node), self.arena.world(*node)) else {
                continue;
            };
            self.sender
                .enqueue(commands::set_transform(spawned.owner, InstanceTransform::from_mat4(&world)));
        }
    }

    /// Advances the scene by `dt` seconds.
    pub fn step(&mut self, dt: f64) -> RuntimeResult<()> {
        self.tick += 1;
        self.elapsed += dt;

        if self.tick == u64::from(self.config.asset_delay_ticks) {
            self.assets.insert_material(GLASS, glass_material());
            tracing::info!(tick = self.tick, "Glass material loaded");
        }

        let spin = Mat4::from_rotation_y(self.elapsed as f32 * 0.1);
        self.arena.set_local(self.root, spin)?;

        // Bob one non-occluder per tick.
        if !self.order.is_empty() {
            let node = self.order[(self.tick as usize) % self.order.len()];
            if let (Some(spawned), Some(local)) = (self.spawned.get(&node), self.arena.local(node))
                && spawned.group == VisibilityGroup::NonOccluder
            {
                let bob = Mat4::from_translation(Vec3::Y * (self.elapsed as f32).sin() * 0.05);
                self.arena.set_local(node, bob * local)?;
            }
        }

        // Periodically respawn the oldest non-occluder.
        if self.tick % 120 == 0 {
            self.respawn_oldest()?;
        }

        self.sender
            .enqueue(commands::set_camera(self.camera, Self::camera_at(self.elapsed), self.target));
        self.flush_changes();
        Ok(())
    }

    fn respawn_oldest(&mut self) -> RuntimeResult<()> {
        let Some(index) = self
            .order
            .iter()
            .position(|n| self.spawned.get(n).is_some_and(|s| s.group == VisibilityGroup::NonOccluder))
        else {
            return Ok(());
        };
        let node = self.order.remove(index);
        let local = self.arena.local(node).unwrap_or(Mat4::IDENTITY);
        self.arena.remove(node)?;
        if let Some(spawned) = self.spawned.remove(&node) {
            self.sender.enqueue(commands::remove_instance(spawned.owner));
            self.spawn(local, spawned.mesh, spawned.material, spawned.group)?;
        }
        Ok(())
    }

    /// Removes every instance and the camera before shutdown.
    pub fn despawn_all(&mut self) {
        for node in self.order.drain(..) {
            if let Some(spawned) = self.spawned.remove(&node) {
                self.sender.enqueue(commands::remove_instance(spawned.owner));
            }
        }
        self.sender.enqueue(commands::remove_camera(self.camera));
        self.sender.enqueue(commands::remove_target(self.target));
    }
}

/// Totals of a finished simulation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulationSummary {
    pub ticks: u64,
    pub instances: usize,
}

/// Runs the demo simulation until `shutdown` is requested or the configured
/// duration has passed, then despawns the scene.
pub fn run_simulation_loop(
    config: &RuntimeConfig,
    assets: AssetStore,
    shutdown: ShutdownFlag,
    ready: mpsc::Receiver<FrameQueueSender<RenderWorld>>,
) -> RuntimeResult<SimulationSummary> {
    let Ok(sender) = ready.recv() else {
        tracing::warn!("Renderer never started, simulation exits");
        return Ok(SimulationSummary::default());
    };
    populate_assets(&assets);
    let mut sim = Simulation::new(
        sender,
        assets,
        config.demo.clone(),
        config.renderer.width,
        config.renderer.height,
    )?;

    let mut clock = LoopClock::new(&config.simulation);
    let deadline = Instant::now() + Duration::from_secs_f64(config.demo.duration_secs.max(0.0));
    while !shutdown.is_requested() {
        let started = Instant::now();
        let tick = clock.advance(started);
        for _ in 0..tick.steps {
            sim.step(tick.dt)?;
        }
        if started >= deadline {
            tracing::info!(ticks = sim.tick(), "Demo duration reached");
            shutdown.request();
        }
        clock.wait(started);
    }

    let summary = SimulationSummary {
        ticks: sim.tick(),
        instances: sim.instance_count(),
    };
    sim.despawn_all();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::DeferredFrameQueue;
    use vela_renderer::{AssetSource, AssetState};

    fn demo(instance_count: u32) -> DemoConfig {
        DemoConfig {
            instance_count,
            asset_delay_ticks: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_spawn_enqueues_adds_and_transforms() {
        let queue = DeferredFrameQueue::<RenderWorld>::new(8);
        let assets = AssetStore::new();
        let sim = Simulation::new(queue.sender(), assets, demo(10), 64, 64).unwrap();
        assert_eq!(sim.instance_count(), 10);
        // target + camera, then one add and one transform per instance
        assert_eq!(queue.inbox_len(), 2 + 10 + 10);
    }

    #[test]
    fn test_glass_loads_after_delay() {
        let queue = DeferredFrameQueue::<RenderWorld>::new(8);
        let assets = AssetStore::new();
        populate_assets(&assets);
        let mut sim = Simulation::new(queue.sender(), assets.clone(), demo(4), 64, 64).unwrap();
        assert!(matches!(assets.material(GLASS), AssetState::Pending));
        sim.step(1.0 / 60.0).unwrap();
        assert!(matches!(assets.material(GLASS), AssetState::Pending));
        sim.step(1.0 / 60.0).unwrap();
        assert!(matches!(assets.material(GLASS), AssetState::Ready(_)));
    }

    #[test]
    fn test_occluder_share() {
        let queue = DeferredFrameQueue::<RenderWorld>::new(8);
        let sim = Simulation::new(queue.sender(), AssetStore::new(), demo(8), 64, 64).unwrap();
        let occluders = sim
            .spawned
            .values()
            .filter(|s| s.group == VisibilityGroup::Occluder)
            .count();
        assert_eq!(occluders, 2);
    }

    #[test]
    fn test_pools_never_mix_groups() {
        let queue = DeferredFrameQueue::<RenderWorld>::new(8);
        let sim = Simulation::new(queue.sender(), AssetStore::new(), demo(40), 64, 64).unwrap();
        let mut groups = HashMap::new();
        for spawned in sim.spawned.values() {
            let group = *groups
                .entry((spawned.mesh, spawned.material))
                .or_insert(spawned.group);
            assert_eq!(group, spawned.group, "{:?}/{:?}", spawned.mesh, spawned.material);
        }
    }

    #[test]
    fn test_respawn_keeps_instance_count() {
        let queue = DeferredFrameQueue::<RenderWorld>::new(8);
        let mut sim = Simulation::new(queue.sender(), AssetStore::new(), demo(6), 64, 64).unwrap();
        sim.respawn_oldest().unwrap();
        assert_eq!(sim.instance_count(), 6);
        assert_eq!(sim.order.len(), 6);
    }
}
