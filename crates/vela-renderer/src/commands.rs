//! Deferred commands the simulation thread sends to the render world.
//!
//! Entity updates are keyed by their target so that only the latest one per
//! drain takes effect. Additions and removals are never merged. Instance
//! commands run against any [`SceneWorld`], the rest against [`RenderWorld`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use vela_core::{
    DeferredCommand, InstanceTransform, MaterialId, MeshId, OwnerId, TargetKey, TaskState, VisibilityGroup,
};

use crate::camera::Camera;
use crate::ids::{CameraId, TargetId};
use crate::light::DirectionalLight;
use crate::scene::SceneWorld;
use crate::world::RenderWorld;

/// Command against the render world.
pub type WorldCommand = DeferredCommand<RenderWorld>;

fn target_key(tag: &str, id: impl Hash) -> TargetKey {
    let mut hasher = DefaultHasher::new();
    tag.hash(&mut hasher);
    id.hash(&mut hasher);
    TargetKey(hasher.finish())
}

/// Merge key of per-owner transform updates.
pub fn owner_key(owner: OwnerId) -> TargetKey {
    target_key("owner", owner)
}

pub fn camera_key(id: CameraId) -> TargetKey {
    target_key("camera", id)
}

pub fn target_size_key(id: TargetId) -> TargetKey {
    target_key("target-size", id)
}

/// Adds an instance. Retried until its mesh and material have loaded.
pub fn add_instance<W: SceneWorld + 'static>(
    owner: OwnerId,
    mesh: MeshId,
    material: MaterialId,
    group: VisibilityGroup,
    transform: InstanceTransform,
) -> DeferredCommand<W> {
    DeferredCommand::new("add_instance", move |world: &mut W| {
        let scene = world.instance_scene();
        match scene.add_instance(owner, mesh, material, group, transform) {
            Ok(state) => state,
            Err(err) => {
                scene.abandon_pending(owner);
                tracing::warn!(owner = owner.0, error = %err, "Instance not added");
                TaskState::Complete
            }
        }
    })
}

/// Moves an instance. Waits while the owner's add is still pending.
pub fn set_transform<W: SceneWorld + 'static>(owner: OwnerId, transform: InstanceTransform) -> DeferredCommand<W> {
    DeferredCommand::keyed(owner_key(owner), "set_transform", move |world: &mut W| {
        let scene = world.instance_scene();
        if scene.is_pending(owner) {
            return TaskState::Pending;
        }
        if let Err(err) = scene.set_transform(owner, transform) {
            tracing::debug!(owner = owner.0, error = %err, "Transform update dropped");
        }
        TaskState::Complete
    })
}

pub fn remove_instance<W: SceneWorld + 'static>(owner: OwnerId) -> DeferredCommand<W> {
    DeferredCommand::new("remove_instance", move |world: &mut W| {
        let scene = world.instance_scene();
        if scene.is_pending(owner) {
            return TaskState::Pending;
        }
        if let Err(err) = scene.remove_instance(owner) {
            tracing::debug!(owner = owner.0, error = %err, "Instance removal dropped");
        }
        TaskState::Complete
    })
}

/// Creates or updates a camera rendering into `target`.
pub fn set_camera(id: CameraId, camera: Camera, target: TargetId) -> WorldCommand {
    WorldCommand::keyed(camera_key(id), "set_camera", move |world: &mut RenderWorld| {
        world.set_camera(id, camera, target);
        TaskState::Complete
    })
}

pub fn remove_camera(id: CameraId) -> WorldCommand {
    WorldCommand::new("remove_camera", move |world: &mut RenderWorld| {
        if !world.remove_camera(id) {
            tracing::debug!(camera = %id, "Removed camera did not exist");
        }
        TaskState::Complete
    })
}

pub fn create_target(id: TargetId, width: u32, height: u32) -> WorldCommand {
    WorldCommand::new("create_target", move |world: &mut RenderWorld| {
        if let Err(err) = world.create_target(id, width, height) {
            tracing::warn!(target_id = %id, error = %err, "Render target not created");
        }
        TaskState::Complete
    })
}

pub fn resize_target(id: TargetId, width: u32, height: u32) -> WorldCommand {
    WorldCommand::keyed(target_size_key(id), "resize_target", move |world: &mut RenderWorld| {
        if let Err(err) = world.resize_target(id, width, height) {
            tracing::warn!(target_id = %id, error = %err, "Render target not resized");
        }
        TaskState::Complete
    })
}

pub fn remove_target(id: TargetId) -> WorldCommand {
    WorldCommand::new("remove_target", move |world: &mut RenderWorld| {
        world.remove_target(id);
        TaskState::Complete
    })
}

pub fn set_light(light: DirectionalLight) -> WorldCommand {
    WorldCommand::keyed(target_key("light", 0u8), "set_light", move |world: &mut RenderWorld| {
        world.set_light(light);
        TaskState::Complete
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_separate_entity_kinds() {
        let owner = owner_key(OwnerId(7));
        assert_eq!(owner, owner_key(OwnerId(7)));
        assert_ne!(owner, owner_key(OwnerId(8)));

        let camera = CameraId::new();
        let target = TargetId(camera.0);
        assert_ne!(camera_key(camera), target_size_key(target));
    }

    #[test]
    fn test_only_entity_updates_are_keyed() {
        let owner = OwnerId(1);
        let transform = InstanceTransform::default();
        let moved: WorldCommand = set_transform(owner, transform);
        let removed: WorldCommand = remove_instance(owner);
        let added: WorldCommand = add_instance(owner, MeshId(1), MaterialId(1), VisibilityGroup::Occluder, transform);
        assert_eq!(moved.target(), Some(owner_key(owner)));
        assert_eq!(removed.target(), None);
        assert_eq!(added.target(), None);
    }
}
