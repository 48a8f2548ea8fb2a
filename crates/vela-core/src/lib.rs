//! Vela core data structures
//!
//! GPU-agnostic building blocks of the Vela frame core:
//!
//! - [`instance`] - instance pools keyed by mesh and material
//! - [`queue`] - deferred command handoff between simulation and render threads
//! - [`resource`] - reference-counted shared resources
//! - [`bounds`] - bounding boxes and frustum tests
//! - [`transform`] - index-addressed transform hierarchy

pub mod bounds;
pub mod instance;
pub mod queue;
pub mod resource;
pub mod transform;

pub use bounds::{BoundingBox, Frustum};
pub use instance::{
    InstanceLocation, InstancePool, InstanceRegistry, InstanceTransform, MaterialClass, MaterialId,
    MeshId, OwnerId, PoolDescriptor, PoolError, PoolKey, PoolResult, VisibilityGroup,
};
pub use queue::{
    DeferredCommand, DeferredFrameQueue, DrainReport, FrameQueueSender, StalledCommand, TargetKey,
    TaskState,
};
pub use resource::{Handle, ResourceError, ResourceResult, SharedBytes, SharedRegistry};
pub use transform::{ArenaError, ArenaResult, NodeHandle, TransformArena};
