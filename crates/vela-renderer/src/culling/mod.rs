//! Culling stage.
//!
//! Phase (a) frustum-culls occluder pools. After the occluder depth prepass
//! the depth buffer is reduced into a Hi-Z pyramid and phase (b) culls the
//! remaining pools against both the frustum and the pyramid. Survivor counts
//! come back to the CPU through [`CountReadback`].

mod cull;
mod hiz;
mod readback;
mod visibility;

pub use cull::{
    hiz_level, instance_in_frustum, occluded_by, project_bounds, CullParams, CullPipeline, CullRequest, CullSlot, DrawArgs,
    InstanceCuller, ScreenRect, INSTANCE_COUNT_OFFSET,
};
pub use hiz::{level_count, level_size, plan, HiZBuilder, HiZPyramid, HiZStep, HiZStepKind, HIZ_FORMAT};
pub use readback::{view_epoch, CountReadback};
pub use visibility::{CullPhase, VisibilityQuery, VisibilityTable, VisibleCount};
