//! Pass scheduler.
//!
//! A camera pipeline owns one [`PassScheduler`] whose chain is fixed at
//! construction. Every frame each pass is offered the pools that match its
//! [`PassFilter`]; a pass matching nothing is skipped without being called,
//! so it never touches shared framebuffer state. Errors and panics inside a
//! pass are logged and counted while the rest of the chain still runs.
//!
//! The scheduler is generic over a [`PassContext`] so the same chain logic
//! drives the GPU frame and the recording frames used in tests.

use std::panic::{self, AssertUnwindSafe};

use vela_core::{MaterialClass, PoolKey, VisibilityGroup};

use crate::culling::VisibleCount;
use crate::error::PassError;

/// What a pass sees of one pool for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolView {
    pub key: PoolKey,
    pub group: VisibilityGroup,
    pub material_class: MaterialClass,
    pub visible: VisibleCount,
    /// Live instances in the pool
    pub instances: u32,
}

/// Visibility-group predicate of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFilter {
    Any,
    Occluder,
    NonOccluder,
}

impl GroupFilter {
    pub fn matches(&self, group: VisibilityGroup) -> bool {
        match self {
            GroupFilter::Any => true,
            GroupFilter::Occluder => group == VisibilityGroup::Occluder,
            GroupFilter::NonOccluder => group == VisibilityGroup::NonOccluder,
        }
    }
}

/// Material-class predicate of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialFilter {
    Any,
    Opaque,
    Cutoff,
    Blended,
    Transparent,
    /// Opaque and cutoff materials
    DepthWriting,
}

impl MaterialFilter {
    pub fn matches(&self, class: MaterialClass) -> bool {
        match self {
            MaterialFilter::Any => true,
            MaterialFilter::Opaque => class == MaterialClass::Opaque,
            MaterialFilter::Cutoff => class == MaterialClass::Cutoff,
            MaterialFilter::Blended => class == MaterialClass::Blended,
            MaterialFilter::Transparent => class == MaterialClass::Transparent,
            MaterialFilter::DepthWriting => class.writes_depth(),
        }
    }
}

/// Pool predicates of a pass, evaluated once per pool per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassFilter {
    pub group: GroupFilter,
    pub material: MaterialFilter,
    /// Drop pools known to have no survivors.
    pub skip_culled: bool,
}

impl PassFilter {
    pub const fn new(group: GroupFilter, material: MaterialFilter) -> Self {
        Self {
            group,
            material,
            skip_culled: true,
        }
    }

    /// Keeps pools even when their survivor count is known to be zero.
    pub const fn including_culled(mut self) -> Self {
        self.skip_culled = false;
        self
    }

    /// Group and material match, ignoring visibility.
    pub fn selects(&self, view: &PoolView) -> bool {
        self.group.matches(view.group) && self.material.matches(view.material_class)
    }

    pub fn matches(&self, view: &PoolView) -> bool {
        self.selects(view) && !(self.skip_culled && (view.instances == 0 || view.visible.is_culled()))
    }
}

/// Per-frame state a pass chain runs against.
pub trait FramePools {
    fn pool_views(&self) -> &[PoolView];
}

/// Binds a frame type to the scheduler.
pub trait PassContext: 'static {
    type Frame<'f>: FramePools;
}

/// One stage of the pass chain.
pub trait RenderPass<P: PassContext>: Send {
    /// Returns the unique name of this pass.
    fn name(&self) -> &str;

    /// Pool predicates. `None` marks a frame-level pass that runs every frame
    /// with an empty pool list.
    fn filter(&self) -> Option<PassFilter>;

    /// Returns whether this pass is currently enabled.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Records the pass for the matched pools, in pool order.
    fn execute(&mut self, frame: &mut P::Frame<'_>, pools: &[PoolKey]) -> Result<(), PassError>;
}

/// How a pass fared in the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Executed,
    /// Matched no pools and was not called.
    NoOp,
    Failed,
    Disabled,
}

/// Summary of one [`PassScheduler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleReport {
    pub executed: u32,
    pub noop: u32,
    pub failed: u32,
    pub disabled: u32,
    /// Pools dropped by filters because they were known to be culled
    pub skipped_culled: u32,
}

/// Ordered pass chain of one pipeline.
pub struct PassScheduler<P: PassContext> {
    label: String,
    passes: Vec<Box<dyn RenderPass<P>>>,
    outcomes: Vec<PassOutcome>,
    matched: Vec<PoolKey>,
}

impl<P: PassContext> PassScheduler<P> {
    /// Creates an empty chain. `label` identifies the owning pipeline in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            passes: Vec::new(),
            outcomes: Vec::new(),
            matched: Vec::new(),
        }
    }

    /// Appends a pass to the end of the chain.
    pub fn with_pass(mut self, pass: impl RenderPass<P> + 'static) -> Self {
        self.push(Box::new(pass));
        self
    }

    pub fn push(&mut self, pass: Box<dyn RenderPass<P>>) {
        self.passes.push(pass);
        self.outcomes.push(PassOutcome::NoOp);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|p| p.name())
    }

    /// Outcome of each pass in the last run, in chain order.
    pub fn outcomes(&self) -> &[PassOutcome] {
        &self.outcomes
    }

    /// Runs the whole chain once.
    pub fn run(&mut self, frame: &mut P::Frame<'_>) -> ScheduleReport {
        let mut report = ScheduleReport::default();

        for (pass, outcome) in self.passes.iter_mut().zip(self.outcomes.iter_mut()) {
            if !pass.is_enabled() {
                *outcome = PassOutcome::Disabled;
                report.disabled += 1;
                continue;
            }

            self.matched.clear();
            if let Some(filter) = pass.filter() {
                for view in frame.pool_views() {
                    if filter.matches(view) {
                        self.matched.push(view.key);
                    } else if filter.selects(view) {
                        report.skipped_culled += 1;
                    }
                }
                if self.matched.is_empty() {
                    *outcome = PassOutcome::NoOp;
                    report.noop += 1;
                    continue;
                }
            }

            let matched = &self.matched;
            let result = panic::catch_unwind(AssertUnwindSafe(|| pass.execute(frame, matched)));
            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.message),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            match error {
                None => {
                    *outcome = PassOutcome::Executed;
                    report.executed += 1;
                }
                Some(message) => {
                    tracing::error!(
                        pass = %pass.name(),
                        pipeline = %self.label,
                        error = %message,
                        "Render pass failed"
                    );
                    *outcome = PassOutcome::Failed;
                    report.failed += 1;
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vela_core::{MaterialId, MeshId};

    struct Recording;

    #[derive(Default)]
    struct RecordingFrame {
        views: Vec<PoolView>,
        calls: Vec<(String, Vec<PoolKey>)>,
        draws: HashMap<PoolKey, u32>,
    }

    impl FramePools for RecordingFrame {
        fn pool_views(&self) -> &[PoolView] {
            &self.views
        }
    }

    impl PassContext for Recording {
        type Frame<'f> = RecordingFrame;
    }

    enum Behavior {
        Draw,
        Fail,
        Panic,
    }

    struct TestPass {
        name: &'static str,
        filter: Option<PassFilter>,
        behavior: Behavior,
    }

    impl TestPass {
        fn new(name: &'static str, filter: Option<PassFilter>) -> Self {
            Self {
                name,
                filter,
                behavior: Behavior::Draw,
            }
        }

        fn behaving(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }
    }

    impl RenderPass<Recording> for TestPass {
        fn name(&self) -> &str {
            self.name
        }

        fn filter(&self) -> Option<PassFilter> {
            self.filter
        }

        fn execute(&mut self, frame: &mut RecordingFrame, pools: &[PoolKey]) -> Result<(), PassError> {
            match self.behavior {
                Behavior::Fail => return Err(PassError::new("shader missing")),
                Behavior::Panic => panic!("boom"),
                Behavior::Draw => {}
            }
            frame.calls.push((self.name.to_string(), pools.to_vec()));
            for key in pools {
                *frame.draws.entry(*key).or_default() += 1;
            }
            Ok(())
        }
    }

    fn view(n: u64, group: VisibilityGroup, class: MaterialClass, visible: VisibleCount) -> PoolView {
        PoolView {
            key: PoolKey::new(MeshId(n), MaterialId(n)),
            group,
            material_class: class,
            visible,
            instances: 4,
        }
    }

    const OPAQUE: PassFilter = PassFilter::new(GroupFilter::Any, MaterialFilter::DepthWriting);

    #[test]
    fn test_chain_runs_in_construction_order() {
        let mut scheduler = PassScheduler::<Recording>::new("camera")
            .with_pass(TestPass::new("begin", None))
            .with_pass(TestPass::new("opaque", Some(OPAQUE)))
            .with_pass(TestPass::new("present", None));
        let mut frame = RecordingFrame {
            views: vec![view(1, VisibilityGroup::Occluder, MaterialClass::Opaque, VisibleCount::Unknown)],
            ..Default::default()
        };

        let report = scheduler.run(&mut frame);
        let names: Vec<&str> = frame.calls.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["begin", "opaque", "present"]);
        assert_eq!(report.executed, 3);
        assert!(frame.calls[0].1.is_empty());
    }

    #[test]
    fn test_zero_match_pass_is_not_called() {
        let mut scheduler = PassScheduler::<Recording>::new("camera").with_pass(TestPass::new(
            "transparent",
            Some(PassFilter::new(GroupFilter::Any, MaterialFilter::Transparent)),
        ));
        let mut frame = RecordingFrame {
            views: vec![view(1, VisibilityGroup::NonOccluder, MaterialClass::Opaque, VisibleCount::Unknown)],
            ..Default::default()
        };

        let report = scheduler.run(&mut frame);
        assert!(frame.calls.is_empty());
        assert_eq!(report.noop, 1);
        assert_eq!(scheduler.outcomes(), &[PassOutcome::NoOp]);
    }

    #[test]
    fn test_fully_culled_pool_gets_no_draws() {
        let mut scheduler =
            PassScheduler::<Recording>::new("camera").with_pass(TestPass::new("opaque", Some(OPAQUE)));
        let culled = view(1, VisibilityGroup::NonOccluder, MaterialClass::Opaque, VisibleCount::Known(0));
        let visible = view(2, VisibilityGroup::NonOccluder, MaterialClass::Opaque, VisibleCount::Known(3));
        let unknown = view(3, VisibilityGroup::NonOccluder, MaterialClass::Cutoff, VisibleCount::Unknown);
        let mut frame = RecordingFrame {
            views: vec![culled, visible, unknown],
            ..Default::default()
        };

        let report = scheduler.run(&mut frame);
        assert_eq!(frame.draws.get(&culled.key), None);
        assert_eq!(frame.draws.get(&visible.key), Some(&1));
        assert_eq!(frame.draws.get(&unknown.key), Some(&1));
        assert_eq!(report.skipped_culled, 1);
    }

    #[test]
    fn test_only_culled_pools_make_pass_noop() {
        let mut scheduler =
            PassScheduler::<Recording>::new("camera").with_pass(TestPass::new("opaque", Some(OPAQUE)));
        let mut frame = RecordingFrame {
            views: vec![view(1, VisibilityGroup::Occluder, MaterialClass::Opaque, VisibleCount::Known(0))],
            ..Default::default()
        };
        let report = scheduler.run(&mut frame);
        assert_eq!(report.noop, 1);
        assert!(frame.draws.is_empty());
    }

    #[test]
    fn test_group_filter_splits_occluders() {
        let occluders = PassFilter::new(GroupFilter::Occluder, MaterialFilter::DepthWriting);
        let mut scheduler =
            PassScheduler::<Recording>::new("camera").with_pass(TestPass::new("occluder depth", Some(occluders)));
        let occluder = view(1, VisibilityGroup::Occluder, MaterialClass::Cutoff, VisibleCount::Unknown);
        let other = view(2, VisibilityGroup::NonOccluder, MaterialClass::Opaque, VisibleCount::Unknown);
        let mut frame = RecordingFrame {
            views: vec![occluder, other],
            ..Default::default()
        };
        scheduler.run(&mut frame);
        assert_eq!(frame.calls, vec![("occluder depth".to_string(), vec![occluder.key])]);
    }

    #[test]
    fn test_failures_do_not_stop_the_chain() {
        let mut scheduler = PassScheduler::<Recording>::new("camera")
            .with_pass(TestPass::new("broken", None).behaving(Behavior::Fail))
            .with_pass(TestPass::new("panicky", None).behaving(Behavior::Panic))
            .with_pass(TestPass::new("present", None));
        let mut frame = RecordingFrame::default();

        let report = scheduler.run(&mut frame);
        assert_eq!(report.failed, 2);
        assert_eq!(report.executed, 1);
        assert_eq!(frame.calls.len(), 1);
        assert_eq!(
            scheduler.outcomes(),
            &[PassOutcome::Failed, PassOutcome::Failed, PassOutcome::Executed]
        );

        // The chain keeps working on the next frame.
        let report = scheduler.run(&mut frame);
        assert_eq!(report.executed, 1);
    }

    #[test]
    fn test_including_culled_keeps_zero_pools() {
        let filter = PassFilter::new(GroupFilter::Any, MaterialFilter::Any).including_culled();
        let culled = view(1, VisibilityGroup::Occluder, MaterialClass::Opaque, VisibleCount::Known(0));
        assert!(filter.matches(&culled));
        assert!(!OPAQUE.matches(&culled));
    }
}
