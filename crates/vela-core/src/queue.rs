//! Deferred frame queue.
//!
//! Commands are produced on the simulation thread through a
//! [`FrameQueueSender`] and applied on the render thread by
//! [`DeferredFrameQueue::drain`], once per render tick and before any GPU work
//! for that frame is recorded.
//!
//! Within one drain cycle, keyed commands are merged: only the most recently
//! enqueued command for a given [`TargetKey`] runs. A command that reports
//! [`TaskState::Pending`] is kept and retried on the next drain.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

/// Merge key of a command, usually the id of the entity it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(pub u64);

/// Outcome of applying a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// A dependency is not available yet; retry on the next drain.
    Pending,
    /// The command took effect (or was deliberately discarded).
    Complete,
}

type Task<C> = Box<dyn FnMut(&mut C) -> TaskState + Send>;

/// A unit of render-thread work produced by the simulation thread.
pub struct DeferredCommand<C> {
    target: Option<TargetKey>,
    label: &'static str,
    task: Task<C>,
}

impl<C> DeferredCommand<C> {
    /// Creates a command that is never merged with others.
    pub fn new(label: &'static str, task: impl FnMut(&mut C) -> TaskState + Send + 'static) -> Self {
        Self {
            target: None,
            label,
            task: Box::new(task),
        }
    }

    /// Creates a command that supersedes earlier commands with the same key.
    pub fn keyed(
        target: TargetKey,
        label: &'static str,
        task: impl FnMut(&mut C) -> TaskState + Send + 'static,
    ) -> Self {
        Self {
            target: Some(target),
            label,
            task: Box::new(task),
        }
    }

    pub fn target(&self) -> Option<TargetKey> {
        self.target
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Runs the command against the consumer context.
    pub fn apply(&mut self, ctx: &mut C) -> TaskState {
        (self.task)(ctx)
    }
}

impl<C> std::fmt::Debug for DeferredCommand<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCommand")
            .field("target", &self.target)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

struct Envelope<C> {
    command: DeferredCommand<C>,
    drains_waited: u32,
    stall_reported: bool,
}

struct Inbox<C> {
    commands: Mutex<Vec<Envelope<C>>>,
}

/// Producer handle. Cheap to clone and safe to move to another thread.
pub struct FrameQueueSender<C> {
    inbox: Arc<Inbox<C>>,
}

impl<C> Clone for FrameQueueSender<C> {
    fn clone(&self) -> Self {
        Self {
            inbox: Arc::clone(&self.inbox),
        }
    }
}

impl<C> FrameQueueSender<C> {
    /// Enqueues a command for the next drain.
    pub fn enqueue(&self, command: DeferredCommand<C>) {
        self.inbox.commands.lock().push(Envelope {
            command,
            drains_waited: 0,
            stall_reported: false,
        });
    }

    /// Enqueues several commands under a single lock.
    pub fn enqueue_all(&self, commands: impl IntoIterator<Item = DeferredCommand<C>>) {
        let mut inbox = self.inbox.commands.lock();
        inbox.extend(commands.into_iter().map(|command| Envelope {
            command,
            drains_waited: 0,
            stall_reported: false,
        }));
    }
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Commands that completed.
    pub applied: usize,
    /// Commands dropped because a newer command had the same key.
    pub merged: usize,
    /// Commands that returned `Pending` and were kept for the next drain.
    pub retried: usize,
    /// Retained commands that have waited past the stall threshold.
    pub stalled: usize,
}

/// A command that has been pending for a suspiciously long time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledCommand {
    pub label: &'static str,
    pub target: Option<TargetKey>,
    pub drains_waited: u32,
}

/// Consumer side of the queue. Owned by the render thread.
pub struct DeferredFrameQueue<C> {
    inbox: Arc<Inbox<C>>,
    batch: Vec<Envelope<C>>,
    retained: Vec<Envelope<C>>,
    keep: Vec<bool>,
    seen: HashSet<TargetKey>,
    stall_warning_drains: u32,
}

impl<C> DeferredFrameQueue<C> {
    /// Creates a queue. Commands pending for `stall_warning_drains` drains are
    /// reported as stalled.
    pub fn new(stall_warning_drains: u32) -> Self {
        Self {
            inbox: Arc::new(Inbox {
                commands: Mutex::new(Vec::new()),
            }),
            batch: Vec::new(),
            retained: Vec::new(),
            keep: Vec::new(),
            seen: HashSet::new(),
            stall_warning_drains: stall_warning_drains.max(1),
        }
    }

    /// Returns a new producer handle.
    pub fn sender(&self) -> FrameQueueSender<C> {
        FrameQueueSender {
            inbox: Arc::clone(&self.inbox),
        }
    }

    /// Number of commands waiting for a retry.
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    /// Number of commands enqueued since the last drain.
    pub fn inbox_len(&self) -> usize {
        self.inbox.commands.lock().len()
    }

    /// Returns true when nothing is queued or retained.
    pub fn is_idle(&self) -> bool {
        self.retained.is_empty() && self.inbox_len() == 0
    }

    /// Retained commands that crossed the stall threshold.
    pub fn stalled(&self) -> Vec<StalledCommand> {
        self.retained
            .iter()
            .filter(|e| e.drains_waited >= self.stall_warning_drains)
            .map(|e| StalledCommand {
                label: e.command.label,
                target: e.command.target,
                drains_waited: e.drains_waited,
            })
            .collect()
    }

    /// Applies every queued command against `ctx`.
    pub fn drain(&mut self, ctx: &mut C) -> DrainReport {
        let mut report = DrainReport::default();

        // Older retried commands go first so newer keyed commands win the merge.
        self.batch.append(&mut self.retained);
        self.batch.append(&mut self.inbox.commands.lock());

        // Walk backwards: the first time a key is seen is its newest command.
        self.keep.clear();
        self.keep.resize(self.batch.len(), true);
        for (i, envelope) in self.batch.iter().enumerate().rev() {
            if let Some(key) = envelope.command.target
                && !self.seen.insert(key)
            {
                self.keep[i] = false;
            }
        }
        self.seen.clear();

        let threshold = self.stall_warning_drains;
        for (mut envelope, keep) in self.batch.drain(..).zip(self.keep.iter().copied()) {
            if !keep {
                report.merged += 1;
                continue;
            }
            match envelope.command.apply(ctx) {
                TaskState::Complete => report.applied += 1,
                TaskState::Pending => {
                    envelope.drains_waited += 1;
                    report.retried += 1;
                    tracing::trace!(
                        command = envelope.command.label,
                        drains = envelope.drains_waited,
                        "Deferred command not ready, retrying next drain"
                    );
                    if envelope.drains_waited >= threshold {
                        report.stalled += 1;
                        if !envelope.stall_reported {
                            envelope.stall_reported = true;
                            tracing::warn!(
                                command = envelope.command.label,
                                target = ?envelope.command.target,
                                drains = envelope.drains_waited,
                                "Deferred command appears stalled"
                            );
                        }
                    }
                    self.retained.push(envelope);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct World {
        values: HashMap<u64, i32>,
        log: Vec<&'static str>,
        ready: bool,
    }

    fn set(key: u64, value: i32) -> DeferredCommand<World> {
        DeferredCommand::keyed(TargetKey(key), "set", move |w: &mut World| {
            w.values.insert(key, value);
            TaskState::Complete
        })
    }

    #[test]
    fn test_same_key_applies_latest_only() {
        let mut queue = DeferredFrameQueue::new(8);
        let sender = queue.sender();
        let mut applied = 0;
        sender.enqueue(set(7, 1));
        sender.enqueue(set(7, 2));
        let mut world = World::default();
        let report = queue.drain(&mut world);
        applied += report.applied;
        assert_eq!(world.values[&7], 2);
        assert_eq!(applied, 1);
        assert_eq!(report.merged, 1);
    }

    #[test]
    fn test_unkeyed_commands_keep_order() {
        let mut queue = DeferredFrameQueue::new(8);
        let sender = queue.sender();
        for label in ["a", "b", "c"] {
            sender.enqueue(DeferredCommand::new(label, move |w: &mut World| {
                w.log.push(label);
                TaskState::Complete
            }));
        }
        let mut world = World::default();
        queue.drain(&mut world);
        assert_eq!(world.log, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pending_command_is_retried() {
        let mut queue = DeferredFrameQueue::new(8);
        let sender = queue.sender();
        sender.enqueue(DeferredCommand::new("wait", |w: &mut World| {
            if w.ready {
                w.log.push("done");
                TaskState::Complete
            } else {
                TaskState::Pending
            }
        }));

        let mut world = World::default();
        let report = queue.drain(&mut world);
        assert_eq!(report.retried, 1);
        assert_eq!(queue.retained_len(), 1);
        assert!(world.log.is_empty());

        world.ready = true;
        let report = queue.drain(&mut world);
        assert_eq!(report.applied, 1);
        assert_eq!(world.log, vec!["done"]);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_newer_command_supersedes_pending_one() {
        let mut queue = DeferredFrameQueue::new(8);
        let sender = queue.sender();
        sender.enqueue(DeferredCommand::keyed(TargetKey(1), "old", |_: &mut World| {
            TaskState::Pending
        }));
        let mut world = World::default();
        queue.drain(&mut world);
        assert_eq!(queue.retained_len(), 1);

        sender.enqueue(set(1, 9));
        let report = queue.drain(&mut world);
        assert_eq!(report.merged, 1);
        assert_eq!(world.values[&1], 9);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_stall_detection() {
        let mut queue = DeferredFrameQueue::new(3);
        queue.sender().enqueue(DeferredCommand::new("never", |_: &mut World| {
            TaskState::Pending
        }));
        let mut world = World::default();
        for _ in 0..2 {
            assert_eq!(queue.drain(&mut world).stalled, 0);
        }
        assert!(queue.stalled().is_empty());
        assert_eq!(queue.drain(&mut world).stalled, 1);
        let stalled = queue.stalled();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].label, "never");
        assert_eq!(stalled[0].drains_waited, 3);
        // Still retained: there is no retry limit.
        assert_eq!(queue.retained_len(), 1);
    }

    #[test]
    fn test_cross_thread_producer() {
        let mut queue = DeferredFrameQueue::new(8);
        let sender = queue.sender();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                sender.enqueue(set(i % 10, i as i32));
            }
        });
        handle.join().unwrap();
        let mut world = World::default();
        let report = queue.drain(&mut world);
        assert_eq!(report.applied, 10);
        assert_eq!(report.merged, 90);
        for key in 0..10 {
            assert_eq!(world.values[&key], 90 + key as i32);
        }
    }
}
