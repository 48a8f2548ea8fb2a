//! Transform hierarchy stored in an index arena.
//!
//! Nodes are addressed by generation-checked [`NodeHandle`]s. Parent, child
//! and sibling links are arena indices, so traversal is O(1) per link and a
//! removed node can never be reached through a stale link.

use glam::Mat4;
use thiserror::Error;

/// Transform arena errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("Node {0:?} does not exist")]
    StaleHandle(NodeHandle),

    #[error("Attaching {child:?} under {parent:?} would create a cycle")]
    Cycle { child: NodeHandle, parent: NodeHandle },
}

/// Result type for arena operations
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Stable reference to a node in a [`TransformArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone)]
struct Node {
    local: Mat4,
    world: Mat4,
    parent: Option<u32>,
    first_child: Option<u32>,
    next_sibling: Option<u32>,
    prev_sibling: Option<u32>,
    dirty: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Local and world transforms of a scene hierarchy.
#[derive(Debug, Clone, Default)]
pub struct TransformArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    dirty: Vec<u32>,
    len: usize,
    // Scratch stacks reused across calls.
    stack: Vec<u32>,
    walk: Vec<(u32, Mat4)>,
}

impl TransformArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.node(handle).is_some()
    }

    /// Inserts a node with the given local transform, optionally under `parent`.
    pub fn insert(&mut self, local: Mat4, parent: Option<NodeHandle>) -> ArenaResult<NodeHandle> {
        let parent_index = match parent {
            Some(p) => Some(self.resolve(p)?),
            None => None,
        };

        let node = Node {
            local,
            world: local,
            parent: None,
            first_child: None,
            next_sibling: None,
            prev_sibling: None,
            dirty: true,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.len += 1;
        if let Some(p) = parent_index {
            self.link(index, p);
        }
        self.dirty.push(index);

        Ok(NodeHandle {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    /// Removes a node and its whole subtree. Returns the removed handles,
    /// the given node first.
    pub fn remove(&mut self, handle: NodeHandle) -> ArenaResult<Vec<NodeHandle>> {
        let root = self.resolve(handle)?;
        self.unlink(root);

        let mut removed = Vec::new();
        self.stack.clear();
        self.stack.push(root);
        while let Some(index) = self.stack.pop() {
            let slot = &mut self.slots[index as usize];
            let Some(node) = slot.node.take() else {
                continue;
            };
            removed.push(NodeHandle {
                index,
                generation: slot.generation,
            });
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
            self.len -= 1;

            let mut child = node.first_child;
            while let Some(c) = child {
                self.stack.push(c);
                child = self.slots[c as usize].node.as_ref().and_then(|n| n.next_sibling);
            }
        }
        Ok(removed)
    }

    pub fn local(&self, handle: NodeHandle) -> Option<Mat4> {
        self.node(handle).map(|n| n.local)
    }

    /// World transform as of the last [`TransformArena::propagate`].
    pub fn world(&self, handle: NodeHandle) -> Option<Mat4> {
        self.node(handle).map(|n| n.world)
    }

    pub fn set_local(&mut self, handle: NodeHandle, local: Mat4) -> ArenaResult<()> {
        let index = self.resolve(handle)?;
        if let Some(node) = self.slots[index as usize].node.as_mut() {
            node.local = local;
            if !node.dirty {
                node.dirty = true;
                self.dirty.push(index);
            }
        }
        Ok(())
    }

    pub fn parent(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.node(handle)
            .and_then(|n| n.parent)
            .map(|p| self.handle_at(p))
    }

    /// Direct children, most recently attached first.
    pub fn children(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut child = self.node(handle).and_then(|n| n.first_child);
        while let Some(c) = child {
            out.push(self.handle_at(c));
            child = self.slots[c as usize].node.as_ref().and_then(|n| n.next_sibling);
        }
        out
    }

    /// Moves `handle` under `parent`, or to the root level with `None`.
    pub fn set_parent(&mut self, handle: NodeHandle, parent: Option<NodeHandle>) -> ArenaResult<()> {
        let index = self.resolve(handle)?;
        let parent_index = match parent {
            Some(p) => {
                let p_index = self.resolve(p)?;
                let mut cursor = Some(p_index);
                while let Some(c) = cursor {
                    if c == index {
                        return Err(ArenaError::Cycle { child: handle, parent: p });
                    }
                    cursor = self.slots[c as usize].node.as_ref().and_then(|n| n.parent);
                }
                Some(p_index)
            }
            None => None,
        };

        self.unlink(index);
        if let Some(p) = parent_index {
            self.link(index, p);
        }
        if let Some(node) = self.slots[index as usize].node.as_mut()
            && !node.dirty
        {
            node.dirty = true;
            self.dirty.push(index);
        }
        Ok(())
    }

    /// Recomputes world transforms below every dirty node and appends each
    /// node whose world transform was recomputed to `changed`.
    pub fn propagate(&mut self, changed: &mut Vec<NodeHandle>) {
        let mut dirty = std::mem::take(&mut self.dirty);
        for &root in &dirty {
            let Some(node) = self.slots[root as usize].node.as_ref() else {
                continue;
            };
            // A dirty ancestor recomputes this subtree itself.
            if !node.dirty || self.has_dirty_ancestor(root) {
                continue;
            }

            let parent_world = node
                .parent
                .and_then(|p| self.slots[p as usize].node.as_ref())
                .map_or(Mat4::IDENTITY, |p| p.world);

            self.walk.clear();
            self.walk.push((root, parent_world));
            while let Some((index, parent_world)) = self.walk.pop() {
                let slot = &mut self.slots[index as usize];
                let generation = slot.generation;
                let Some(node) = slot.node.as_mut() else {
                    continue;
                };
                node.world = parent_world * node.local;
                node.dirty = false;
                changed.push(NodeHandle { index, generation });

                let world = node.world;
                let mut child = node.first_child;
                while let Some(c) = child {
                    self.walk.push((c, world));
                    child = self.slots[c as usize].node.as_ref().and_then(|n| n.next_sibling);
                }
            }
        }
        dirty.clear();
        self.dirty = dirty;
    }

    fn has_dirty_ancestor(&self, index: u32) -> bool {
        let mut cursor = self.slots[index as usize].node.as_ref().and_then(|n| n.parent);
        while let Some(c) = cursor {
            let Some(node) = self.slots[c as usize].node.as_ref() else {
                return false;
            };
            if node.dirty {
                return true;
            }
            cursor = node.parent;
        }
        false
    }

    fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn resolve(&self, handle: NodeHandle) -> ArenaResult<u32> {
        self.node(handle)
            .map(|_| handle.index)
            .ok_or(ArenaError::StaleHandle(handle))
    }

    fn handle_at(&self, index: u32) -> NodeHandle {
        NodeHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn link(&mut self, child: u32, parent: u32) {
        let old_first = self.slots[parent as usize].node.as_ref().and_then(|n| n.first_child);
        if let Some(first) = old_first
            && let Some(n) = self.slots[first as usize].node.as_mut()
        {
            n.prev_sibling = Some(child);
        }
        if let Some(n) = self.slots[child as usize].node.as_mut() {
            n.parent = Some(parent);
            n.next_sibling = old_first;
            n.prev_sibling = None;
        }
        if let Some(n) = self.slots[parent as usize].node.as_mut() {
            n.first_child = Some(child);
        }
    }

    fn unlink(&mut self, index: u32) {
        let Some(node) = self.slots[index as usize].node.as_mut() else {
            return;
        };
        let (parent, prev, next) = (node.parent, node.prev_sibling, node.next_sibling);
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;

        if let Some(n) = next.and_then(|i| self.slots[i as usize].node.as_mut()) {
            n.prev_sibling = prev;
        }
        match prev {
            Some(p) => {
                if let Some(n) = self.slots[p as usize].node.as_mut() {
                    n.next_sibling = next;
                }
            }
            None => {
                if let Some(n) = parent.and_then(|i| self.slots[i as usize].node.as_mut()) {
                    n.first_child = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn translate(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, y, z))
    }

    fn world_pos(arena: &TransformArena, h: NodeHandle) -> Vec3 {
        arena.world(h).unwrap().transform_point3(Vec3::ZERO)
    }

    #[test]
    fn test_world_follows_parent_chain() {
        let mut arena = TransformArena::new();
        let root = arena.insert(translate(1.0, 0.0, 0.0), None).unwrap();
        let child = arena.insert(translate(0.0, 2.0, 0.0), Some(root)).unwrap();
        let grandchild = arena.insert(translate(0.0, 0.0, 3.0), Some(child)).unwrap();

        let mut changed = Vec::new();
        arena.propagate(&mut changed);
        assert_eq!(changed.len(), 3);

        let p = world_pos(&arena, grandchild);
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 2.0);
        assert_relative_eq!(p.z, 3.0);
    }

    #[test]
    fn test_parent_change_propagates_to_descendants_once() {
        let mut arena = TransformArena::new();
        let root = arena.insert(Mat4::IDENTITY, None).unwrap();
        let a = arena.insert(translate(1.0, 0.0, 0.0), Some(root)).unwrap();
        let b = arena.insert(translate(1.0, 0.0, 0.0), Some(a)).unwrap();
        let other = arena.insert(Mat4::IDENTITY, None).unwrap();
        let mut changed = Vec::new();
        arena.propagate(&mut changed);

        changed.clear();
        arena.set_local(b, translate(2.0, 0.0, 0.0)).unwrap();
        arena.set_local(root, translate(10.0, 0.0, 0.0)).unwrap();
        arena.propagate(&mut changed);

        assert_eq!(changed.len(), 3);
        assert!(!changed.contains(&other));
        assert_relative_eq!(world_pos(&arena, b).x, 13.0);
    }

    #[test]
    fn test_unchanged_nodes_are_not_reported() {
        let mut arena = TransformArena::new();
        let a = arena.insert(Mat4::IDENTITY, None).unwrap();
        let mut changed = Vec::new();
        arena.propagate(&mut changed);
        changed.clear();
        arena.propagate(&mut changed);
        assert!(changed.is_empty());
        assert!(arena.contains(a));
    }

    #[test]
    fn test_remove_subtree_invalidates_handles() {
        let mut arena = TransformArena::new();
        let root = arena.insert(Mat4::IDENTITY, None).unwrap();
        let a = arena.insert(Mat4::IDENTITY, Some(root)).unwrap();
        let b = arena.insert(Mat4::IDENTITY, Some(a)).unwrap();
        let sibling = arena.insert(Mat4::IDENTITY, Some(root)).unwrap();

        let removed = arena.remove(a).unwrap();
        assert_eq!(removed[0], a);
        assert_eq!(removed.len(), 2);
        assert!(!arena.contains(b));
        assert_eq!(arena.children(root), vec![sibling]);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.set_local(a, Mat4::IDENTITY), Err(ArenaError::StaleHandle(a)));

        // Reused slot gets a fresh generation.
        let reused = arena.insert(Mat4::IDENTITY, None).unwrap();
        assert!(reused.index() == a.index() || reused.index() == b.index());
        assert_ne!(reused, a);
        assert_ne!(reused, b);
    }

    #[test]
    fn test_reparent_rejects_cycles() {
        let mut arena = TransformArena::new();
        let root = arena.insert(Mat4::IDENTITY, None).unwrap();
        let child = arena.insert(Mat4::IDENTITY, Some(root)).unwrap();
        assert!(matches!(
            arena.set_parent(root, Some(child)),
            Err(ArenaError::Cycle { .. })
        ));
        assert!(matches!(
            arena.set_parent(root, Some(root)),
            Err(ArenaError::Cycle { .. })
        ));
    }

    #[test]
    fn test_reparent_moves_world_transform() {
        let mut arena = TransformArena::new();
        let left = arena.insert(translate(-5.0, 0.0, 0.0), None).unwrap();
        let right = arena.insert(translate(5.0, 0.0, 0.0), None).unwrap();
        let item = arena.insert(translate(0.0, 1.0, 0.0), Some(left)).unwrap();
        let mut changed = Vec::new();
        arena.propagate(&mut changed);
        assert_relative_eq!(world_pos(&arena, item).x, -5.0);

        arena.set_parent(item, Some(right)).unwrap();
        arena.propagate(&mut changed);
        assert_relative_eq!(world_pos(&arena, item).x, 5.0);
        assert_eq!(arena.parent(item), Some(right));
        assert!(arena.children(left).is_empty());
    }
}
