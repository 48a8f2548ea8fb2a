//! Reference-counted registry for shared GPU-side resources.
//!
//! Resources are keyed by content identity. The first [`SharedRegistry::acquire`]
//! of a key constructs the resource; later acquisitions of an equal key bump
//! the count and return the same handle. [`SharedRegistry::release`] hands the
//! resource back to the caller once its count reaches zero, so the caller can
//! release sub-resources it only shares before the resource is dropped.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

/// Resource registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("Stale handle in {registry}: {index}/{generation}")]
    StaleHandle {
        registry: &'static str,
        index: u32,
        generation: u32,
    },
}

/// Result type for resource operations
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Typed handle to an entry of a [`SharedRegistry`].
pub struct Handle<R> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Handle<R> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<R> Clone for Handle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Handle<R> {}

impl<R> PartialEq for Handle<R> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<R> Eq for Handle<R> {}

impl<R> Hash for Handle<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<R> std::fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// Explicit shared key for byte buffers.
///
/// Two keys are equal only if they point at the same allocation, so identical
/// bytes loaded twice stay separate resources unless the caller shares the key.
#[derive(Clone)]
pub struct SharedBytes(Arc<[u8]>);

impl SharedBytes {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SharedBytes {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SharedBytes {}

impl Hash for SharedBytes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl std::fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedBytes({} bytes @ {:p})", self.0.len(), Arc::as_ptr(&self.0))
    }
}

struct Entry<K, R> {
    key: K,
    resource: R,
    ref_count: u32,
}

struct Slot<K, R> {
    generation: u32,
    entry: Option<Entry<K, R>>,
}

/// Reference-counted resources keyed by content.
pub struct SharedRegistry<K, R> {
    name: &'static str,
    slots: Vec<Slot<K, R>>,
    free: Vec<u32>,
    by_key: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone, R> SharedRegistry<K, R> {
    /// Creates an empty registry. `name` is used in errors and logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// Takes a reference to the resource for `key`, constructing it with
    /// `create` on first use.
    pub fn acquire<E>(
        &mut self,
        key: &K,
        create: impl FnOnce(&K) -> Result<R, E>,
    ) -> Result<Handle<R>, E> {
        if let Some(&index) = self.by_key.get(key) {
            let slot = &mut self.slots[index as usize];
            if let Some(entry) = slot.entry.as_mut() {
                entry.ref_count += 1;
                return Ok(Handle::new(index, slot.generation));
            }
        }

        let resource = create(key)?;
        let entry = Entry {
            key: key.clone(),
            resource,
            ref_count: 1,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.by_key.insert(key.clone(), index);
        tracing::trace!(registry = self.name, index, "Created shared resource");
        Ok(Handle::new(index, self.slots[index as usize].generation))
    }

    /// Takes another reference through an existing handle.
    pub fn retain(&mut self, handle: Handle<R>) -> ResourceResult<()> {
        self.entry_mut(handle)?.ref_count += 1;
        Ok(())
    }

    /// Drops one reference. Returns the resource when this was the last one.
    ///
    /// Releasing more often than acquired is a programming error and is
    /// reported as [`ResourceError::StaleHandle`].
    pub fn release(&mut self, handle: Handle<R>) -> ResourceResult<Option<R>> {
        let entry = self.entry_mut(handle)?;
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return Ok(None);
        }

        let slot = &mut self.slots[handle.index as usize];
        let Some(entry) = slot.entry.take() else {
            return Err(self.stale(handle));
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.by_key.remove(&entry.key);
        tracing::trace!(registry = self.name, index = handle.index, "Destroyed shared resource");
        Ok(Some(entry.resource))
    }

    pub fn get(&self, handle: Handle<R>) -> Option<&R> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
            .map(|e| &e.resource)
    }

    pub fn get_mut(&mut self, handle: Handle<R>) -> Option<&mut R> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
            .map(|e| &mut e.resource)
    }

    /// Current reference count, or `None` for a stale handle.
    pub fn ref_count(&self, handle: Handle<R>) -> Option<u32> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
            .map(|e| e.ref_count)
    }

    /// Looks up the live handle for a key without taking a reference.
    pub fn find(&self, key: &K) -> Option<Handle<R>> {
        self.by_key
            .get(key)
            .map(|&index| Handle::new(index, self.slots[index as usize].generation))
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Live keys with their reference counts, for leak reports.
    pub fn live(&self) -> impl Iterator<Item = (&K, u32)> {
        self.slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .map(|e| (&e.key, e.ref_count))
    }

    /// Removes every resource regardless of reference counts and returns them.
    pub fn drain_all(&mut self) -> Vec<R> {
        self.by_key.clear();
        self.free.clear();
        let drained = self
            .slots
            .iter_mut()
            .filter_map(|s| s.entry.take())
            .map(|e| e.resource)
            .collect();
        self.slots.clear();
        drained
    }

    fn entry_mut(&mut self, handle: Handle<R>) -> ResourceResult<&mut Entry<K, R>> {
        let name = self.name;
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
            .ok_or(ResourceError::StaleHandle {
                registry: name,
                index: handle.index,
                generation: handle.generation,
            })
    }

    fn stale(&self, handle: Handle<R>) -> ResourceError {
        ResourceError::StaleHandle {
            registry: self.name,
            index: handle.index,
            generation: handle.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked {
        destroyed: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked(
        counter: &Arc<AtomicUsize>,
        created: &mut usize,
    ) -> impl FnOnce(&String) -> Result<Tracked, Infallible> {
        *created += 1;
        let destroyed = Arc::clone(counter);
        move |_| Ok(Tracked { destroyed })
    }

    #[test]
    fn test_equal_keys_share_one_resource() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut registry = SharedRegistry::new("test");
        let mut created = 0;
        let key = "mesh_a".to_string();

        let a = registry.acquire(&key, tracked(&destroyed, &mut created)).unwrap();
        let b = registry.acquire(&key, |_| -> Result<_, Infallible> {
            panic!("second acquire must not construct")
        });
        let b = b.unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.ref_count(a), Some(2));
        assert_eq!(registry.len(), 1);
        assert_eq!(created, 1);
    }

    #[test]
    fn test_paired_release_destroys_exactly_once() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut registry = SharedRegistry::new("test");
        let mut created = 0;
        let key = "mesh_a".to_string();

        let a = registry.acquire(&key, tracked(&destroyed, &mut created)).unwrap();
        registry.acquire(&key, tracked(&destroyed, &mut created)).unwrap();

        assert!(registry.release(a).unwrap().is_none());
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        let last = registry.release(a).unwrap();
        assert!(last.is_some());
        drop(last);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.ref_count(a), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_over_release_is_an_error() {
        let mut registry: SharedRegistry<u32, ()> = SharedRegistry::new("test");
        let h = registry.acquire(&1, |_| Ok::<_, Infallible>(())).unwrap();
        registry.release(h).unwrap();
        assert!(matches!(
            registry.release(h),
            Err(ResourceError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_slot_reuse_rejects_old_handle() {
        let mut registry: SharedRegistry<u32, u32> = SharedRegistry::new("test");
        let old = registry.acquire(&1, |k| Ok::<_, Infallible>(*k)).unwrap();
        registry.release(old).unwrap();
        let new = registry.acquire(&2, |k| Ok::<_, Infallible>(*k)).unwrap();
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(registry.get(old), None);
        assert_eq!(registry.get(new), Some(&2));
    }

    #[test]
    fn test_failed_create_leaves_no_entry() {
        let mut registry: SharedRegistry<u32, u32> = SharedRegistry::new("test");
        let result = registry.acquire(&1, |_| Err("not loaded"));
        assert_eq!(result, Err("not loaded"));
        assert!(registry.is_empty());
        assert!(registry.find(&1).is_none());
    }

    #[test]
    fn test_shared_bytes_compare_by_identity() {
        let a = SharedBytes::new(vec![1u8, 2, 3]);
        let b = SharedBytes::new(vec![1u8, 2, 3]);
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_ne!(a, b);

        let mut registry: SharedRegistry<SharedBytes, usize> = SharedRegistry::new("bytes");
        let ha = registry.acquire(&a, |k| Ok::<_, Infallible>(k.bytes().len())).unwrap();
        let hb = registry.acquire(&b, |k| Ok::<_, Infallible>(k.bytes().len())).unwrap();
        let ha2 = registry.acquire(&a2, |k| Ok::<_, Infallible>(k.bytes().len())).unwrap();
        assert_ne!(ha, hb);
        assert_eq!(ha, ha2);
        assert_eq!(registry.len(), 2);
    }
}
