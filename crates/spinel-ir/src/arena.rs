//! Arena-based storage with typed handles.
//!
//! Three containers share one [`Handle`] type:
//!
//! - [`Arena`]: append-only, used for functions.
//! - [`UniqueArena`]: deduplicating, used for types.
//! - [`Pool`]: supports removal. A removed entry leaves a tombstone behind and
//!   its handle is never handed out again, so code holding a stale handle can
//!   detect the removal with [`Pool::contains`] instead of aliasing a new value.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed handle into an [`Arena`], [`UniqueArena`] or [`Pool`].
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

fn checked_index(len: usize) -> u32 {
    u32::try_from(len)
        .unwrap_or_else(|_| panic!("arena overflow: {len} items exceeds u32::MAX"))
}

/// An append-only arena with typed [`Handle`]-based access.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let index = checked_index(self.data.len());
        self.data.push(value);
        Handle::new(index)
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Returns every handle in insertion order.
    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> + use<T> {
        (0..self.data.len() as u32).map(Handle::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}

/// A deduplicating arena that returns the same [`Handle`] for equal values.
#[derive(Clone, Debug)]
pub struct UniqueArena<T> {
    data: Vec<T>,
    map: HashMap<T, u32>,
}

impl<T: Hash + Eq> Default for UniqueArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Hash + Eq> UniqueArena<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            map: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Inserts a value, returning an existing handle if the value is already present.
    pub fn insert(&mut self, value: T) -> Handle<T>
    where
        T: Clone,
    {
        if let Some(&index) = self.map.get(&value) {
            return Handle::new(index);
        }
        let index = checked_index(self.data.len());
        self.map.insert(value.clone(), index);
        self.data.push(value);
        Handle::new(index)
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }
}

impl<T> Index<Handle<T>> for UniqueArena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

/// An arena whose entries can be removed.
///
/// Removal tombstones the slot. Handles are never recycled, so iteration over a
/// snapshot of handles stays sound while entries are being removed.
#[derive(Clone, Debug)]
pub struct Pool<T> {
    data: Vec<Option<T>>,
    live: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            live: 0,
        }
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the number of handles ever issued, tombstones included.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn append(&mut self, value: T) -> Handle<T> {
        let index = checked_index(self.data.len());
        self.data.push(Some(value));
        self.live += 1;
        Handle::new(index)
    }

    /// Removes an entry, returning it if it was still live.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let taken = self.data.get_mut(handle.index()).and_then(Option::take);
        if taken.is_some() {
            self.live -= 1;
        }
        taken
    }

    /// Returns `true` if the handle refers to a live entry.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        matches!(self.data.get(handle.index()), Some(Some(_)))
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index()).and_then(Option::as_ref)
    }

    pub fn try_get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.data.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Collects the handles of all live entries.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(h, _)| h).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (Handle::new(i as u32), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (Handle::new(i as u32), v)))
    }
}

impl<T> Index<Handle<T>> for Pool<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        self.try_get(handle)
            .unwrap_or_else(|| panic!("use of removed handle {handle:?}"))
    }
}

impl<T> IndexMut<Handle<T>> for Pool<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.try_get_mut(handle)
            .unwrap_or_else(|| panic!("use of removed handle {handle:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_hands_out_handles_in_order() {
        let mut functions = Arena::new();
        let main = functions.append("main");
        let helper = functions.append("helper");
        assert!(main < helper);
        assert_eq!(functions[helper], "helper");
        assert_eq!(functions.handles().collect::<Vec<_>>(), vec![main, helper]);
        assert_eq!(functions.try_get(Handle::new(7)), None);
    }

    #[test]
    fn unique_arena_reuses_equal_values() {
        let mut types = UniqueArena::new();
        let vec4 = types.insert(("f32", 4));
        let scalar = types.insert(("f32", 1));
        assert_eq!(types.insert(("f32", 4)), vec4);
        assert_ne!(vec4, scalar);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn pool_remove_leaves_tombstone() {
        let mut pool = Pool::new();
        let a = pool.append(1);
        let b = pool.append(2);
        let c = pool.append(3);

        assert_eq!(pool.remove(b), Some(2));
        assert_eq!(pool.remove(b), None);
        assert!(!pool.contains(b));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.handles(), vec![a, c]);

        // Handles are not recycled.
        let d = pool.append(4);
        assert_eq!(d.index(), 3);
        assert_eq!(pool.try_get(b), None);
    }

    #[test]
    #[should_panic(expected = "use of removed handle")]
    fn pool_index_removed_panics() {
        let mut pool = Pool::new();
        let a = pool.append('x');
        pool.remove(a);
        let _ = pool[a];
    }
}
