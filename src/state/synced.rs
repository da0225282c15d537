//! Mutation-wrapper dirty tracking (option (b) in `spec.md` §4.1): leaf
//! fields flip a bit on write; `perPlayerSlice` maps track a per-key dirty
//! set so only touched slices are re-emitted.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A single synced leaf value. `dirty` is set by `set`/`mutate` and cleared
/// by the keeper's post-op pass.
#[derive(Debug, Clone)]
pub struct Synced<T> {
    value: T,
    dirty: bool,
}

impl<T> Synced<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.dirty = true;
    }

    pub fn mutate(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.value);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl<T: Default> Default for Synced<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A `perPlayerSlice`-policy map: each key (typically a `PlayerId`) owns one
/// slice. Tracks which keys changed since the last `clear_dirty` so the sync
/// engine can emit only the touched slices.
#[derive(Debug, Clone)]
pub struct SyncedMap<K, V> {
    map: HashMap<K, V>,
    dirty_keys: HashSet<K>,
    removed_keys: HashSet<K>,
}

impl<K, V> Default for SyncedMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            dirty_keys: HashSet::new(),
            removed_keys: HashSet::new(),
        }
    }
}

impl<K, V> SyncedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.dirty_keys.insert(key.clone());
        self.removed_keys.remove(&key);
        self.map.insert(key, value);
    }

    pub fn mutate(&mut self, key: &K, f: impl FnOnce(&mut V))
    where
        V: Default,
    {
        let entry = self.map.entry(key.clone()).or_default();
        f(entry);
        self.dirty_keys.insert(key.clone());
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.dirty_keys.remove(key);
            self.removed_keys.insert(key.clone());
        }
        removed
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_keys.is_empty() || !self.removed_keys.is_empty()
    }

    pub fn dirty_keys(&self) -> impl Iterator<Item = &K> {
        self.dirty_keys.iter()
    }

    pub fn removed_keys(&self) -> impl Iterator<Item = &K> {
        self.removed_keys.iter()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_keys.clear();
        self.removed_keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synced_tracks_mutation() {
        let mut s = Synced::new(0i64);
        assert!(!s.is_dirty());
        s.set(5);
        assert!(s.is_dirty());
        s.clear_dirty();
        assert!(!s.is_dirty());
        s.mutate(|v| *v += 1);
        assert_eq!(*s.get(), 6);
        assert!(s.is_dirty());
    }

    #[test]
    fn synced_map_tracks_per_key_dirtiness() {
        let mut m: SyncedMap<String, i64> = SyncedMap::default();
        m.insert("p1".into(), 1);
        assert!(m.dirty_keys().any(|k| k == "p1"));
        m.clear_dirty();
        assert!(!m.is_dirty());

        m.mutate(&"p1".to_string(), |v| *v += 1);
        assert!(m.dirty_keys().any(|k| k == "p1"));
        m.clear_dirty();

        m.remove(&"p1".to_string());
        assert!(m.removed_keys().any(|k| k == "p1"));
        assert!(!m.contains_key(&"p1".to_string()));
    }
}
