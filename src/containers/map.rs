//! Map containers.

use super::core::{ContainerCore, Payload, SortedPairs};
use crate::container::{ContainerSpec, OpenContainer, SharedContainer};
use crate::error::Result;
use crate::snapshot;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;

/// A shared, immutable ordered map loaded from a snapshot file.
///
/// Entries are held as key-sorted pairs; lookups binary-search.
pub struct SharedMap<K: Payload + Ord, V: Payload> {
    core: ContainerCore<SortedPairs<K, V>>,
}

impl<K: Payload + Ord, V: Payload> SharedMap<K, V> {
    /// Get the value mapped to `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let pairs = self.pairs();
        pairs
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| &pairs[i].1)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over the entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.pairs().iter().map(|(k, v)| (k, v))
    }

    /// Serialise `map` into a snapshot file readable by this kind.
    pub fn dump(path: &Path, map: &BTreeMap<K, V>) -> Result<()> {
        snapshot::dump_map(path, map)
    }

    fn pairs(&self) -> &[(K, V)] {
        self.core.view().map(|p| p.0.as_slice()).unwrap_or(&[])
    }
}

impl<K: Payload + Ord, V: Payload> OpenContainer for SharedMap<K, V> {
    fn open(spec: ContainerSpec) -> Result<Self> {
        Ok(Self {
            core: ContainerCore::open(spec),
        })
    }
}

impl<K: Payload + Ord, V: Payload> SharedContainer for SharedMap<K, V> {
    fn init(&self) -> Result<()> {
        self.core.init()
    }

    fn existed(&self) -> bool {
        self.core.existed()
    }

    fn load(&self) -> Result<()> {
        self.core.load()
    }

    fn destroy(&self) {
        self.core.destroy()
    }

    fn len(&self) -> usize {
        self.pairs().len()
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A shared, immutable hash map loaded from a snapshot file.
#[derive(Debug)]
pub struct SharedHashMap<K: Payload + Eq + Hash, V: Payload> {
    core: ContainerCore<HashMap<K, V>>,
}

impl<K: Payload + Eq + Hash, V: Payload> SharedHashMap<K, V> {
    /// Get the value mapped to `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.core.view().and_then(|map| map.get(key))
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over the entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.core.view().into_iter().flat_map(HashMap::iter)
    }

    /// Serialise `map` into a snapshot file readable by this kind.
    pub fn dump(path: &Path, map: &HashMap<K, V>) -> Result<()> {
        snapshot::dump_hash_map(path, map)
    }
}

impl<K: Payload + Eq + Hash, V: Payload> OpenContainer for SharedHashMap<K, V> {
    fn open(spec: ContainerSpec) -> Result<Self> {
        Ok(Self {
            core: ContainerCore::open(spec),
        })
    }
}

impl<K: Payload + Eq + Hash, V: Payload> SharedContainer for SharedHashMap<K, V> {
    fn init(&self) -> Result<()> {
        self.core.init()
    }

    fn existed(&self) -> bool {
        self.core.existed()
    }

    fn load(&self) -> Result<()> {
        self.core.load()
    }

    fn destroy(&self) {
        self.core.destroy()
    }

    fn len(&self) -> usize {
        self.core.view().map(HashMap::len).unwrap_or(0)
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A shared, immutable multimap (key to value list) loaded from a
/// snapshot file.
pub struct SharedNestedHashMap<K: Payload + Eq + Hash, V: Payload> {
    core: ContainerCore<HashMap<K, Vec<V>>>,
}

impl<K: Payload + Eq + Hash, V: Payload> SharedNestedHashMap<K, V> {
    /// Get the values mapped to `key`.
    pub fn get(&self, key: &K) -> Option<&[V]> {
        self.core
            .view()
            .and_then(|map| map.get(key))
            .map(Vec::as_slice)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over the entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.core
            .view()
            .into_iter()
            .flat_map(HashMap::iter)
            .map(|(k, v)| (k, v.as_slice()))
    }

    /// Serialise `map` into a snapshot file readable by this kind.
    pub fn dump(path: &Path, map: &HashMap<K, Vec<V>>) -> Result<()> {
        snapshot::dump_nested_hash_map(path, map)
    }
}

impl<K: Payload + Eq + Hash, V: Payload> OpenContainer for SharedNestedHashMap<K, V> {
    fn open(spec: ContainerSpec) -> Result<Self> {
        Ok(Self {
            core: ContainerCore::open(spec),
        })
    }
}

impl<K: Payload + Eq + Hash, V: Payload> SharedContainer for SharedNestedHashMap<K, V> {
    fn init(&self) -> Result<()> {
        self.core.init()
    }

    fn existed(&self) -> bool {
        self.core.existed()
    }

    fn load(&self) -> Result<()> {
        self.core.load()
    }

    fn destroy(&self) {
        self.core.destroy()
    }

    fn len(&self) -> usize {
        self.core.view().map(HashMap::len).unwrap_or(0)
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::super::core::testutil::spec;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn map_roundtrip() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("m.snap");
        let mut map = BTreeMap::new();
        map.insert((3u32, 1u32), "c".to_string());
        map.insert((1, 2), "a".to_string());
        SharedMap::dump(&key, &map).unwrap();

        let shared =
            SharedMap::<(u32, u32), String>::open(spec(&key, &dir.path().join("segs"))).unwrap();
        shared.init().unwrap();
        shared.load().unwrap();

        assert_eq!(shared.len(), 2);
        assert_eq!(shared.get(&(1, 2)), Some(&"a".to_string()));
        assert_eq!(shared.get(&(9, 9)), None);
        let keys: Vec<&(u32, u32)> = shared.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [&(1, 2), &(3, 1)]);
    }

    #[test]
    fn hash_map_roundtrip() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("hm.snap");
        let mut map = HashMap::new();
        map.insert("one".to_string(), 1u64);
        map.insert("two".to_string(), 2);
        SharedHashMap::dump(&key, &map).unwrap();

        let shared =
            SharedHashMap::<String, u64>::open(spec(&key, &dir.path().join("segs"))).unwrap();
        shared.init().unwrap();
        shared.load().unwrap();

        assert_eq!(shared.len(), 2);
        assert_eq!(shared.get(&"two".to_string()), Some(&2));
        assert!(!shared.contains_key(&"three".to_string()));
    }

    #[test]
    fn nested_hash_map_roundtrip() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("nhm.snap");
        let mut map: HashMap<u32, Vec<u32>> = HashMap::new();
        map.insert(1, vec![10, 11]);
        map.insert(2, vec![]);
        SharedNestedHashMap::dump(&key, &map).unwrap();

        let shared =
            SharedNestedHashMap::<u32, u32>::open(spec(&key, &dir.path().join("segs"))).unwrap();
        shared.init().unwrap();
        shared.load().unwrap();

        assert_eq!(shared.len(), 2);
        assert_eq!(shared.get(&1), Some(&[10u32, 11][..]));
        assert_eq!(shared.get(&2), Some(&[][..]));
        assert_eq!(shared.get(&3), None);
    }
}
