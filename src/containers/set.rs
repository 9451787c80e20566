//! Set containers.

use super::core::{ContainerCore, Payload, SortedVec};
use crate::container::{ContainerSpec, OpenContainer, SharedContainer};
use crate::error::Result;
use crate::snapshot;
use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;

/// A shared, immutable ordered set loaded from a snapshot file.
///
/// Elements are held sorted; membership tests binary-search.
#[derive(Debug)]
pub struct SharedSet<T: Payload + Ord> {
    core: ContainerCore<SortedVec<T>>,
}

impl<T: Payload + Ord> SharedSet<T> {
    /// Whether `value` is a member of the set.
    pub fn contains(&self, value: &T) -> bool {
        self.items().binary_search(value).is_ok()
    }

    /// Iterate over the elements in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items().iter()
    }

    /// Serialise `set` into a snapshot file readable by this kind.
    pub fn dump(path: &Path, set: &BTreeSet<T>) -> Result<()> {
        snapshot::dump_set(path, set)
    }

    fn items(&self) -> &[T] {
        self.core.view().map(|v| v.0.as_slice()).unwrap_or(&[])
    }
}

impl<T: Payload + Ord> OpenContainer for SharedSet<T> {
    fn open(spec: ContainerSpec) -> Result<Self> {
        Ok(Self {
            core: ContainerCore::open(spec),
        })
    }
}

impl<T: Payload + Ord> SharedContainer for SharedSet<T> {
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
        self.items().len()
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A shared, immutable hash set loaded from a snapshot file.
pub struct SharedHashSet<T: Payload + Eq + Hash> {
    core: ContainerCore<HashSet<T>>,
}

impl<T: Payload + Eq + Hash> SharedHashSet<T> {
    /// Whether `value` is a member of the set.
    pub fn contains(&self, value: &T) -> bool {
        self.core.view().is_some_and(|set| set.contains(value))
    }

    /// Iterate over the elements in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.core.view().into_iter().flat_map(HashSet::iter)
    }

    /// Serialise `set` into a snapshot file readable by this kind.
    pub fn dump(path: &Path, set: &HashSet<T>) -> Result<()> {
        snapshot::dump_hash_set(path, set)
    }
}

impl<T: Payload + Eq + Hash> OpenContainer for SharedHashSet<T> {
    fn open(spec: ContainerSpec) -> Result<Self> {
        Ok(Self {
            core: ContainerCore::open(spec),
        })
    }
}

impl<T: Payload + Eq + Hash> SharedContainer for SharedHashSet<T> {
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
        self.core.view().map(HashSet::len).unwrap_or(0)
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
