//! Vector containers.

use super::core::{ContainerCore, Payload};
use crate::container::{ContainerSpec, OpenContainer, SharedContainer};
use crate::error::Result;
use crate::snapshot;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

/// A shared, immutable vector loaded from a snapshot file.
#[derive(Debug)]
pub struct SharedVec<T: Payload> {
    core: ContainerCore<Vec<T>>,
}

impl<T: Payload> SharedVec<T> {
    /// View the elements. Empty until the container is loaded.
    pub fn as_slice(&self) -> &[T] {
        self.core.view().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Get the element at `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Serialise `items` into a snapshot file readable by this kind.
    pub fn dump(path: &Path, items: &[T]) -> Result<()> {
        snapshot::dump_vec(path, items)
    }
}

impl<T: Payload> OpenContainer for SharedVec<T> {
    fn open(spec: ContainerSpec) -> Result<Self> {
        Ok(Self {
            core: ContainerCore::open(spec),
        })
    }
}

impl<T: Payload> SharedContainer for SharedVec<T> {
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
        self.core.view().map(Vec::len).unwrap_or(0)
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A shared, immutable vector of vectors loaded from a snapshot file.
pub struct SharedNestedVec<T: Payload> {
    core: ContainerCore<Vec<Vec<T>>>,
}

impl<T: Payload> SharedNestedVec<T> {
    /// Get the inner slice at `index`.
    pub fn get(&self, index: usize) -> Option<&[T]> {
        self.rows().get(index).map(Vec::as_slice)
    }

    /// Iterate over the inner slices.
    pub fn iter(&self) -> impl Iterator<Item = &[T]> {
        self.rows().iter().map(Vec::as_slice)
    }

    /// Serialise `items` into a snapshot file readable by this kind.
    pub fn dump(path: &Path, items: &[Vec<T>]) -> Result<()> {
        snapshot::dump_nested_vec(path, items)
    }

    fn rows(&self) -> &[Vec<T>] {
        self.core.view().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<T: Payload> OpenContainer for SharedNestedVec<T> {
    fn open(spec: ContainerSpec) -> Result<Self> {
        Ok(Self {
            core: ContainerCore::open(spec),
        })
    }
}

impl<T: Payload> SharedContainer for SharedNestedVec<T> {
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
        self.rows().len()
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
