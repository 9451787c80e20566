//! Shared plumbing for the concrete container kinds.
//!
//! Every concrete container wraps a [`ContainerCore`]: the attached
//! segment, plus a typed view decoded once per process from the
//! segment's payload bytes. The payload is shared between processes;
//! the decoded view is per-process.

use crate::container::ContainerSpec;
use crate::error::{BasaltError, Result};
use crate::segment::{self, Attach, Segment};
use crate::snapshot;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Element bound shared by all container kinds.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Payload for T {}

/// A typed view decodable from a segment's payload bytes.
pub(crate) trait Decode: Send + Sync + Sized + 'static {
    fn decode(key: &Path, payload: &[u8]) -> Result<Self>;
}

pub(crate) fn decode_json<T: DeserializeOwned>(key: &Path, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| BasaltError::Corrupt {
        path: key.to_path_buf(),
        cause: format!("cannot decode snapshot payload: {}", e),
    })
}

impl<T: Payload> Decode for Vec<T> {
    fn decode(key: &Path, payload: &[u8]) -> Result<Self> {
        decode_json(key, payload)
    }
}

impl<T: Payload + Eq + Hash> Decode for HashSet<T> {
    fn decode(key: &Path, payload: &[u8]) -> Result<Self> {
        let items: Vec<T> = decode_json(key, payload)?;
        Ok(items.into_iter().collect())
    }
}

impl<K: Payload + Eq + Hash, V: Payload> Decode for HashMap<K, V> {
    fn decode(key: &Path, payload: &[u8]) -> Result<Self> {
        let pairs: Vec<(K, V)> = decode_json(key, payload)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Elements kept in sorted order so membership tests binary-search.
#[derive(Debug)]
pub(crate) struct SortedVec<T>(pub(crate) Vec<T>);

impl<T: Payload + Ord> Decode for SortedVec<T> {
    fn decode(key: &Path, payload: &[u8]) -> Result<Self> {
        let mut items: Vec<T> = decode_json(key, payload)?;
        items.sort_unstable();
        Ok(SortedVec(items))
    }
}

/// Key/value pairs kept sorted by key so lookups binary-search.
pub(crate) struct SortedPairs<K, V>(pub(crate) Vec<(K, V)>);

impl<K: Payload + Ord, V: Payload> Decode for SortedPairs<K, V> {
    fn decode(key: &Path, payload: &[u8]) -> Result<Self> {
        let mut pairs: Vec<(K, V)> = decode_json(key, payload)?;
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(SortedPairs(pairs))
    }
}

/// Segment attachment and per-process view shared by all container
/// kinds.
#[derive(Debug)]
pub(crate) struct ContainerCore<D> {
    spec: ContainerSpec,
    segment: RwLock<Option<Segment>>,
    view: OnceLock<D>,
    existed: AtomicBool,
}

impl<D: Decode> ContainerCore<D> {
    pub fn open(spec: ContainerSpec) -> Self {
        Self {
            spec,
            segment: RwLock::new(None),
            view: OnceLock::new(),
            existed: AtomicBool::new(false),
        }
    }

    /// Attach the segment, creating it when absent. Decodes the view
    /// immediately when attaching an already-published segment.
    pub fn init(&self) -> Result<()> {
        let attach = segment::open_or_create(
            &self.spec.segments_dir,
            self.spec.app_id,
            &self.spec.group,
            &self.spec.key,
        )?;
        match attach {
            Attach::Existing(seg) => {
                let view = D::decode(&self.spec.key, seg.payload()?)?;
                let _ = self.view.set(view);
                *self.segment.write() = Some(seg);
                self.existed.store(true, Ordering::Release);
            }
            Attach::Fresh(seg) => {
                *self.segment.write() = Some(seg);
                self.existed.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    pub fn existed(&self) -> bool {
        self.existed.load(Ordering::Acquire)
    }

    /// Read the snapshot file at the key path, publish its payload into
    /// the segment, and decode the view.
    pub fn load(&self) -> Result<()> {
        let payload = snapshot::read_payload(&self.spec.key)?;
        let view = D::decode(&self.spec.key, &payload)?;

        let mut guard = self.segment.write();
        let seg = guard.as_mut().ok_or_else(|| BasaltError::Corrupt {
            path: self.spec.key.clone(),
            cause: "load called before init".to_string(),
        })?;
        seg.publish(&payload)?;
        let _ = self.view.set(view);
        Ok(())
    }

    /// Detach and unlink the segment when no other process holds it.
    pub fn destroy(&self) {
        let seg = self.segment.write().take();
        if let Some(seg) = seg {
            let seg_file = seg.file_path().to_path_buf();
            drop(seg);
            match segment::unlink_if_unused(&seg_file) {
                Ok(true) => {
                    tracing::debug!(segment = %seg_file.display(), "segment destroyed")
                }
                Ok(false) => {
                    tracing::debug!(segment = %seg_file.display(), "segment still attached elsewhere")
                }
                Err(e) => {
                    tracing::warn!(segment = %seg_file.display(), error = %e, "segment unlink failed")
                }
            }
        }
    }

    pub fn view(&self) -> Option<&D> {
        self.view.get()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::path::PathBuf;

    /// Spec for a container bound to `key`, storing segments under
    /// `segments_dir`.
    pub fn spec(key: &Path, segments_dir: &Path) -> ContainerSpec {
        ContainerSpec {
            key: key.to_path_buf(),
            group: "test".to_string(),
            app_id: 1,
            segments_dir: PathBuf::from(segments_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::spec;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creator_loads_then_attacher_skips_load() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("v.snap");
        snapshot::dump_vec(&key, &[10u32, 20, 30]).unwrap();
        let store = dir.path().join("segs");

        let creator: ContainerCore<Vec<u32>> = ContainerCore::open(spec(&key, &store));
        creator.init().unwrap();
        assert!(!creator.existed());
        creator.load().unwrap();
        assert_eq!(creator.view().unwrap(), &vec![10, 20, 30]);

        let attacher: ContainerCore<Vec<u32>> = ContainerCore::open(spec(&key, &store));
        attacher.init().unwrap();
        assert!(attacher.existed());
        // No load needed: the view decoded straight from the segment.
        assert_eq!(attacher.view().unwrap(), &vec![10, 20, 30]);
    }

    #[test]
    fn load_before_init_fails() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("v.snap");
        snapshot::dump_vec(&key, &[1u32]).unwrap();

        let core: ContainerCore<Vec<u32>> = ContainerCore::open(spec(&key, dir.path()));
        let err = core.load().unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[test]
    fn destroy_without_init_is_a_no_op() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("v.snap");
        let core: ContainerCore<Vec<u32>> = ContainerCore::open(spec(&key, dir.path()));
        core.destroy();
    }

    #[test]
    fn destroy_unlinks_when_sole_owner() {
        let dir = tempdir().unwrap();
        let key = dir.path().join("v.snap");
        snapshot::dump_vec(&key, &[1u32, 2]).unwrap();
        let store = dir.path().join("segs");

        let core: ContainerCore<Vec<u32>> = ContainerCore::open(spec(&key, &store));
        core.init().unwrap();
        core.load().unwrap();
        core.destroy();

        assert!(segment::enumerate(&store, 1).unwrap().is_empty());
    }
}
