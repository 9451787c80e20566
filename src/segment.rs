//! OS-level shared segments.
//!
//! A segment is a named file in the segment store (tmpfs by default, so
//! the bytes live in shared memory on Linux) holding one published
//! snapshot payload:
//!
//! ```text
//! ┌──────────────┬─────────┬────────┬───────┬─────────────┬───────────┐
//! │ magic "BSEG" │ version │ app_id │ state │ payload_len │ name lens │
//! ├──────────────┴─────────┴────────┴───────┴─────────────┴───────────┤
//! │ group bytes │ canonical key bytes │ payload …                     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Segments outlive any single process: every attached process holds a
//! shared advisory lock on the file, and unlinking is gated on taking
//! the exclusive lock, so a segment is only ever destroyed once no
//! process is attached to it.
//!
//! A segment in the `Empty` state is a creation that never finished
//! (the creator crashed between create and publish); attach treats it
//! as absent and the next creator replaces it.

use crate::error::{io_error, BasaltError, Result};
use fs2::FileExt;
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Magic bytes for segment files.
const SEGMENT_MAGIC: &[u8; 4] = b"BSEG";
/// Segment file format version.
const SEGMENT_VERSION: u32 = 1;
/// Bytes of fixed header before the group and key strings.
const FIXED_HEADER_LEN: u64 = 32;
/// Upper bound on the group and key string lengths, for header sanity.
const MAX_NAME_LEN: u32 = 4096;

const STATE_EMPTY: u32 = 0;
const STATE_LOADED: u32 = 1;

/// Parsed segment header.
#[derive(Debug, Clone)]
pub(crate) struct SegmentMeta {
    /// App ID namespace the segment belongs to.
    pub app_id: u32,
    /// Group name recorded by the creating manager.
    pub group: String,
    /// Canonical path of the snapshot the segment was loaded from.
    pub key: PathBuf,
    /// Published payload length; zero while `Empty`.
    pub payload_len: u64,
    /// Whether the payload has been published.
    pub loaded: bool,
}

/// An attached shared segment.
#[derive(Debug)]
pub(crate) struct Segment {
    file: File,
    path: PathBuf,
    meta: SegmentMeta,
    payload_offset: u64,
    map: Option<Mmap>,
}

/// Compute the segment file path for `(app_id, key)`.
///
/// The name embeds the app ID (for enumeration) and a digest of the
/// canonical key, so every process attaching the same file derives the
/// same segment name.
pub(crate) fn segment_path(dir: &Path, app_id: u32, key: &Path) -> PathBuf {
    let digest = Sha256::digest(key.as_os_str().as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in &digest[..16] {
        hex.push_str(&format!("{:02x}", byte));
    }
    dir.join(format!("seg_{}_{}.shm", app_id, hex))
}

fn fixed_header(app_id: u32, state: u32, payload_len: u64, group: &str, key: &Path) -> Vec<u8> {
    let mut header = Vec::with_capacity(FIXED_HEADER_LEN as usize);
    header.extend_from_slice(SEGMENT_MAGIC);
    header.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
    header.extend_from_slice(&app_id.to_le_bytes());
    header.extend_from_slice(&state.to_le_bytes());
    header.extend_from_slice(&payload_len.to_le_bytes());
    header.extend_from_slice(&(group.len() as u32).to_le_bytes());
    header.extend_from_slice(&(key.as_os_str().len() as u32).to_le_bytes());
    header
}

fn read_meta(file: &mut File, path: &Path) -> Result<(SegmentMeta, u64)> {
    let corrupt = |cause: String| BasaltError::Corrupt {
        path: path.to_path_buf(),
        cause,
    };

    let mut fixed = [0u8; FIXED_HEADER_LEN as usize];
    file.read_exact(&mut fixed)
        .map_err(|e| io_error("read", path, e))?;

    if &fixed[0..4] != SEGMENT_MAGIC {
        return Err(corrupt("bad segment magic".to_string()));
    }
    let version = u32::from_le_bytes(fixed[4..8].try_into().unwrap());
    if version != SEGMENT_VERSION {
        return Err(corrupt(format!("unsupported segment version {}", version)));
    }
    let app_id = u32::from_le_bytes(fixed[8..12].try_into().unwrap());
    let state = u32::from_le_bytes(fixed[12..16].try_into().unwrap());
    let payload_len = u64::from_le_bytes(fixed[16..24].try_into().unwrap());
    let group_len = u32::from_le_bytes(fixed[24..28].try_into().unwrap());
    let key_len = u32::from_le_bytes(fixed[28..32].try_into().unwrap());
    if group_len > MAX_NAME_LEN || key_len > MAX_NAME_LEN {
        return Err(corrupt("implausible name lengths in segment header".to_string()));
    }

    let mut group = vec![0u8; group_len as usize];
    file.read_exact(&mut group)
        .map_err(|e| io_error("read", path, e))?;
    let group = String::from_utf8(group).map_err(|_| corrupt("group is not UTF-8".to_string()))?;

    let mut key = vec![0u8; key_len as usize];
    file.read_exact(&mut key)
        .map_err(|e| io_error("read", path, e))?;
    let key = PathBuf::from(std::ffi::OsStr::from_bytes(&key));

    let payload_offset = FIXED_HEADER_LEN + group_len as u64 + key_len as u64;
    let meta = SegmentMeta {
        app_id,
        group,
        key,
        payload_len,
        loaded: state == STATE_LOADED,
    };
    Ok((meta, payload_offset))
}

impl Segment {
    /// Create a fresh, empty segment for `(app_id, key)`.
    ///
    /// Returns `Ok(None)` when the file appeared concurrently (another
    /// process won the creation race); the caller attaches instead. OS
    /// memory/space exhaustion maps to [`BasaltError::OutOfMemory`].
    pub fn create(dir: &Path, app_id: u32, group: &str, key: &Path) -> Result<Option<Self>> {
        fs::create_dir_all(dir).map_err(|e| io_error("create_dir", dir, e))?;
        let path = segment_path(dir, app_id, key);

        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(io_error("create", &path, e)),
        };

        let header = fixed_header(app_id, STATE_EMPTY, 0, group, key);
        file.write_all(&header)
            .and_then(|_| file.write_all(group.as_bytes()))
            .and_then(|_| file.write_all(key.as_os_str().as_bytes()))
            .and_then(|_| file.sync_all())
            .map_err(|e| io_error("write", &path, e))?;

        file.lock_shared().map_err(|e| io_error("lock", &path, e))?;

        let payload_offset =
            FIXED_HEADER_LEN + group.len() as u64 + key.as_os_str().len() as u64;
        Ok(Some(Self {
            file,
            path,
            meta: SegmentMeta {
                app_id,
                group: group.to_string(),
                key: key.to_path_buf(),
                payload_len: 0,
                loaded: false,
            },
            payload_offset,
            map: None,
        }))
    }

    /// Attach to an existing, published segment for `(app_id, key)`.
    ///
    /// Returns `Ok(None)` when no usable segment exists: the file is
    /// absent, or it is an unfinished or structurally invalid leftover
    /// (which is unlinked here when no other process holds it).
    pub fn attach(dir: &Path, app_id: u32, key: &Path) -> Result<Option<Self>> {
        let path = segment_path(dir, app_id, key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("open", &path, e)),
        };

        let stale = |path: &Path, cause: &str| {
            tracing::warn!(segment = %path.display(), cause, "discarding stale segment");
            let _ = unlink_if_unused(path);
        };

        let (meta, payload_offset) = match read_meta(&mut file, &path) {
            Ok(parsed) => parsed,
            Err(BasaltError::Corrupt { cause, .. }) => {
                drop(file);
                stale(&path, &cause);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !meta.loaded {
            drop(file);
            stale(&path, "unpublished segment");
            return Ok(None);
        }
        if meta.app_id != app_id || meta.key != key {
            drop(file);
            stale(&path, "segment header names a different snapshot");
            return Ok(None);
        }

        let file_len = file
            .metadata()
            .map_err(|e| io_error("stat", &path, e))?
            .len();
        if payload_offset.checked_add(meta.payload_len) != Some(file_len) {
            drop(file);
            stale(&path, "segment length inconsistent with header");
            return Ok(None);
        }

        file.lock_shared().map_err(|e| io_error("lock", &path, e))?;
        let map = unsafe { Mmap::map(&file) }.map_err(|e| io_error("map", &path, e))?;

        Ok(Some(Self {
            file,
            path,
            meta,
            payload_offset,
            map: Some(map),
        }))
    }

    /// Publish a payload into a freshly created segment and map it.
    ///
    /// The payload is written and synced before the header flips to
    /// `Loaded`, so a crash mid-publish leaves an `Empty` segment that
    /// the next creator replaces.
    pub fn publish(&mut self, payload: &[u8]) -> Result<()> {
        let total = self.payload_offset + payload.len() as u64;
        self.file
            .set_len(total)
            .map_err(|e| io_error("truncate", &self.path, e))?;
        self.file
            .seek(SeekFrom::Start(self.payload_offset))
            .and_then(|_| self.file.write_all(payload))
            .and_then(|_| self.file.sync_all())
            .map_err(|e| io_error("write", &self.path, e))?;

        let header = fixed_header(
            self.meta.app_id,
            STATE_LOADED,
            payload.len() as u64,
            &self.meta.group,
            &self.meta.key,
        );
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&header))
            .and_then(|_| self.file.sync_all())
            .map_err(|e| io_error("write", &self.path, e))?;

        let map = unsafe { Mmap::map(&self.file) }.map_err(|e| io_error("map", &self.path, e))?;
        self.map = Some(map);
        self.meta.payload_len = payload.len() as u64;
        self.meta.loaded = true;
        Ok(())
    }

    /// View the published payload bytes.
    pub fn payload(&self) -> Result<&[u8]> {
        let map = self.map.as_ref().ok_or_else(|| BasaltError::Corrupt {
            path: self.path.clone(),
            cause: "segment payload not published".to_string(),
        })?;
        let start = self.payload_offset as usize;
        let end = start + self.meta.payload_len as usize;
        Ok(&map[start..end])
    }

    /// Path of the backing segment file.
    pub fn file_path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of [`open_or_create`].
pub(crate) enum Attach {
    /// A published segment already existed and was attached.
    Existing(Segment),
    /// A fresh, empty segment was created; the caller must publish.
    Fresh(Segment),
}

/// Attach the segment for `(app_id, key)`, creating it when absent.
///
/// Handles the cross-process creation race: losing the `create_new`
/// race falls back to attaching the winner's segment.
pub(crate) fn open_or_create(dir: &Path, app_id: u32, group: &str, key: &Path) -> Result<Attach> {
    if let Some(seg) = Segment::attach(dir, app_id, key)? {
        return Ok(Attach::Existing(seg));
    }
    match Segment::create(dir, app_id, group, key)? {
        Some(seg) => Ok(Attach::Fresh(seg)),
        None => match Segment::attach(dir, app_id, key)? {
            Some(seg) => Ok(Attach::Existing(seg)),
            // Another process is mid-creation and holds the file.
            None => Err(BasaltError::Io {
                op: "attach",
                path: segment_path(dir, app_id, key),
                cause: "segment exists but is not yet published".to_string(),
            }),
        },
    }
}

/// Unlink a segment file unless another process is attached to it.
///
/// Returns `Ok(true)` when the file was removed. A held shared lock
/// anywhere (including this process, through another handle) leaves the
/// file in place.
pub(crate) fn unlink_if_unused(path: &Path) -> Result<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(io_error("open", path, e)),
    };
    if file.try_lock_exclusive().is_err() {
        return Ok(false);
    }
    fs::remove_file(path).map_err(|e| io_error("unlink", path, e))?;
    Ok(true)
}

/// Enumerate segment files for `app_id` in the store.
///
/// Unparseable files that carry the app's name prefix are reported with
/// `None` metadata so cleanup can still reclaim them.
pub(crate) fn enumerate(dir: &Path, app_id: u32) -> Result<Vec<(PathBuf, Option<SegmentMeta>)>> {
    let prefix = format!("seg_{}_", app_id);
    let mut found = Vec::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(io_error("read_dir", dir, e)),
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) || !name.ends_with(".shm") {
            continue;
        }
        let path = entry.path();
        let meta = File::open(&path)
            .ok()
            .and_then(|mut file| read_meta(&mut file, &path).ok())
            .map(|(meta, _)| meta);
        found.push((path, meta));
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key_in(dir: &Path) -> PathBuf {
        let key = dir.join("data.snap");
        fs::write(&key, b"snapshot").unwrap();
        key
    }

    #[test]
    fn create_publish_attach_roundtrip() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("segs");
        let key = key_in(dir.path());

        let mut seg = Segment::create(&store, 1, "g", &key).unwrap().unwrap();
        seg.publish(b"payload-bytes").unwrap();
        assert_eq!(seg.payload().unwrap(), b"payload-bytes");
        drop(seg);

        let attached = Segment::attach(&store, 1, &key).unwrap().unwrap();
        assert_eq!(attached.payload().unwrap(), b"payload-bytes");
        assert_eq!(attached.meta.group, "g");
        assert_eq!(attached.meta.key, key);
    }

    #[test]
    fn attach_absent_is_none() {
        let dir = tempdir().unwrap();
        let key = key_in(dir.path());
        let seg = Segment::attach(&dir.path().join("segs"), 1, &key).unwrap();
        assert!(seg.is_none());
    }

    #[test]
    fn unpublished_segment_is_replaced() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("segs");
        let key = key_in(dir.path());

        // Creator "crashes" before publish: lock released, state Empty.
        let seg = Segment::create(&store, 1, "g", &key).unwrap().unwrap();
        drop(seg);

        assert!(Segment::attach(&store, 1, &key).unwrap().is_none());
        // The stale file was reclaimed, so create succeeds again.
        let mut seg = Segment::create(&store, 1, "g", &key).unwrap().unwrap();
        seg.publish(b"v2").unwrap();
        assert_eq!(seg.payload().unwrap(), b"v2");
    }

    #[test]
    fn attached_segment_resists_unlink() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("segs");
        let key = key_in(dir.path());

        let mut seg = Segment::create(&store, 1, "g", &key).unwrap().unwrap();
        seg.publish(b"held").unwrap();
        let seg_file = seg.file_path().to_path_buf();

        assert!(!unlink_if_unused(&seg_file).unwrap());
        drop(seg);
        assert!(unlink_if_unused(&seg_file).unwrap());
        assert!(!seg_file.exists());
    }

    #[test]
    fn enumerate_filters_by_app_id() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("segs");
        let key_a = key_in(dir.path());
        let key_b = dir.path().join("other.snap");
        fs::write(&key_b, b"x").unwrap();

        let mut seg_a = Segment::create(&store, 1, "g", &key_a).unwrap().unwrap();
        seg_a.publish(b"a").unwrap();
        let mut seg_b = Segment::create(&store, 2, "g", &key_b).unwrap().unwrap();
        seg_b.publish(b"b").unwrap();

        let found = enumerate(&store, 1).unwrap();
        assert_eq!(found.len(), 1);
        let meta = found[0].1.as_ref().unwrap();
        assert_eq!(meta.key, key_a);
        assert_eq!(meta.app_id, 1);
    }

    #[test]
    fn same_key_same_name_across_spellings() {
        let dir = tempdir().unwrap();
        let key = key_in(dir.path());
        let a = segment_path(Path::new("/store"), 1, &key);
        let b = segment_path(Path::new("/store"), 1, &key);
        assert_eq!(a, b);
        let other = segment_path(Path::new("/store"), 2, &key);
        assert_ne!(a, other);
    }
}
