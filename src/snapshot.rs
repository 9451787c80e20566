//! On-disk snapshot files.
//!
//! A snapshot is the immutable serialised form of one container:
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────────┬─────────┬────────────────┐
//! │ magic "BSNP" │ version u32 │ payload_len u64  │ payload │ sha256(payload)│
//! └──────────────┴─────────────┴──────────────────┴─────────┴────────────────┘
//! ```
//!
//! The embedded digest guards the load path against torn or truncated
//! files; it is independent of the caller-facing verifier pool, which
//! checks externally supplied expectations.
//!
//! The `dump_*` helpers are pure serialisation utilities over
//! user-supplied in-memory collections; they hold no load-side state.

use crate::error::{io_error, BasaltError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Snapshot file format version.
const SNAPSHOT_VERSION: u32 = 1;
/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"BSNP";
/// Size of the trailing SHA-256 digest.
const DIGEST_LEN: usize = 32;

/// Write a snapshot file containing `payload`.
///
/// Writes to a temporary sibling first and renames into place, so a
/// reader never observes a half-written snapshot.
pub fn write_snapshot(path: &Path, payload: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("snap.tmp");

    let file = File::create(&temp_path).map_err(|e| io_error("create", &temp_path, e))?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(SNAPSHOT_MAGIC)
        .and_then(|_| writer.write_all(&SNAPSHOT_VERSION.to_le_bytes()))
        .and_then(|_| writer.write_all(&(payload.len() as u64).to_le_bytes()))
        .and_then(|_| writer.write_all(payload))
        .and_then(|_| writer.write_all(&Sha256::digest(payload)))
        .map_err(|e| io_error("write", &temp_path, e))?;

    writer.flush().map_err(|e| io_error("flush", &temp_path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| io_error("sync", &temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| io_error("rename", path, e))?;
    Ok(())
}

/// Read and validate a snapshot file, returning its payload bytes.
///
/// # Errors
///
/// [`BasaltError::Corrupt`] on bad magic, unsupported version, truncated
/// payload, or digest mismatch; [`BasaltError::Io`] on read failures.
pub fn read_payload(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| io_error("open", path, e))?;
    let file_len = file
        .metadata()
        .map_err(|e| io_error("stat", path, e))?
        .len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| io_error("read", path, e))?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(BasaltError::Corrupt {
            path: path.to_path_buf(),
            cause: "bad snapshot magic".to_string(),
        });
    }

    let mut version_bytes = [0u8; 4];
    reader
        .read_exact(&mut version_bytes)
        .map_err(|e| io_error("read", path, e))?;
    let version = u32::from_le_bytes(version_bytes);
    if version != SNAPSHOT_VERSION {
        return Err(BasaltError::Corrupt {
            path: path.to_path_buf(),
            cause: format!("unsupported snapshot version {}", version),
        });
    }

    let mut len_bytes = [0u8; 8];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| io_error("read", path, e))?;
    let len = u64::from_le_bytes(len_bytes);

    let header_len = (SNAPSHOT_MAGIC.len() + 4 + 8) as u64;
    if len.checked_add(header_len + DIGEST_LEN as u64) != Some(file_len) {
        return Err(BasaltError::Corrupt {
            path: path.to_path_buf(),
            cause: format!(
                "payload length {} inconsistent with file length {}",
                len, file_len
            ),
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|e| io_error("read", path, e))?;

    let mut digest = [0u8; DIGEST_LEN];
    reader
        .read_exact(&mut digest)
        .map_err(|e| io_error("read", path, e))?;
    if digest[..] != Sha256::digest(&payload)[..] {
        return Err(BasaltError::Corrupt {
            path: path.to_path_buf(),
            cause: "payload digest mismatch".to_string(),
        });
    }

    Ok(payload)
}

fn encode<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BasaltError::Io {
        op: "encode",
        path: path.to_path_buf(),
        cause: e.to_string(),
    })
}

fn dump<T: Serialize + ?Sized>(path: &Path, value: &T, kind: &str, len: usize) -> Result<()> {
    let payload = encode(path, value)?;
    write_snapshot(path, &payload)?;
    tracing::info!(path = %path.display(), kind, len, "dumped snapshot");
    Ok(())
}

/// Dump a vector snapshot readable by [`SharedVec`](crate::SharedVec).
pub fn dump_vec<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    dump(path, items, "vec", items.len())
}

/// Dump a nested-vector snapshot readable by
/// [`SharedNestedVec`](crate::SharedNestedVec).
pub fn dump_nested_vec<T: Serialize>(path: &Path, items: &[Vec<T>]) -> Result<()> {
    dump(path, items, "nested_vec", items.len())
}

/// Dump an ordered-set snapshot readable by [`SharedSet`](crate::SharedSet).
pub fn dump_set<T: Serialize + Ord>(path: &Path, set: &BTreeSet<T>) -> Result<()> {
    dump(path, set, "set", set.len())
}

/// Dump a hash-set snapshot readable by
/// [`SharedHashSet`](crate::SharedHashSet).
pub fn dump_hash_set<T: Serialize>(path: &Path, set: &HashSet<T>) -> Result<()> {
    let items: Vec<&T> = set.iter().collect();
    dump(path, &items, "hash_set", set.len())
}

/// Dump an ordered-map snapshot readable by [`SharedMap`](crate::SharedMap).
///
/// Entries are written as `[key, value]` pairs in key order, so lookups
/// on the shared side can binary-search without rebuilding the map.
pub fn dump_map<K: Serialize + Ord, V: Serialize>(path: &Path, map: &BTreeMap<K, V>) -> Result<()> {
    let pairs: Vec<(&K, &V)> = map.iter().collect();
    dump(path, &pairs, "map", map.len())
}

/// Dump a hash-map snapshot readable by
/// [`SharedHashMap`](crate::SharedHashMap).
pub fn dump_hash_map<K: Serialize, V: Serialize>(path: &Path, map: &HashMap<K, V>) -> Result<()> {
    let pairs: Vec<(&K, &V)> = map.iter().collect();
    dump(path, &pairs, "hash_map", map.len())
}

/// Dump a nested hash-map snapshot readable by
/// [`SharedNestedHashMap`](crate::SharedNestedHashMap).
pub fn dump_nested_hash_map<K: Serialize, V: Serialize>(
    path: &Path,
    map: &HashMap<K, Vec<V>>,
) -> Result<()> {
    let pairs: Vec<(&K, &Vec<V>)> = map.iter().collect();
    dump(path, &pairs, "nested_hash_map", map.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.snap");
        write_snapshot(&path, b"[1,2,3]").unwrap();
        assert_eq!(read_payload(&path).unwrap(), b"[1,2,3]");
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.snap");
        fs::write(&path, b"NOPE-not-a-snapshot").unwrap();
        let err = read_payload(&path).unwrap_err();
        assert!(matches!(err, BasaltError::Corrupt { .. }));
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.snap");
        write_snapshot(&path, b"payload-bytes").unwrap();

        let mut bytes = fs::read(&path).unwrap();
        // Flip a byte inside the payload region, past the 16-byte header.
        bytes[18] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = read_payload(&path).unwrap_err();
        assert!(matches!(err, BasaltError::Corrupt { .. }));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.snap");
        write_snapshot(&path, b"some payload").unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let err = read_payload(&path).unwrap_err();
        assert!(matches!(err, BasaltError::Corrupt { .. }));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.snap");
        dump_vec(&path, &[1u32, 2, 3]).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("snap.tmp").exists());
    }
}
