//! Canonical path resolution.
//!
//! Registry keys are absolute, symlink-resolved paths: two callers
//! referencing the same underlying file always produce byte-identical
//! keys, however they spelled the path.

use crate::error::{BasaltError, Result};
use std::path::{Path, PathBuf};

/// Resolve a caller-supplied path to the canonical registry key.
///
/// Idempotent: resolving an already-canonical path returns it unchanged.
///
/// # Errors
///
/// Returns [`BasaltError::InvalidPath`] when the path cannot be
/// canonicalised (missing file, dangling symlink, permission failure).
pub fn canonical_key(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| BasaltError::InvalidPath {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })
}
