//! Error types for basalt.
//!
//! Every failure surfaces as a [`BasaltError`] carrying the canonical path
//! it relates to. Each variant maps to one of the stable wire codes
//! (`OOM`, `PATH_INVALID`, …) exposed through [`BasaltError::code`], so
//! callers that dispatch on codes keep working across releases even when
//! variants gain context fields.

use crate::registry::ContainerStatus;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for basalt operations.
#[derive(Error, Debug)]
pub enum BasaltError {
    /// Shared memory (or the segment store backing it) is exhausted.
    #[error("OOM: shared memory exhausted while attaching {}: {}", path.display(), cause)]
    OutOfMemory {
        /// The canonical path whose attach ran out of memory.
        path: PathBuf,
        /// Reason reported by the OS.
        cause: String,
    },

    /// The caller-supplied path could not be canonicalised.
    #[error("PATH_INVALID: cannot canonicalise {}: {}", path.display(), cause)]
    InvalidPath {
        /// The path as supplied by the caller.
        path: PathBuf,
        /// Reason the resolution failed.
        cause: String,
    },

    /// An entry for this canonical path is already present in the registry.
    #[error("ALREADY_EXISTS: {} is already registered", path.display())]
    AlreadyRegistered {
        /// The canonical path of the existing entry.
        path: PathBuf,
    },

    /// No entry for this canonical path exists in the registry.
    #[error("NO_REGISTER: {} is not registered", path.display())]
    NotRegistered {
        /// The canonical path that was looked up.
        path: PathBuf,
    },

    /// The entry exists but is not in the `Ready` state.
    #[error("ERR_STATUS: {} is {}, not ready", path.display(), status)]
    NotReady {
        /// The canonical path of the entry.
        path: PathBuf,
        /// The state the entry was observed in.
        status: ContainerStatus,
    },

    /// The entry is ready but holds a different concrete container type.
    #[error("ERR_TYPE: {} is registered with a different container type", path.display())]
    TypeMismatch {
        /// The canonical path of the entry.
        path: PathBuf,
    },

    /// A panic escaped the container while registering; the in-flight
    /// entry was removed and the handle destroyed.
    #[error("EXCEPTION: register of {} panicked: {}", path.display(), message)]
    RegisterPanicked {
        /// The canonical path being registered.
        path: PathBuf,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// The file's digest did not match the expected value.
    #[error("MISMATCH: digest mismatch for {}", path.display())]
    DigestMismatch {
        /// The file that failed verification.
        path: PathBuf,
    },

    /// An I/O operation failed.
    #[error("IO_ERROR: {} failed for {}: {}", op, path.display(), cause)]
    Io {
        /// The operation that failed (open, read, map, …).
        op: &'static str,
        /// The file or segment the operation targeted.
        path: PathBuf,
        /// Reason reported by the OS.
        cause: String,
    },

    /// A snapshot or segment failed structural validation.
    #[error("IO_ERROR: {} is corrupt: {}", path.display(), cause)]
    Corrupt {
        /// The file that failed validation.
        path: PathBuf,
        /// Description of the inconsistency.
        cause: String,
    },
}

impl BasaltError {
    /// Get the stable wire code for this error (e.g. `"OOM"`).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "OOM",
            Self::InvalidPath { .. } => "PATH_INVALID",
            Self::AlreadyRegistered { .. } => "ALREADY_EXISTS",
            Self::NotRegistered { .. } => "NO_REGISTER",
            Self::NotReady { .. } => "ERR_STATUS",
            Self::TypeMismatch { .. } => "ERR_TYPE",
            Self::RegisterPanicked { .. } => "EXCEPTION",
            Self::DigestMismatch { .. } => "MISMATCH",
            Self::Io { .. } | Self::Corrupt { .. } => "IO_ERROR",
        }
    }

    /// Check if this error reports bad caller input; no registry state
    /// changed.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidPath { .. } | Self::TypeMismatch { .. })
    }

    /// Check if this error reports a contention or state condition the
    /// caller is expected to handle.
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRegistered { .. } | Self::NotRegistered { .. } | Self::NotReady { .. }
        )
    }

    /// Check if this error reports an integrity failure. Files that fail
    /// integrity checks are never marked as verified.
    #[must_use]
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::DigestMismatch { .. } | Self::Io { .. } | Self::Corrupt { .. }
        )
    }
}

/// Result type alias using `BasaltError`.
pub type Result<T> = std::result::Result<T, BasaltError>;

/// Map an I/O failure on a segment or snapshot file to a `BasaltError`,
/// distinguishing memory/space exhaustion from ordinary I/O faults.
pub(crate) fn io_error(op: &'static str, path: &std::path::Path, e: std::io::Error) -> BasaltError {
    // ENOMEM(12), ENOSPC(28), EDQUOT(122): the segment store is full.
    let exhausted = matches!(e.kind(), std::io::ErrorKind::OutOfMemory)
        || matches!(e.raw_os_error(), Some(12 | 28 | 122));
    if exhausted {
        BasaltError::OutOfMemory {
            path: path.to_path_buf(),
            cause: e.to_string(),
        }
    } else {
        BasaltError::Io {
            op,
            path: path.to_path_buf(),
            cause: e.to_string(),
        }
    }
}
