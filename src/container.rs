//! Container capability traits.
//!
//! The registry treats every container as an opaque object behind
//! [`SharedContainer`]; the concrete kinds live in
//! [`containers`](crate::containers). User code recovers the concrete
//! type at the read path through [`SharedContainer::as_any_arc`].

use crate::error::Result;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a container needs to bind to its shared segment.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Canonical path of the snapshot file; the registry key.
    pub key: PathBuf,
    /// Group name of the registering manager.
    pub group: String,
    /// App ID namespace of the registering manager.
    pub app_id: u32,
    /// Directory holding the OS-level shared segments.
    pub segments_dir: PathBuf,
}

/// Capability set every shared container exposes to the registry.
///
/// The lifecycle is driven by the registry, in this order: `init`
/// attaches or creates the OS-side segment; when `existed` reports
/// false the registry verifies the snapshot file and calls `load`;
/// `destroy` relinquishes the segment. A container must tolerate
/// `destroy` without a prior successful `init`.
pub trait SharedContainer: Any + Send + Sync {
    /// Attach to the OS-side segment, creating it when absent.
    ///
    /// Shared-memory exhaustion surfaces as
    /// [`BasaltError::OutOfMemory`](crate::BasaltError::OutOfMemory);
    /// the registry reacts by evicting unregistered segments and
    /// retrying once.
    fn init(&self) -> Result<()>;

    /// Whether the OS-side segment already existed when `init` ran.
    ///
    /// True means another process published the segment; the registry
    /// skips verification and `load`.
    fn existed(&self) -> bool;

    /// Populate the segment from the snapshot file at the key path.
    fn load(&self) -> Result<()>;

    /// Relinquish the segment. The OS-side region is unlinked only when
    /// no other process remains attached.
    fn destroy(&self);

    /// Number of elements in the container; zero before load completes.
    fn len(&self) -> usize;

    /// Whether the container holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up-cast for the typed down-cast at the read path.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Containers the registry can construct during `register`.
pub trait OpenContainer: SharedContainer + Sized {
    /// Construct an unattached container bound to `spec`.
    fn open(spec: ContainerSpec) -> Result<Self>;
}
