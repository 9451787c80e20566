//! Basalt: a process-local registry for shared-memory snapshot
//! containers.
//!
//! Immutable containers (vectors, sets, maps, and their nested and
//! hashed variants) are serialised into snapshot files and attached as
//! OS-level shared segments, so many processes on one host read the
//! same bytes. Within a process, the registry deduplicates attachments,
//! validates file integrity before attach, and coordinates release and
//! eviction of segments nobody needs any more.
//!
//! # Key components
//!
//! - **Registry**: the process-wide table tracking each snapshot's
//!   lifecycle (`loading → ready → releasing/deleting`)
//! - **Manager**: the per-group façade through which containers are
//!   registered and released
//! - **Verifier pool**: parallel digest checking with early abort and a
//!   process-wide verified cache
//! - **Janitor**: background thread reclaiming entries whose local
//!   owners are gone
//!
//! # Example
//!
//! ```ignore
//! use basalt::{Manager, SharedVec};
//!
//! // Producer side: serialise a vector into a snapshot file.
//! SharedVec::dump("/data/ranks.snap".as_ref(), &ranks)?;
//!
//! // Consumer side: attach it (creating or joining the shared
//! // segment) and read.
//! let manager = Manager::new("ranking")?;
//! let ranks: Arc<SharedVec<u64>> = manager.register("/data/ranks.snap")?;
//! assert!(ranks.len() > 0);
//!
//! // Elsewhere in the process, without the manager:
//! let same: Arc<SharedVec<u64>> = Manager::get("/data/ranks.snap")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod containers;
pub mod error;
mod janitor;
pub mod manager;
pub mod path;
pub mod registry;
mod segment;
pub mod settings;
pub mod snapshot;
pub mod verify;

// Re-export key types at crate root for convenience
pub use container::{ContainerSpec, OpenContainer, SharedContainer};
pub use containers::{
    Payload, SharedHashMap, SharedHashSet, SharedMap, SharedNestedHashMap, SharedNestedVec,
    SharedSet, SharedVec,
};
pub use error::{BasaltError, Result};
pub use manager::{Manager, DEFAULT_APP_ID};
pub use path::canonical_key;
pub use registry::{ContainerStatus, Registry};
pub use settings::Settings;
pub use verify::{file_sha256, sha256_verifier, VerifyFn};
