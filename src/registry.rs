//! The process-wide registry table and its lifecycle operations.
//!
//! The registry is the single source of truth for what is attached in
//! this process. One readers/writer lock guards the table together with
//! the verified-file cache; a separate exclusive mutex serialises every
//! container `init` (the underlying shared-memory attach is not safely
//! concurrent across containers).
//!
//! Lock order: a manager's local lock, then the global lock, then the
//! init lock. Never acquire in the other direction.

use crate::container::SharedContainer;
use crate::error::{BasaltError, Result};
use crate::janitor::JanitorState;
use crate::path::canonical_key;
use crate::segment;
use crate::settings::Settings;
use crate::verify::{self, FileCheck, VerifyFn};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Lifecycle state of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Attach in progress; invisible to readers.
    Loading,
    /// Attached and readable.
    Ready,
    /// Scheduled for detach by its local owner.
    Releasing,
    /// Being removed from the registry.
    Deleting,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Releasing => "releasing",
            Self::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// One attached container and its lifecycle state.
pub(crate) struct Entry {
    pub handle: Arc<dyn SharedContainer>,
    pub status: ContainerStatus,
    pub group: String,
    pub app_id: u32,
}

/// Everything guarded by the global readers/writer lock.
struct State {
    table: HashMap<PathBuf, Entry>,
    verified: HashSet<PathBuf>,
    checks: HashMap<PathBuf, FileCheck>,
}

/// The process-wide registry of shared containers.
///
/// [`Manager`](crate::Manager) instances normally operate on the
/// process-global registry ([`Registry::global`]); independent
/// instances can be constructed for explicitly scoped lifecycles (the
/// tests do this).
pub struct Registry {
    state: RwLock<State>,
    init_lock: Mutex<()>,
    settings: Settings,
    pub(crate) janitor: JanitorState,
}

static GLOBAL: LazyLock<Arc<Registry>> =
    LazyLock::new(|| Arc::new(Registry::new(Settings::default())));

impl Registry {
    /// Create a registry with the given settings.
    pub fn new(settings: Settings) -> Self {
        Self {
            state: RwLock::new(State {
                table: HashMap::new(),
                verified: HashSet::new(),
                checks: HashMap::new(),
            }),
            init_lock: Mutex::new(()),
            settings,
            janitor: JanitorState::new(),
        }
    }

    /// The process-global registry, created on first use with default
    /// settings.
    pub fn global() -> &'static Arc<Registry> {
        &GLOBAL
    }

    /// The settings this registry was constructed with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The mutex serialising container `init` calls.
    pub(crate) fn init_lock(&self) -> &Mutex<()> {
        &self.init_lock
    }

    /// Insert a `Loading` entry for `key`.
    ///
    /// Exactly one concurrent caller per key succeeds; the rest observe
    /// [`BasaltError::AlreadyRegistered`].
    pub(crate) fn insert_loading(
        &self,
        key: &Path,
        handle: Arc<dyn SharedContainer>,
        group: &str,
        app_id: u32,
    ) -> Result<()> {
        let mut state = self.state.write();
        if state.table.contains_key(key) {
            return Err(BasaltError::AlreadyRegistered {
                path: key.to_path_buf(),
            });
        }
        state.table.insert(
            key.to_path_buf(),
            Entry {
                handle,
                status: ContainerStatus::Loading,
                group: group.to_string(),
                app_id,
            },
        );
        Ok(())
    }

    /// Transition the entry for `key` to `status`.
    pub(crate) fn set_status(&self, key: &Path, status: ContainerStatus) -> Result<()> {
        let mut state = self.state.write();
        match state.table.get_mut(key) {
            Some(entry) => {
                entry.status = status;
                Ok(())
            }
            None => Err(BasaltError::NotRegistered {
                path: key.to_path_buf(),
            }),
        }
    }

    /// Unconditionally erase the entry for `key`.
    pub(crate) fn remove(&self, key: &Path) {
        self.state.write().table.remove(key);
    }

    /// Look up the entry for `key` under the read side.
    pub(crate) fn lookup(&self, key: &Path) -> Option<(Arc<dyn SharedContainer>, ContainerStatus)> {
        let state = self.state.read();
        state
            .table
            .get(key)
            .map(|entry| (Arc::clone(&entry.handle), entry.status))
    }

    /// Retrieve the typed handle for `path`.
    ///
    /// Only `Ready` entries are visible; holding the returned handle
    /// keeps the underlying segment alive.
    ///
    /// # Errors
    ///
    /// [`BasaltError::NotRegistered`] when no entry exists,
    /// [`BasaltError::NotReady`] when the entry is not readable yet (or
    /// any more), [`BasaltError::TypeMismatch`] when the entry holds a
    /// different concrete container type.
    pub fn get<C: SharedContainer>(&self, path: &Path) -> Result<Arc<C>> {
        let key = canonical_key(path)?;
        let state = self.state.read();
        let entry = state
            .table
            .get(&key)
            .ok_or_else(|| BasaltError::NotRegistered { path: key.clone() })?;
        if entry.status != ContainerStatus::Ready {
            return Err(BasaltError::NotReady {
                path: key,
                status: entry.status,
            });
        }
        Arc::clone(&entry.handle)
            .as_any_arc()
            .downcast::<C>()
            .map_err(|_| BasaltError::TypeMismatch { path: key })
    }

    /// Drop the manager-held reference for `key` and transition the
    /// entry to `Releasing`; remove and destroy it when the table is
    /// the sole remaining owner.
    pub(crate) fn release_local(&self, key: &Path, local: Arc<dyn SharedContainer>) {
        let mut state = self.state.write();
        drop(local);
        match state.table.get_mut(key) {
            Some(entry) => {
                entry.status = ContainerStatus::Releasing;
                if Arc::strong_count(&entry.handle) != 1 {
                    // Readers still hold the handle; the janitor
                    // reclaims the entry once they drop it.
                    return;
                }
            }
            None => return,
        }
        if let Some(entry) = state.table.remove(key) {
            entry.handle.destroy();
            tracing::info!(path = %key.display(), "released and destroyed");
        }
    }

    /// Verify a batch of snapshot files against expected digests.
    ///
    /// Files already verified in this process are skipped; on success
    /// every checked file joins the verified cache. The expectations
    /// are also recorded so `register` can verify individual files
    /// later.
    pub fn verify_files(
        &self,
        expected: &HashMap<PathBuf, String>,
        verifier: VerifyFn,
        app_id: u32,
    ) -> Result<()> {
        let mut canonical = Vec::with_capacity(expected.len());
        for (path, digest) in expected {
            canonical.push((canonical_key(path)?, digest.clone()));
        }

        let remaining: Vec<(PathBuf, String)> = {
            let mut state = self.state.write();
            for (key, digest) in &canonical {
                state.checks.insert(
                    key.clone(),
                    FileCheck {
                        digest: digest.clone(),
                        verifier,
                    },
                );
            }
            canonical
                .into_iter()
                .filter(|(key, _)| !state.verified.contains(key))
                .collect()
        };
        if remaining.is_empty() {
            return Ok(());
        }

        tracing::info!(files = remaining.len(), app_id, "verifying snapshot files");
        verify::run_pool(&remaining, verifier, self.settings.verify_workers)?;

        let mut state = self.state.write();
        for (key, _) in remaining {
            state.verified.insert(key);
        }
        Ok(())
    }

    /// Verify a single file if an expectation was recorded for it.
    ///
    /// Returns immediately for files already in the verified cache; a
    /// file with no recorded expectation passes.
    pub(crate) fn verify_one(&self, key: &Path) -> Result<()> {
        let check = {
            let state = self.state.read();
            if state.verified.contains(key) {
                return Ok(());
            }
            match state.checks.get(key) {
                Some(check) => check.clone(),
                None => {
                    tracing::debug!(path = %key.display(), "no digest expectation recorded");
                    return Ok(());
                }
            }
        };
        if (check.verifier)(key, &check.digest)? {
            self.state.write().verified.insert(key.to_path_buf());
            Ok(())
        } else {
            Err(BasaltError::DigestMismatch {
                path: key.to_path_buf(),
            })
        }
    }

    /// Destroy every `app_id`-tagged OS segment whose key is not
    /// present in the table. Idempotent; segments held by any process
    /// are left alone.
    pub fn clear_unregistered(&self, app_id: u32) -> Result<usize> {
        let segments = segment::enumerate(&self.settings.segments_dir, app_id)?;
        let mut cleared = 0;
        for (seg_file, meta) in segments {
            let registered = match &meta {
                Some(meta) => self.state.read().table.contains_key(&meta.key),
                // Unparseable leftovers are never registered.
                None => false,
            };
            if registered {
                continue;
            }
            match segment::unlink_if_unused(&seg_file) {
                Ok(true) => {
                    cleared += 1;
                    tracing::info!(segment = %seg_file.display(), "cleared unregistered segment");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(segment = %seg_file.display(), error = %e, "clear failed")
                }
            }
        }
        Ok(cleared)
    }

    /// Remove every `app_id` entry whose key is not in `reserve`.
    ///
    /// Entries still referenced outside the table are marked `Deleting`
    /// and left for the janitor. Returns the number destroyed now.
    pub fn clear_by_file_list(&self, reserve: &HashSet<PathBuf>, app_id: u32) -> usize {
        let reserve: HashSet<PathBuf> = reserve
            .iter()
            .map(|path| canonical_key(path).unwrap_or_else(|_| path.clone()))
            .collect();
        self.clear_entries(app_id, |key, _| !reserve.contains(key))
    }

    /// Remove every `app_id` entry whose group is not in `reserve`.
    ///
    /// Same deferral rules as [`Registry::clear_by_file_list`].
    pub fn clear_by_group(&self, reserve: &HashSet<String>, app_id: u32) -> usize {
        self.clear_entries(app_id, |_, group| !reserve.contains(group))
    }

    fn clear_entries(&self, app_id: u32, doomed: impl Fn(&Path, &str) -> bool) -> usize {
        let mut state = self.state.write();
        let mut cleared = 0;
        state.table.retain(|key, entry| {
            if entry.app_id != app_id || !doomed(key.as_path(), &entry.group) {
                return true;
            }
            entry.status = ContainerStatus::Deleting;
            if Arc::strong_count(&entry.handle) != 1 {
                return true;
            }
            entry.handle.destroy();
            tracing::info!(path = %key.display(), "cleared entry");
            cleared += 1;
            false
        });
        cleared
    }

    /// One janitor pass: remove `Releasing`/`Deleting` entries whose
    /// last local owner has disappeared, destroying each.
    pub(crate) fn sweep(&self) -> usize {
        let mut state = self.state.write();
        let mut removed = 0;
        state.table.retain(|key, entry| {
            let stale = matches!(
                entry.status,
                ContainerStatus::Releasing | ContainerStatus::Deleting
            ) && Arc::strong_count(&entry.handle) == 1;
            if stale {
                entry.handle.destroy();
                tracing::info!(path = %key.display(), "janitor reclaimed entry");
                removed += 1;
            }
            !stale
        });
        removed
    }

    /// Clear all process-wide state after the last manager is gone.
    pub(crate) fn shutdown_clear(&self) {
        let mut state = self.state.write();
        for (key, entry) in state.table.drain() {
            if Arc::strong_count(&entry.handle) == 1 {
                entry.handle.destroy();
            } else {
                tracing::warn!(path = %key.display(), "entry still referenced at shutdown");
            }
        }
        state.verified.clear();
        state.checks.clear();
    }

    #[cfg(test)]
    pub(crate) fn table_len(&self) -> usize {
        self.state.read().table.len()
    }

    #[cfg(test)]
    pub(crate) fn is_verified(&self, key: &Path) -> bool {
        self.state.read().verified.contains(key)
    }
}
