//! The user-facing manager façade.
//!
//! A `Manager` bundles a group name and an app ID, tracks the entries
//! it registered (its local view), and releases them on drop. The first
//! live manager starts the janitor; the last one stops it and clears
//! the registry.

use crate::container::{ContainerSpec, OpenContainer, SharedContainer};
use crate::error::{BasaltError, Result};
use crate::janitor;
use crate::path::canonical_key;
use crate::registry::{ContainerStatus, Registry};
use crate::verify::VerifyFn;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// App ID used when the caller does not supply one.
pub const DEFAULT_APP_ID: u32 = 1;

/// A process-local handle for registering and releasing shared
/// containers.
///
/// Different app IDs inhabit the same process but ignore each other's
/// entries; the group name tags entries for group-scoped cleanup.
pub struct Manager {
    registry: Arc<Registry>,
    group: String,
    app_id: u32,
    local: Mutex<HashMap<PathBuf, Arc<dyn SharedContainer>>>,
}

impl Manager {
    /// Create a manager on the process-global registry with the
    /// default app ID.
    pub fn new(group: impl Into<String>) -> Result<Self> {
        Self::with_app_id(group, DEFAULT_APP_ID)
    }

    /// Create a manager on the process-global registry.
    pub fn with_app_id(group: impl Into<String>, app_id: u32) -> Result<Self> {
        Self::with_registry(Arc::clone(Registry::global()), group, app_id)
    }

    /// Create a manager on an explicitly constructed registry.
    pub fn with_registry(
        registry: Arc<Registry>,
        group: impl Into<String>,
        app_id: u32,
    ) -> Result<Self> {
        janitor::retain_manager(&registry)?;
        Ok(Self {
            registry,
            group: group.into(),
            app_id,
            local: Mutex::new(HashMap::new()),
        })
    }

    /// The group name this manager tags its entries with.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The app ID namespace this manager operates in.
    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    /// Register the snapshot at `path` as a container of type `C` and
    /// return the shared handle.
    ///
    /// At most one registration per canonical path exists at a time;
    /// concurrent registrations of the same path are serialised and the
    /// losers observe [`BasaltError::AlreadyRegistered`]. When the
    /// OS-side segment does not exist yet, the file is verified (if an
    /// expectation was recorded via `verify_files`) and loaded; when it
    /// does, both steps are skipped. No error or panic leaves a partial
    /// entry behind.
    pub fn register<C: OpenContainer>(&self, path: impl AsRef<Path>) -> Result<Arc<C>> {
        let key = canonical_key(path.as_ref())?;
        let spec = ContainerSpec {
            key: key.clone(),
            group: self.group.clone(),
            app_id: self.app_id,
            segments_dir: self.registry.settings().segments_dir.clone(),
        };
        let container = Arc::new(C::open(spec)?);
        let handle: Arc<dyn SharedContainer> = container.clone();
        self.registry
            .insert_loading(&key, Arc::clone(&handle), &self.group, self.app_id)?;

        match catch_unwind(AssertUnwindSafe(|| self.attach(&key, handle.as_ref()))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.registry.remove(&key);
                tracing::warn!(path = %key.display(), error = %e, "register failed");
                return Err(e);
            }
            Err(panic) => {
                handle.destroy();
                self.registry.remove(&key);
                let message = panic_message(panic);
                tracing::warn!(path = %key.display(), message = %message, "register panicked");
                return Err(BasaltError::RegisterPanicked { path: key, message });
            }
        }

        self.registry.set_status(&key, ContainerStatus::Ready)?;
        self.local.lock().insert(key.clone(), handle);
        tracing::info!(path = %key.display(), len = container.len(), "registered");
        Ok(container)
    }

    /// Attach the container: init under the shared init lock (with one
    /// OOM recovery retry), then verify and load unless the segment
    /// already existed.
    fn attach(&self, key: &Path, container: &dyn SharedContainer) -> Result<()> {
        let first = {
            let _init = self.registry.init_lock().lock();
            container.init()
        };
        match first {
            Ok(()) => {}
            Err(BasaltError::OutOfMemory { .. }) => {
                tracing::warn!(
                    path = %key.display(),
                    "attach hit memory exhaustion, evicting unregistered segments"
                );
                self.registry.clear_unregistered(self.app_id)?;
                let _init = self.registry.init_lock().lock();
                container.init()?;
            }
            Err(e) => return Err(e),
        }

        if !container.existed() {
            self.registry.verify_one(key)?;
            if let Err(e) = container.load() {
                container.destroy();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Retrieve an already-registered handle, or register it here when
    /// absent.
    pub fn get_or_register<C: OpenContainer>(&self, path: impl AsRef<Path>) -> Result<Arc<C>> {
        match self.registry.get::<C>(path.as_ref()) {
            Ok(handle) => {
                tracing::debug!(path = %path.as_ref().display(), "already registered");
                Ok(handle)
            }
            Err(BasaltError::NotRegistered { .. }) => self.register(path),
            Err(e) => Err(e),
        }
    }

    /// Release every entry in this manager's local view.
    ///
    /// Each entry transitions to `Releasing`; entries whose only
    /// remaining owner is the table are removed and destroyed now, the
    /// rest are left for the janitor. Also runs on drop.
    pub fn release(&self) {
        let mut local = self.local.lock();
        for (key, handle) in local.drain() {
            self.registry.release_local(&key, handle);
        }
    }

    /// Retrieve the typed handle for `path` from the process-global
    /// registry.
    pub fn get<C: SharedContainer>(path: impl AsRef<Path>) -> Result<Arc<C>> {
        Registry::global().get(path.as_ref())
    }

    /// Verify snapshot files against expected digests with the default
    /// verifier and app ID.
    pub fn verify_files(expected: &HashMap<PathBuf, String>) -> Result<()> {
        let registry = Registry::global();
        Self::verify_files_with(expected, registry.settings().default_verifier, DEFAULT_APP_ID)
    }

    /// Verify snapshot files with an explicit verifier and app ID.
    pub fn verify_files_with(
        expected: &HashMap<PathBuf, String>,
        verifier: VerifyFn,
        app_id: u32,
    ) -> Result<()> {
        Registry::global().verify_files(expected, verifier, app_id)
    }

    /// Remove every `app_id` entry whose key is not in `reserve` from
    /// the process-global registry.
    pub fn clear_by_file_list(reserve: &HashSet<PathBuf>, app_id: u32) -> usize {
        Registry::global().clear_by_file_list(reserve, app_id)
    }

    /// Remove every `app_id` entry whose group is not in `reserve` from
    /// the process-global registry.
    pub fn clear_by_group(reserve: &HashSet<String>, app_id: u32) -> usize {
        Registry::global().clear_by_group(reserve, app_id)
    }

    /// Destroy every `app_id`-tagged OS segment not present in the
    /// process-global registry.
    pub fn clear_unregistered(app_id: u32) -> Result<usize> {
        Registry::global().clear_unregistered(app_id)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.release();
        janitor::release_manager(&self.registry);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
