//! Background janitor reclaiming abandoned entries.
//!
//! The janitor runs on its own thread while any manager is alive,
//! guarded by a refcount: the first manager starts it, the last one
//! signals the run flag, wakes the thread, and joins it. The thread is
//! never detached.

use crate::error::{BasaltError, Result};
use crate::registry::Registry;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Janitor bookkeeping embedded in a [`Registry`].
pub(crate) struct JanitorState {
    /// Live manager count; also serialises start/stop transitions.
    managers: Mutex<usize>,
    handle: Mutex<Option<JoinHandle<()>>>,
    run: AtomicBool,
    sleep_lock: Mutex<()>,
    wakeup: Condvar,
}

impl JanitorState {
    pub fn new() -> Self {
        Self {
            managers: Mutex::new(0),
            handle: Mutex::new(None),
            run: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }
}

/// Account for a new manager; the 0→1 transition starts the janitor.
pub(crate) fn retain_manager(registry: &Arc<Registry>) -> Result<()> {
    let mut managers = registry.janitor.managers.lock();
    *managers += 1;
    if *managers > 1 {
        return Ok(());
    }

    registry.janitor.run.store(true, Ordering::Release);
    let spawned = std::thread::Builder::new()
        .name("basalt-janitor".to_string())
        .spawn({
            let registry = Arc::clone(registry);
            move || janitor_loop(registry)
        });
    match spawned {
        Ok(handle) => {
            *registry.janitor.handle.lock() = Some(handle);
            Ok(())
        }
        Err(e) => {
            registry.janitor.run.store(false, Ordering::Release);
            *managers -= 1;
            Err(BasaltError::Io {
                op: "spawn",
                path: registry.settings().segments_dir.clone(),
                cause: e.to_string(),
            })
        }
    }
}

/// Account for a dropped manager; the 1→0 transition stops and joins
/// the janitor, then clears the registry's process-wide state.
pub(crate) fn release_manager(registry: &Registry) {
    let mut managers = registry.janitor.managers.lock();
    if *managers == 0 {
        return;
    }
    *managers -= 1;
    if *managers > 0 {
        return;
    }

    registry.janitor.run.store(false, Ordering::Release);
    {
        let _sleep = registry.janitor.sleep_lock.lock();
        registry.janitor.wakeup.notify_all();
    }
    let handle = registry.janitor.handle.lock().take();
    if let Some(handle) = handle {
        if handle.join().is_err() {
            tracing::warn!("janitor thread panicked");
        }
    }

    registry.sweep();
    registry.shutdown_clear();
    tracing::debug!("registry cleared after last manager");
}

fn janitor_loop(registry: Arc<Registry>) {
    tracing::debug!("janitor started");
    let interval = registry.settings().sweep_interval;
    loop {
        {
            let mut sleep = registry.janitor.sleep_lock.lock();
            if !registry.janitor.run.load(Ordering::Acquire) {
                break;
            }
            let _ = registry.janitor.wakeup.wait_for(&mut sleep, interval);
        }
        if !registry.janitor.run.load(Ordering::Acquire) {
            break;
        }
        let removed = registry.sweep();
        if removed > 0 {
            tracing::debug!(removed, "janitor sweep reclaimed entries");
        }
    }
    tracing::debug!("janitor stopped");
}
