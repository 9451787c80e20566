//! Configuration knobs for a registry.

use crate::verify::{self, VerifyFn};
use std::path::PathBuf;
use std::time::Duration;

/// Default segment store: tmpfs, so segments are shared memory on Linux.
pub const DEFAULT_SEGMENTS_DIR: &str = "/dev/shm/basalt";

/// Default number of verifier worker threads.
pub const DEFAULT_VERIFY_WORKERS: usize = 4;

/// Default janitor sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for a [`Registry`](crate::Registry).
///
/// Installed once at registry construction; the process-global registry
/// uses `Settings::default()`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the OS-level shared segments.
    pub segments_dir: PathBuf,
    /// Parallelism of the verifier pool.
    pub verify_workers: usize,
    /// Period between janitor sweeps.
    pub sweep_interval: Duration,
    /// Verifier applied when the caller does not supply one.
    pub default_verifier: VerifyFn,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            segments_dir: PathBuf::from(DEFAULT_SEGMENTS_DIR),
            verify_workers: DEFAULT_VERIFY_WORKERS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            default_verifier: verify::sha256_verifier,
        }
    }
}

impl Settings {
    /// Create settings with a custom segment store directory.
    pub fn with_segments_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.segments_dir = dir.into();
        self
    }

    /// Create settings with a custom verifier pool size.
    ///
    /// A value of zero is treated as one worker.
    pub fn with_verify_workers(mut self, workers: usize) -> Self {
        self.verify_workers = workers.max(1);
        self
    }

    /// Create settings with a custom janitor sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Create settings with a custom default verifier.
    pub fn with_default_verifier(mut self, verifier: VerifyFn) -> Self {
        self.default_verifier = verifier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.segments_dir, PathBuf::from(DEFAULT_SEGMENTS_DIR));
        assert_eq!(settings.verify_workers, DEFAULT_VERIFY_WORKERS);
        assert_eq!(settings.sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }

    #[test]
    fn builders() {
        let settings = Settings::default()
            .with_segments_dir("/tmp/segs")
            .with_verify_workers(0)
            .with_sweep_interval(Duration::from_millis(50));
        assert_eq!(settings.segments_dir, PathBuf::from("/tmp/segs"));
        assert_eq!(settings.verify_workers, 1);
        assert_eq!(settings.sweep_interval, Duration::from_millis(50));
    }
}
