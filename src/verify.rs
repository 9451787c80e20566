//! Parallel snapshot file verification.
//!
//! Verification is expensive I/O and digest work; the pool amortises it
//! across large snapshot sets and aborts early once any file is known
//! bad. Workers draw indices from a shared counter, honour a
//! cooperative stop flag, and record per-file outcomes under a mutex.

use crate::error::{io_error, BasaltError, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A verifier predicate over `(path, expected_digest)`.
///
/// `Ok(false)` reports a digest mismatch; `Err` reports an I/O fault.
/// Either outcome aborts the batch and leaves the file unverified.
pub type VerifyFn = fn(&Path, &str) -> Result<bool>;

/// A recorded expectation for one snapshot file.
#[derive(Clone)]
pub(crate) struct FileCheck {
    pub digest: String,
    pub verifier: VerifyFn,
}

/// Compute the lowercase SHA-256 hex digest of a file's contents.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| io_error("open", path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| io_error("read", path, e))?;
    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        hex.push_str(&format!("{:02x}", byte));
    }
    Ok(hex)
}

/// The default verifier: SHA-256 over the file contents, compared
/// case-insensitively against the expected hex digest.
pub fn sha256_verifier(path: &Path, expected: &str) -> Result<bool> {
    Ok(file_sha256(path)?.eq_ignore_ascii_case(expected))
}

/// Run the verifier over `files` with up to `workers` threads.
///
/// Succeeds only when every file was checked and passed. The first
/// observed failure sets the stop flag; files left unchecked after an
/// abort are reported through the batch error, never as verified.
pub(crate) fn run_pool(
    files: &[(PathBuf, String)],
    verifier: VerifyFn,
    workers: usize,
) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    let workers = workers.clamp(1, files.len());

    let next_index = AtomicUsize::new(0);
    let left_workers = AtomicUsize::new(workers);
    let stop = AtomicBool::new(false);
    let results: Mutex<Vec<Option<Result<bool>>>> =
        Mutex::new((0..files.len()).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index >= files.len() {
                        break;
                    }
                    let (path, digest) = &files[index];
                    let outcome = verifier(path, digest);
                    let passed = matches!(outcome, Ok(true));
                    results.lock()[index] = Some(outcome);
                    if !passed {
                        stop.store(true, Ordering::Release);
                    }
                }
                left_workers.fetch_sub(1, Ordering::AcqRel);
            });
        }
    });
    tracing::debug!(
        left = left_workers.load(Ordering::Acquire),
        files = files.len(),
        "verifier pool joined"
    );

    let mut mismatch = None;
    for (slot, (path, _)) in results.into_inner().into_iter().zip(files) {
        match slot {
            // None: skipped after an early abort elsewhere.
            Some(Ok(true)) | None => {}
            Some(Ok(false)) => {
                if mismatch.is_none() {
                    mismatch = Some(BasaltError::DigestMismatch { path: path.clone() });
                }
            }
            Some(Err(e)) => return Err(e),
        }
    }
    match mismatch {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
