//! Cross-process per-record locks backed by advisory file locks.
//!
//! Each record path maps to a lock file whose name is the sanitized record
//! path. Acquisition polls `try_lock_exclusive` at a bounded interval until an
//! overall timeout. The OS drops advisory locks when the owning process
//! exits, so a lock abandoned by a crashed process is simply acquired.
//!
//! Lock files stay in place after use. Unlinking one while another process
//! has it open would let two holders lock different inodes.

use crate::cancel::CancellationToken;
use crate::config::CacheConfig;
use crate::error::{MetadataError, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Turn a record path into a flat lock name.
///
/// Names longer than `CacheConfig::MAX_LOCK_NAME_LEN` become a SHA-256 digest
/// of the full name followed by its tail.
pub fn sanitize_lock_name(path: &Path) -> String {
    let flat = path
        .to_string_lossy()
        .trim_start_matches(['/', '\\'])
        .replace(['/', '\\', ':'], "_");
    if flat.len() <= CacheConfig::MAX_LOCK_NAME_LEN {
        return flat;
    }

    let digest = hex::encode(Sha256::digest(flat.as_bytes()));
    let keep = CacheConfig::MAX_LOCK_NAME_LEN - digest.len() - 1;
    let mut start = flat.len() - keep;
    while !flat.is_char_boundary(start) {
        start += 1;
    }
    format!("{}_{}", digest, &flat[start..])
}

/// Polling bounds for one acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockWait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for LockWait {
    fn default() -> Self {
        Self {
            poll_interval: CacheConfig::LOCK_POLL_INTERVAL,
            timeout: CacheConfig::LOCK_TIMEOUT,
        }
    }
}

/// Issues named locks under one lock directory.
#[derive(Debug, Clone)]
pub struct NamedFileLock {
    lock_dir: PathBuf,
}

impl NamedFileLock {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    pub fn lock_path_for(&self, record_path: &Path) -> PathBuf {
        self.lock_dir.join(format!(
            "{}.{}",
            sanitize_lock_name(record_path),
            CacheConfig::LOCK_EXTENSION
        ))
    }

    /// Acquire the lock for `record_path`.
    ///
    /// Fails with `LockTimeout` once `wait.timeout` has elapsed and with
    /// `Cancelled` as soon as `cancel` fires between polls.
    pub async fn acquire(
        &self,
        record_path: &Path,
        wait: LockWait,
        cancel: &CancellationToken,
    ) -> Result<FileLockGuard> {
        std::fs::create_dir_all(&self.lock_dir)
            .map_err(|e| MetadataError::io_with_path(e, &self.lock_dir))?;

        let lock_path = self.lock_path_for(record_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| MetadataError::io_with_path(e, &lock_path))?;

        let started = Instant::now();
        loop {
            cancel.check()?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Locked {}", lock_path.display());
                    return Ok(FileLockGuard {
                        file,
                        path: lock_path,
                    });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {}
                Err(e) => return Err(MetadataError::io_with_path(e, &lock_path)),
            }

            let elapsed = started.elapsed();
            if elapsed >= wait.timeout {
                return Err(MetadataError::LockTimeout {
                    resource: record_path.display().to_string(),
                    waited: elapsed,
                });
            }

            let pause = wait.poll_interval.min(wait.timeout - elapsed);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MetadataError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

/// Held lock; unlocked exactly once when dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
