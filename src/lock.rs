// src/lock.rs

//! Per-package mutual exclusion
//!
//! Each package name maps to an advisory lock file. Locks are held per open
//! file, so they serialise threads of one process as well as separate
//! processes. Distinct names never contend.

use crate::error::{Error, InstallError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive hold on one package name, released on drop
#[derive(Debug)]
pub struct PackageLock {
    file: File,
    path: PathBuf,
}

impl PackageLock {
    /// Acquire the lock for `name`, waiting at most `timeout`
    pub fn acquire(lock_dir: &Path, name: &str, timeout: Duration) -> Result<Self> {
        fs::create_dir_all(lock_dir).map_err(|e| InstallError::io(lock_dir, e))?;

        let path = lock_dir.join(format!("{}.lock", lock_file_stem(name)));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| InstallError::io(&path, e))?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(InstallError::LockTimeout(name.to_string()).into());
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(InstallError::io(&path, e).into()),
            }
        }
    }

    /// Take the lock only if nobody holds it right now
    pub fn try_acquire(lock_dir: &Path, name: &str) -> Result<Option<Self>> {
        match Self::acquire(lock_dir, name, Duration::ZERO) {
            Ok(lock) => Ok(Some(lock)),
            Err(Error::Install(InstallError::LockTimeout(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Tap-qualified names contain `/`; keep lock files flat
pub(crate) fn lock_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}
