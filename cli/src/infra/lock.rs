//! Advisory file locks shared by every process using one state directory.
//!
//! Locks are `flock`-style and released when the holder drops the guard or
//! exits. Lock files are never deleted while in use: removing a file another
//! process is waiting on would let two holders lock different inodes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;

use crate::infra::fs;

/// How often a waiter retries a held lock.
const LOCK_POLL: Duration = Duration::from_millis(100);

/// Waiting longer than this is logged once.
const LOCK_WAIT_NOTICE: Duration = Duration::from_secs(5);

/// An exclusively held lock file. Dropping it releases the lock.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Take the lock at `path` if nobody holds it.
///
/// # Errors
///
/// Returns an error if the lock file cannot be created or locked.
pub fn try_lock(path: &Path) -> Result<Option<FileLock>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("opening lock file {}", path.display()))?;
    let acquired = file
        .try_lock_exclusive()
        .with_context(|| format!("locking {}", path.display()))?;
    Ok(acquired.then(|| FileLock {
        _file: file,
        path: path.to_path_buf(),
    }))
}

/// Wait until the lock at `path` is free, then take it.
///
/// Waiting never ties up a blocking thread, so dropping the future abandons
/// the wait cleanly.
///
/// # Errors
///
/// Returns an error if the lock file cannot be created or locked.
pub async fn lock(path: &Path) -> Result<FileLock> {
    let started = tokio::time::Instant::now();
    let mut noticed = false;
    loop {
        let attempt = path.to_path_buf();
        if let Some(lock) = fs::blocking("lock", move || try_lock(&attempt)).await? {
            return Ok(lock);
        }
        if !noticed && started.elapsed() >= LOCK_WAIT_NOTICE {
            tracing::info!(lock = %path.display(), "waiting for another devmachine process");
            noticed = true;
        }
        tokio::time::sleep(LOCK_POLL).await;
    }
}
