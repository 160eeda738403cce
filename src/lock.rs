//! Advisory lock held while a reserved product is being written.
//!
//! The lock is a sibling file (`<data file>.lock`) created with create-new
//! semantics and holding the owner id on one line. Only the owner that wrote
//! it removes it. Version scans never look at lock files.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: usize = 8;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 6_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

#[derive(Debug)]
pub struct LockGuard {
    lock_file: Option<PathBuf>,
    owner: String,
}

impl LockGuard {
    #[must_use]
    pub fn lock_file(&self) -> Option<&Path> {
        self.lock_file.as_deref()
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Keep the lock file on disk after this guard goes away.
    ///
    /// Used by one-shot callers (the CLI) that release through [`release_lock`].
    #[must_use]
    pub fn into_lock_file(mut self) -> Option<PathBuf> {
        self.lock_file.take()
    }

    pub fn release(mut self) -> anyhow::Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> anyhow::Result<()> {
        let Some(lock_file) = self.lock_file.take() else {
            return Ok(());
        };

        let owner = match fs::read_to_string(&lock_file) {
            Ok(s) => s.trim_end().to_string(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err).context("read lock file owner"),
        };

        if owner == self.owner {
            match fs::remove_file(&lock_file) {
                Ok(()) => {
                    tracing::debug!(lock_file = %lock_file.display(), "released product lock");
                    Ok(())
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err).context("remove lock file"),
            }
        } else {
            tracing::warn!(
                lock_file = %lock_file.display(),
                holder = %owner,
                "lock held by another owner; leaving it"
            );
            Ok(())
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

/// Release `lock_file` on behalf of `owner`. A missing file or a different
/// owner is not an error.
///
/// # Errors
/// Fails if the lock file cannot be read or removed.
pub fn release_lock(lock_file: &Path, owner: impl Into<String>) -> anyhow::Result<()> {
    let mut guard = LockGuard {
        lock_file: Some(lock_file.to_path_buf()),
        owner: owner.into(),
    };
    guard.release_inner()
}

/// Create `lock_file` for `owner`, retrying with backoff while someone else holds it.
///
/// # Errors
/// Returns `LOCK_TIMEOUT` when the retry budget runs out, or the I/O error
/// for any other create failure.
pub fn acquire_lock(
    lock_file: &Path,
    owner: impl Into<String>,
    cfg: LockConfig,
) -> anyhow::Result<LockGuard> {
    let owner = owner.into();
    let lock_file = lock_file.to_path_buf();

    let mut attempt: usize = 0;
    let mut wait_ms: u64 = cfg.initial_backoff_ms;

    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_file)
        {
            Ok(mut f) => {
                writeln!(f, "{owner}").context("write lock owner")?;
                f.flush().context("flush lock owner")?;
                tracing::debug!(lock_file = %lock_file.display(), %owner, "acquired product lock");
                return Ok(LockGuard {
                    lock_file: Some(lock_file),
                    owner,
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if attempt >= cfg.max_retries {
                    tracing::warn!(lock_file = %lock_file.display(), attempts = attempt + 1, "lock timeout");
                    return Err(anyhow::anyhow!("LOCK_TIMEOUT"));
                }
                sleep(Duration::from_millis(wait_ms));
                attempt = attempt.saturating_add(1);
                wait_ms = (wait_ms.saturating_mul(2)).min(cfg.max_backoff_ms);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create lock file {}", lock_file.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, ensure};
    use tempfile::tempdir;

    fn quick() -> LockConfig {
        LockConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    #[test]
    fn second_owner_times_out() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("p-1.dat.lock");
        let held = acquire_lock(&path, "aaaa", quick())?;
        ensure!(fs::read_to_string(&path)?.trim_end() == "aaaa");
        let Err(err) = acquire_lock(&path, "bbbb", quick()) else {
            bail!("second acquire should fail");
        };
        ensure!(err.to_string() == "LOCK_TIMEOUT");
        held.release()?;
        ensure!(!path.exists());
        Ok(())
    }

    #[test]
    fn foreign_release_leaves_lock() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("p-1.dat.lock");
        let held = acquire_lock(&path, "aaaa", quick())?;
        release_lock(&path, "bbbb")?;
        ensure!(path.exists());
        drop(held);
        ensure!(!path.exists());
        release_lock(&path, "aaaa")?;
        Ok(())
    }

    #[test]
    fn detached_guard_keeps_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("p-1.dat.lock");
        let kept = acquire_lock(&path, "aaaa", quick())?.into_lock_file();
        ensure!(kept.as_deref() == Some(path.as_path()));
        ensure!(path.exists());
        release_lock(&path, "aaaa")?;
        ensure!(!path.exists());
        Ok(())
    }
}
