//! Advisory file locking for named stages
//!
//! One lock file per stage name (`<stageRoot>/<name>.lock`) serializes
//! whole staging sessions across package-manager processes. Acquisition is
//! exclusive with a bounded wait; release is idempotent and also happens on
//! drop.

use fs2::FileExt;
use smelt_errors::{Error, StageError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// How long a stage waits for its lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval while waiting for a contended lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Exclusive advisory lock on a stage's lock file.
#[derive(Debug)]
pub struct StageLock {
    path: PathBuf,
    file: Option<File>,
}

impl StageLock {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Acquire the lock exclusively, waiting up to `timeout`. Acquiring a
    /// lock this handle already holds is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::LockTimeout`] when the wait is exhausted, or an
    /// I/O error if the lock file cannot be created.
    pub async fn acquire(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::io_with_path(&e, &self.path))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock = %self.path.display(), "acquired stage lock");
                    self.file = Some(file);
                    return Ok(());
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(StageError::LockTimeout {
                            path: self.path.display().to_string(),
                            seconds: timeout.as_secs(),
                        }
                        .into());
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(e) => return Err(Error::io_with_path(&e, &self.path)),
            }
        }
    }

    /// Release the lock. Releasing an unheld lock is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
            debug!(lock = %self.path.display(), "released stage lock");
        }
    }
}

impl Drop for StageLock {
    fn drop(&mut self) {
        self.release();
    }
}
