//! Stage path reconciliation
//!
//! Decides whether an existing entry at a stage path can be reused or has
//! to be rebuilt, removing stale placeholders (dead symlinks, plain files,
//! redirects into the wrong temp root) along the way.

use smelt_errors::{Error, StageError};
use std::path::Path;
use tracing::debug;

/// Outcome of reconciling a stage path against the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAction {
    /// The entry is a valid stage directory (or a live symlink into the
    /// temp root) and can be reused as-is.
    Reuse,
    /// Nothing usable is there; the caller must materialize the path.
    Create,
}

/// Inspect `path` and decide reuse vs. rebuild.
///
/// `tmp_root` is the effective temp root: `Some` only when temp staging is
/// enabled and a root was found. A symlink is only reusable when it points
/// to a live directory under that root; in every other case the stale entry
/// is removed and `Create` is returned.
///
/// # Errors
///
/// Returns an error if a stale entry cannot be removed.
pub fn reconcile(path: &Path, tmp_root: Option<&Path>) -> Result<PathAction, Error> {
    let Ok(metadata) = path.symlink_metadata() else {
        // Path doesn't exist yet.
        return Ok(PathAction::Create);
    };

    if metadata.file_type().is_symlink() {
        if let Some(tmp_root) = tmp_root {
            let real_path = path.canonicalize();
            let real_tmp = tmp_root.canonicalize();

            // Keep the link only if it resolves to a live directory inside
            // the real temp root.
            if let (Ok(real_path), Ok(real_tmp)) = (real_path, real_tmp) {
                if real_path.starts_with(&real_tmp) && real_path.exists() {
                    return Ok(PathAction::Reuse);
                }
            }
        }

        // Symlink where a real directory is expected, or a redirect to the
        // wrong place.
        debug!(path = %path.display(), "removing stale stage symlink");
        std::fs::remove_file(path).map_err(|e| Error::io_with_path(&e, path))?;
        return Ok(PathAction::Create);
    }

    if !metadata.is_dir() {
        // Path exists but points at something else. Blow it away.
        debug!(path = %path.display(), "removing stale stage entry");
        std::fs::remove_file(path).map_err(|e| Error::io_with_path(&e, path))?;
        return Ok(PathAction::Create);
    }

    Ok(PathAction::Reuse)
}

/// Remove `path` if it is a symlink whose target no longer exists.
///
/// # Errors
///
/// Returns an error if the dead link cannot be removed.
pub fn remove_if_dead_link(path: &Path) -> Result<(), Error> {
    if let Ok(metadata) = path.symlink_metadata() {
        if metadata.file_type().is_symlink() && !path.exists() {
            debug!(path = %path.display(), "removing dead stage link");
            std::fs::remove_file(path).map_err(|e| Error::io_with_path(&e, path))?;
        }
    }
    Ok(())
}

/// Recursively remove a stage entry. If it is a symlink, both the backing
/// target tree and the link itself are removed. A missing path is fine.
///
/// # Errors
///
/// Returns an error if removal fails.
pub async fn remove_linked_tree(path: &Path) -> Result<(), Error> {
    let Ok(metadata) = path.symlink_metadata() else {
        return Ok(());
    };

    if metadata.file_type().is_symlink() {
        if let Ok(target) = path.canonicalize() {
            if target.is_dir() {
                tokio::fs::remove_dir_all(&target).await?;
            }
        }
        tokio::fs::remove_file(path).await?;
    } else if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

/// Verify the caller can actually use the directory: read, write, and
/// traverse. Insufficient access is fatal for the whole run.
///
/// # Errors
///
/// Returns [`StageError::InsufficientPermissions`] when access is missing.
pub fn ensure_access(path: &Path) -> Result<(), Error> {
    if !can_access(path) {
        return Err(StageError::InsufficientPermissions {
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Probe the caller's effective access rather than inspecting permission
/// bits: a pre-existing entry can carry generous owner bits and still belong
/// to someone else. Listing exercises read and traverse; a scratch entry
/// (removed on drop) exercises write.
fn can_access(path: &Path) -> bool {
    if std::fs::read_dir(path).is_err() {
        return false;
    }
    tempfile::Builder::new()
        .prefix(".smelt-access-")
        .tempfile_in(path)
        .is_ok()
}
