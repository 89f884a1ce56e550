#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Stage lifecycle management for smelt
//!
//! A stage is the on-disk working area where one package's source code is
//! downloaded, verified, and expanded before the build step runs. This crate
//! owns the whole lifecycle of that area: creating it (optionally backed by
//! temp storage behind a symlink), arbitrating concurrent access with an
//! advisory file lock, falling back through configured mirrors when the
//! default fetch strategy fails, and tearing the area down safely.
//!
//! The usual shape of a staging session:
//!
//! ```ignore
//! let context = Arc::new(StageContext::from_config(&config));
//! let mut stage = Stage::named(fetcher, "zlib-1.3.1", context);
//! with_stage(&mut stage, |stage| {
//!     Box::pin(async move {
//!         stage.fetch(false).await?;
//!         stage.check().await?;
//!         stage.expand_archive().await?;
//!         // build from stage.source_path()
//!         Ok(())
//!     })
//! })
//! .await?;
//! ```
//!
//! On a clean exit the stage directory is removed (unless `keep` was
//! requested); when an error propagates out of the closure the directory is
//! left in place for inspection or resumption, and only the lock is
//! released.

mod composite;
mod context;
mod diy;
mod lock;
mod resolve;
mod resource;
mod stage;

pub use composite::StageComposite;
pub use context::StageContext;
pub use diy::DIYStage;
pub use lock::{StageLock, DEFAULT_LOCK_TIMEOUT};
pub use resource::{Placement, Resource, ResourceStage};
pub use stage::{with_stage, Stage, StageHandle, Staging};

use smelt_errors::Error;
use tracing::info;

/// Prefix used for generated (unnamed) stage names and for temp-backed
/// stage directories.
pub const STAGE_PREFIX: &str = "smelt-stage-";

/// Remove every entry directly under the stage root, following symlinks to
/// also remove their backing temp directories. Stray lock files go too.
///
/// # Errors
///
/// Returns an error if an entry cannot be removed.
pub async fn purge(context: &StageContext) -> Result<(), Error> {
    let root = context.stage_root();
    if !root.is_dir() {
        return Ok(());
    }

    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = path.symlink_metadata()?.file_type();
        if file_type.is_symlink() || file_type.is_dir() {
            resolve::remove_linked_tree(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }

    info!(root = %root.display(), "purged stage root");
    Ok(())
}
