//! Do-it-yourself stage
//!
//! Lets any pre-existing directory act as a stage: nothing is fetched,
//! checked, expanded, or destroyed, because the directory is not owned by
//! the staging subsystem.

use crate::stage::Staging;
use async_trait::async_trait;
use smelt_errors::{Error, StageError};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct DIYStage {
    path: PathBuf,
}

impl DIYStage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Staging for DIYStage {
    async fn enter(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn exit(&mut self, _failed: bool) -> Result<(), Error> {
        Ok(())
    }

    async fn create(&mut self) -> Result<(), Error> {
        if self.path.is_dir() {
            Ok(())
        } else {
            Err(StageError::ChdirFailed {
                path: self.path.display().to_string(),
            }
            .into())
        }
    }

    async fn fetch(&mut self, _mirror_only: bool) -> Result<(), Error> {
        info!("No need to fetch for DIY.");
        Ok(())
    }

    async fn check(&self) -> Result<(), Error> {
        info!("No checksum needed for DIY.");
        Ok(())
    }

    async fn expand_archive(&mut self) -> Result<(), Error> {
        info!(path = %self.path.display(), "Using source directory");
        Ok(())
    }

    async fn restage(&mut self) -> Result<(), Error> {
        // There is nothing to re-derive the source tree from.
        Err(StageError::Restage {
            stage: self.path.display().to_string(),
            reason: "the source directory is not managed by smelt".to_string(),
        }
        .into())
    }

    async fn destroy(&mut self) -> Result<(), Error> {
        // The directory is not ours to remove.
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn source_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn archive_file(&self) -> Option<PathBuf> {
        None
    }

    fn set_keep(&mut self, _keep: bool) {}
}
