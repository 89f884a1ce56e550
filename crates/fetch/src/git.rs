//! Git checkout strategy

use crate::{Fetcher, StageRef};
use async_trait::async_trait;
use smelt_errors::{Error, FetchError};
use smelt_hash::Hash;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Fetch strategy that checks a repository out with git.
///
/// The checkout lands in a subdirectory of the stage named after the
/// repository, so the stage's source-path discovery finds it the same way
/// it finds an expanded archive.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    url: String,
    reference: Option<String>,
    stage: Option<StageRef>,
}

impl GitFetcher {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reference: None,
            stage: None,
        }
    }

    /// Check out a specific branch, tag, or commit after cloning.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn stage(&self) -> Result<&StageRef, Error> {
        self.stage
            .as_ref()
            .ok_or_else(|| Error::internal("fetcher is not bound to a stage"))
    }

    /// Directory the clone lands in: `<stage>/<repo-name>`.
    fn checkout_path(&self) -> Result<PathBuf, Error> {
        let stage = self.stage()?;
        let name = self
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|n| n.trim_end_matches(".git"))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| FetchError::InvalidUrl {
                url: self.url.clone(),
            })?;
        Ok(stage.path().join(name))
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&PathBuf>) -> Result<(), Error> {
        let mut command = Command::new("git");
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let output = command
            .output()
            .await
            .map_err(|e| FetchError::GitCloneFailed {
                url: self.url.clone(),
                message: format!("failed to run git: {e}"),
            })?;

        if !output.status.success() {
            return Err(FetchError::GitCloneFailed {
                url: self.url.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn clone_into(&self, checkout: &PathBuf) -> Result<(), Error> {
        info!(url = %self.url, "cloning repository");
        self.run_git(
            &["clone", self.url.as_str(), &checkout.display().to_string()],
            None,
        )
        .await?;

        if let Some(reference) = &self.reference {
            self.run_git(&["checkout", reference], Some(checkout)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    fn bind(&mut self, stage: StageRef) {
        self.stage = Some(stage);
    }

    async fn fetch(&mut self) -> Result<(), Error> {
        let checkout = self.checkout_path()?;
        if tokio::fs::try_exists(&checkout).await? {
            debug!(checkout = %checkout.display(), "repository already checked out");
            return Ok(());
        }
        self.clone_into(&checkout).await
    }

    async fn check(&self) -> Result<(), Error> {
        debug!(url = %self.url, "no checksum for a repository checkout");
        Ok(())
    }

    async fn expand(&self) -> Result<(), Error> {
        // The clone already is the source tree.
        debug!(url = %self.url, "checkout needs no expansion");
        Ok(())
    }

    async fn reset(&self) -> Result<(), Error> {
        let checkout = self.checkout_path()?;
        if tokio::fs::try_exists(&checkout).await? {
            tokio::fs::remove_dir_all(&checkout).await?;
        }
        self.clone_into(&checkout).await
    }

    fn source_url(&self) -> Option<&str> {
        // A checkout leaves no archive file in the stage.
        None
    }

    fn digest(&self) -> Option<&Hash> {
        None
    }

    fn expands(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        match &self.reference {
            Some(reference) => format!("{} at {reference}", self.url),
            None => self.url.clone(),
        }
    }
}
