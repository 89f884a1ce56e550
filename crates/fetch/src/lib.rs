#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Fetch strategies for smelt
//!
//! A fetch strategy knows how to retrieve the source content of one package
//! into a stage directory: downloading an archive from a URL, or checking a
//! repository out with git. Strategies are bound to a stage before use and
//! expose the capability properties the staging core queries (`source_url`,
//! `digest`, `expands`) instead of relying on type inspection.

mod client;
mod git;
mod url_fetch;

pub use client::{NetClient, NetConfig};
pub use git::GitFetcher;
pub use url_fetch::UrlFetcher;

use async_trait::async_trait;
use smelt_errors::Error;
use smelt_hash::Hash;
use std::path::{Path, PathBuf};

/// The slice of a stage a fetcher needs: its name (for messages) and the
/// directory content is fetched into.
#[derive(Debug, Clone)]
pub struct StageRef {
    name: String,
    path: PathBuf,
}

impl StageRef {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Capability contract every fetch strategy satisfies.
///
/// `fetch` failures are recoverable: the staging core logs them and falls
/// back to the next candidate (mirrors, then the default strategy).
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Bind this strategy to the stage it will fetch into. Must be called
    /// before any other operation.
    fn bind(&mut self, stage: StageRef);

    /// Retrieve the source content into the bound stage directory.
    async fn fetch(&mut self) -> Result<(), Error>;

    /// Verify the integrity of the fetched content.
    async fn check(&self) -> Result<(), Error>;

    /// Produce the source tree from the fetched content.
    async fn expand(&self) -> Result<(), Error>;

    /// Discard the expanded tree and re-expand from the retained content.
    async fn reset(&self) -> Result<(), Error>;

    /// URL of the archive file this strategy downloads, if any. Checkout
    /// based strategies return `None`: they leave no archive in the stage.
    fn source_url(&self) -> Option<&str>;

    /// Content digest the fetched archive is verified against, if known.
    fn digest(&self) -> Option<&Hash>;

    /// Whether the fetched content is expanded from an archive into a
    /// subdirectory, as opposed to being used as a bare file in the stage.
    fn expands(&self) -> bool;

    /// Human-readable description for log messages.
    fn describe(&self) -> String;
}
