//! The stage lifecycle manager

use crate::context::{generated_stage_name, StageContext};
use crate::lock::{StageLock, DEFAULT_LOCK_TIMEOUT};
use crate::resolve::{self, PathAction};
use crate::STAGE_PREFIX;
use async_trait::async_trait;
use futures::future::BoxFuture;
use smelt_errors::{Error, StageError};
use smelt_fetch::{Fetcher, StageRef, UrlFetcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle contract shared by [`Stage`], [`crate::ResourceStage`],
/// [`crate::DIYStage`], and [`crate::StageComposite`].
///
/// Entering acquires the stage's lock and materializes its directory;
/// exiting conditionally destroys the directory (clean exit, `keep` off)
/// and always releases the lock. [`with_stage`] wires both around a
/// closure so release runs on every path.
#[async_trait]
pub trait Staging: Send + Sync {
    /// Acquire the lock (bounded wait) and materialize the directory.
    async fn enter(&mut self) -> Result<(), Error>;

    /// Leave the staging scope. `failed` records whether an error is
    /// propagating out of the scope; a failed scope leaves the directory
    /// in place for inspection, but the lock is always released.
    async fn exit(&mut self, failed: bool) -> Result<(), Error>;

    /// Materialize the stage directory (idempotent).
    async fn create(&mut self) -> Result<(), Error>;

    /// Obtain source content, falling back through configured mirrors.
    async fn fetch(&mut self, mirror_only: bool) -> Result<(), Error>;

    /// Verify the fetched content against its digest.
    async fn check(&self) -> Result<(), Error>;

    /// Produce the source tree from the fetched content (idempotent).
    async fn expand_archive(&mut self) -> Result<(), Error>;

    /// Discard the expanded tree and re-expand from retained content.
    async fn restage(&mut self) -> Result<(), Error>;

    /// Remove the stage directory, following a symlinked path to its
    /// backing storage. Terminal: a destroyed stage must not be reused.
    async fn destroy(&mut self) -> Result<(), Error>;

    /// The stage directory (or symlink) under the stage root.
    fn path(&self) -> &Path;

    /// The expanded source tree: the first subdirectory of the stage, or
    /// the stage path itself for non-expanding fetch strategies.
    fn source_path(&self) -> Option<PathBuf>;

    /// The downloaded archive within the stage, if one exists on disk.
    fn archive_file(&self) -> Option<PathBuf>;

    /// Control whether a clean scope exit destroys the directory.
    fn set_keep(&mut self, keep: bool);
}

/// Run a staging session as a scoped resource.
///
/// Enters the stage (lock + create), runs the closure, and exits: a clean
/// run with `keep` off destroys the directory, an error leaves it in place
/// for later reuse or inspection, and the lock is released on every path.
///
/// # Errors
///
/// Returns the closure's error if it fails, otherwise any error raised
/// while entering or exiting the scope.
pub async fn with_stage<S, T, F>(stage: &mut S, f: F) -> Result<T, Error>
where
    S: Staging + ?Sized,
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T, Error>>,
{
    stage.enter().await?;
    let result = f(stage).await;
    let exit_result = stage.exit(result.is_err()).await;
    let value = result?;
    exit_result?;
    Ok(value)
}

/// A read-only view of a stage, enough to locate its source tree. Used by
/// resource stages to place content into their root stage.
#[derive(Debug, Clone)]
pub struct StageHandle {
    name: String,
    path: PathBuf,
    expands: bool,
}

impl StageHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Same discovery rule as [`Stage::source_path`], evaluated live.
    #[must_use]
    pub fn source_path(&self) -> Option<PathBuf> {
        scan_source_path(&self.path, self.expands)
    }
}

/// The working area for one package's fetched and expanded source.
pub struct Stage {
    name: String,
    path: PathBuf,
    mirror_path: Option<String>,
    default_fetcher: Box<dyn Fetcher>,
    /// Mirror strategy adopted during fallback; `None` means the default
    /// fetcher is active.
    active_fetcher: Option<Box<dyn Fetcher>>,
    /// Set during fetch: the adopted mirror copy has no digest to verify
    /// against (used for mirrored archives of repositories).
    skip_checksum_for_mirror: bool,
    keep: bool,
    lock: Option<StageLock>,
    lock_timeout: std::time::Duration,
    context: Arc<StageContext>,
    destroyed: bool,
}

impl Stage {
    /// A named stage, persistent across runs under the stage root.
    #[must_use]
    pub fn named(
        fetcher: Box<dyn Fetcher>,
        name: impl Into<String>,
        context: Arc<StageContext>,
    ) -> Self {
        let name = name.into();
        Self::build(fetcher, name, context)
    }

    /// An unnamed stage with a generated unique name, intended to live for
    /// a single run.
    #[must_use]
    pub fn unnamed(fetcher: Box<dyn Fetcher>, context: Arc<StageContext>) -> Self {
        Self::build(fetcher, generated_stage_name(), context)
    }

    fn build(fetcher: Box<dyn Fetcher>, name: String, context: Arc<StageContext>) -> Self {
        let path = context.stage_path(&name);
        let lock = Some(StageLock::new(context.lock_path(&name)));
        Self {
            name,
            path,
            mirror_path: None,
            default_fetcher: fetcher,
            active_fetcher: None,
            skip_checksum_for_mirror: true,
            keep: false,
            lock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            context,
            destroyed: false,
        }
    }

    /// Probe configured mirrors for this relative path before falling back
    /// to the default fetch strategy.
    #[must_use]
    pub fn with_mirror_path(mut self, mirror_path: impl Into<String>) -> Self {
        self.mirror_path = Some(mirror_path.into());
        self
    }

    /// Place the stage at an explicit path instead of under the stage root.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Retain the directory on clean scope exit.
    #[must_use]
    pub fn keep(mut self) -> Self {
        self.keep = true;
        self
    }

    /// Disable locking; appropriate for unnamed stages which are never
    /// contended.
    #[must_use]
    pub fn without_lock(mut self) -> Self {
        self.lock = None;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle other stages can use to locate this stage's source tree.
    #[must_use]
    pub fn handle(&self) -> StageHandle {
        StageHandle {
            name: self.name.clone(),
            path: self.path.clone(),
            expands: self.fetcher().expands(),
        }
    }

    /// The currently active fetch strategy (the adopted mirror during and
    /// after fallback, otherwise the configured default).
    #[must_use]
    pub fn fetcher(&self) -> &dyn Fetcher {
        self.active_fetcher
            .as_deref()
            .unwrap_or(&*self.default_fetcher)
    }

    /// The originally configured fetch strategy.
    #[must_use]
    pub fn default_fetcher(&self) -> &dyn Fetcher {
        &*self.default_fetcher
    }

    fn stage_ref(&self) -> StageRef {
        StageRef::new(&self.name, &self.path)
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.destroyed {
            return Err(StageError::Failed {
                message: format!("stage {} was destroyed and cannot be reused", self.name),
            }
            .into());
        }
        Ok(())
    }

    /// All paths the archive could be at, whether or not it exists:
    /// the basename of the fetch URL and of the mirror path, resolved
    /// against the stage directory.
    #[must_use]
    pub fn expected_archive_files(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(url) = self.fetcher().source_url() {
            if let Some(name) = url_basename(url) {
                paths.push(self.path.join(name));
            }
        }
        if let Some(mirror_path) = &self.mirror_path {
            if let Some(name) = url_basename(mirror_path) {
                paths.push(self.path.join(name));
            }
        }
        paths
    }

    /// Change the process working directory to the stage.
    ///
    /// # Errors
    ///
    /// Fails when the stage directory does not exist.
    pub fn chdir(&self) -> Result<(), Error> {
        if self.path.is_dir() {
            std::env::set_current_dir(&self.path).map_err(|e| Error::io_with_path(&e, &self.path))
        } else {
            Err(StageError::ChdirFailed {
                path: self.path.display().to_string(),
            }
            .into())
        }
    }

    /// Change the process working directory to the expanded source tree.
    ///
    /// # Errors
    ///
    /// Fatal when no source tree exists or the expansion is empty.
    pub fn chdir_to_source(&self) -> Result<(), Error> {
        let Some(source) = self.source_path() else {
            return Err(StageError::NoSourceDirectory {
                stage: self.name.clone(),
            }
            .into());
        };

        std::env::set_current_dir(&source).map_err(|e| Error::io_with_path(&e, &source))?;

        let mut entries =
            std::fs::read_dir(&source).map_err(|e| Error::io_with_path(&e, &source))?;
        if entries.next().is_none() {
            return Err(StageError::EmptySource {
                stage: self.name.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Build the ordered fetch candidate list and the checksum-skip flag.
    ///
    /// Mirror candidates are inserted at the front one at a time in mirror
    /// configuration order, so the try order ends up: last-configured
    /// mirror first, then earlier mirrors, then the default strategy (when
    /// `mirror_only` is off).
    fn fetch_plan(&self, mirror_only: bool) -> (Vec<FetchCandidate>, bool) {
        let mut candidates = Vec::new();
        if !mirror_only {
            candidates.push(FetchCandidate::Default);
        }

        let mut skip_checksum_for_mirror = true;
        if let Some(mirror_path) = &self.mirror_path {
            // Mirrored archives of URL-fetched packages reuse the default
            // strategy's digest; anything else cannot be checksummed.
            let digest = self.default_fetcher.digest().cloned();
            skip_checksum_for_mirror = digest.is_none();

            for mirror in self.context.mirrors() {
                // Roots are directory-like; without the trailing slash the
                // last path component would be stripped by the join.
                let mut root = mirror.url.clone();
                if !root.ends_with('/') {
                    root.push('/');
                }
                let candidate_url = match url::Url::parse(&root)
                    .and_then(|root| root.join(mirror_path))
                {
                    Ok(url) => url.to_string(),
                    Err(e) => {
                        warn!(mirror = %mirror.name, error = %e, "skipping unusable mirror root");
                        continue;
                    }
                };

                match UrlFetcher::new(&candidate_url) {
                    Ok(fetcher) => candidates.insert(
                        0,
                        FetchCandidate::Mirror(Box::new(fetcher.with_digest(digest.clone()))),
                    ),
                    Err(e) => {
                        warn!(url = %candidate_url, error = %e, "skipping unusable mirror URL");
                    }
                }
            }
        }

        (candidates, skip_checksum_for_mirror)
    }
}

/// One entry in the ordered fetch-fallback plan.
enum FetchCandidate {
    /// The configured default strategy, tried in place.
    Default,
    /// A mirror-derived URL strategy.
    Mirror(Box<dyn Fetcher>),
}

impl FetchCandidate {
    fn describe(&self, stage: &Stage) -> String {
        match self {
            Self::Default => stage.default_fetcher.describe(),
            Self::Mirror(fetcher) => fetcher.describe(),
        }
    }

    #[cfg(test)]
    fn mirror_url(&self) -> Option<String> {
        match self {
            Self::Default => None,
            Self::Mirror(fetcher) => fetcher.source_url().map(ToString::to_string),
        }
    }
}

#[async_trait]
impl Staging for Stage {
    async fn enter(&mut self) -> Result<(), Error> {
        self.ensure_live()?;
        if let Some(lock) = &mut self.lock {
            lock.acquire(self.lock_timeout).await?;
        }
        self.create().await
    }

    async fn exit(&mut self, failed: bool) -> Result<(), Error> {
        // An error propagating out of the scope leaves the directory for
        // later reuse or inspection; the lock is released regardless.
        let destroy_result = if !failed && !self.keep {
            self.destroy().await
        } else {
            Ok(())
        };

        if let Some(lock) = &mut self.lock {
            lock.release();
        }
        destroy_result
    }

    async fn create(&mut self) -> Result<(), Error> {
        self.ensure_live()?;
        tokio::fs::create_dir_all(self.context.stage_root()).await?;
        resolve::remove_if_dead_link(&self.path)?;

        if resolve::reconcile(&self.path, self.context.tmp_root())? == PathAction::Create {
            if let Some(tmp_root) = self.context.tmp_root() {
                // Back the stage with a uniquely-named temp directory and
                // surface it under the stage root as a symlink.
                let backing = tempfile::Builder::new()
                    .prefix(STAGE_PREFIX)
                    .tempdir_in(tmp_root)?
                    .keep();
                tokio::fs::symlink(&backing, &self.path).await?;
                debug!(stage = %self.name, backing = %backing.display(), "created temp-backed stage");
            } else {
                tokio::fs::create_dir_all(&self.path).await?;
                debug!(stage = %self.name, path = %self.path.display(), "created stage directory");
            }
        }

        // Make sure we can actually do something with the stage we made.
        resolve::ensure_access(&self.path)
    }

    async fn fetch(&mut self, mirror_only: bool) -> Result<(), Error> {
        self.ensure_live()?;
        if !self.path.is_dir() {
            return Err(StageError::ChdirFailed {
                path: self.path.display().to_string(),
            }
            .into());
        }

        let (candidates, skip_checksum) = self.fetch_plan(mirror_only);
        self.skip_checksum_for_mirror = skip_checksum;

        let stage_ref = self.stage_ref();
        for candidate in candidates {
            let description = candidate.describe(self);
            let outcome = match candidate {
                FetchCandidate::Default => {
                    self.active_fetcher = None;
                    self.default_fetcher.bind(stage_ref.clone());
                    self.default_fetcher.fetch().await
                }
                FetchCandidate::Mirror(mut fetcher) => {
                    fetcher.bind(stage_ref.clone());
                    match fetcher.fetch().await {
                        Ok(()) => {
                            self.active_fetcher = Some(fetcher);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(Error::Fetch(e)) => {
                    info!(fetcher = %description, error = %e, "fetching failed, trying next candidate");
                }
                Err(e) => return Err(e),
            }
        }

        self.active_fetcher = None;
        Err(StageError::AllFetchersFailed {
            stage: self.name.clone(),
        }
        .into())
    }

    async fn check(&self) -> Result<(), Error> {
        if self.active_fetcher.is_some() && self.skip_checksum_for_mirror {
            warn!(
                stage = %self.name,
                "Fetching from mirror without a checksum! This package is normally \
                 checked out from a version control system, but it has been archived \
                 on a mirror. This means we cannot know a checksum for the tarball in \
                 advance. Be sure that your connection to this mirror is secure!"
            );
            return Ok(());
        }
        self.fetcher().check().await
    }

    async fn expand_archive(&mut self) -> Result<(), Error> {
        self.ensure_live()?;
        if self.source_path().is_some() {
            info!(stage = %self.name, path = %self.path.display(), "already staged");
            return Ok(());
        }

        self.fetcher().expand().await?;
        info!(stage = %self.name, path = %self.path.display(), "created stage");
        Ok(())
    }

    async fn restage(&mut self) -> Result<(), Error> {
        self.ensure_live()?;
        self.fetcher().reset().await
    }

    async fn destroy(&mut self) -> Result<(), Error> {
        resolve::remove_linked_tree(&self.path).await?;

        // Make sure we don't end up in a removed directory.
        if std::env::current_dir().is_err() {
            if let Some(parent) = self.path.parent() {
                let _ = std::env::set_current_dir(parent);
            }
        }

        self.destroyed = true;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn source_path(&self) -> Option<PathBuf> {
        scan_source_path(&self.path, self.fetcher().expands())
    }

    fn archive_file(&self) -> Option<PathBuf> {
        self.expected_archive_files()
            .into_iter()
            .find(|path| path.exists())
    }

    fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }
}

/// Locate the expanded source tree within a stage directory.
///
/// Non-expanding strategies use the stage directory itself. Otherwise the
/// first subdirectory found is the source tree; exactly one is expected
/// after expansion.
fn scan_source_path(path: &Path, expands: bool) -> Option<PathBuf> {
    if !expands {
        return Some(path.to_path_buf());
    }

    let entries = std::fs::read_dir(path).ok()?;
    for entry in entries.flatten() {
        let candidate = entry.path();
        if candidate.is_dir() {
            return Some(candidate);
        }
    }
    None
}

fn url_basename(url: &str) -> Option<&str> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}
