//! Shared test fixtures: an in-memory fetch strategy that materializes a
//! fake archive and source tree instead of touching the network.

use async_trait::async_trait;
use smelt_errors::Error;
use smelt_fetch::{Fetcher, StageRef};
use smelt_hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct FetchStats {
    pub fetch_calls: AtomicUsize,
    pub expand_calls: AtomicUsize,
    pub reset_calls: AtomicUsize,
}

/// Fetch strategy that writes `<archive>` into the stage on fetch and
/// creates `<source_dir>/` with one file on expand.
pub struct FakeFetcher {
    archive: String,
    source_dir: String,
    url: String,
    digest: Option<Hash>,
    stage: Option<StageRef>,
    pub stats: Arc<FetchStats>,
}

impl FakeFetcher {
    pub fn new(archive: &str, source_dir: &str) -> Self {
        Self {
            archive: archive.to_string(),
            source_dir: source_dir.to_string(),
            url: format!("https://example.com/dist/{archive}"),
            digest: None,
            stage: None,
            stats: Arc::new(FetchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<FetchStats> {
        Arc::clone(&self.stats)
    }

    fn stage(&self) -> &StageRef {
        self.stage.as_ref().expect("fetcher bound to a stage")
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    fn bind(&mut self, stage: StageRef) {
        self.stage = Some(stage);
    }

    async fn fetch(&mut self) -> Result<(), Error> {
        self.stats.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let archive = self.stage().path().join(&self.archive);
        tokio::fs::write(&archive, b"archive bytes").await?;
        Ok(())
    }

    async fn check(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn expand(&self) -> Result<(), Error> {
        self.stats.expand_calls.fetch_add(1, Ordering::SeqCst);
        let source = self.stage().path().join(&self.source_dir);
        tokio::fs::create_dir_all(&source).await?;
        tokio::fs::write(source.join("configure"), b"#!/bin/sh\n").await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), Error> {
        self.stats.reset_calls.fetch_add(1, Ordering::SeqCst);
        let source = self.stage().path().join(&self.source_dir);
        if tokio::fs::try_exists(&source).await? {
            tokio::fs::remove_dir_all(&source).await?;
        }
        self.expand().await
    }

    fn source_url(&self) -> Option<&str> {
        Some(&self.url)
    }

    fn digest(&self) -> Option<&Hash> {
        self.digest.as_ref()
    }

    fn expands(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
