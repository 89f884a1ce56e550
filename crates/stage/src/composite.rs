//! Aggregate stage
//!
//! Treats an ordered collection of stage-like entities as a single stage:
//! lifecycle operations are broadcast to every member in insertion order,
//! while read-only queries reflect only the first member, the root stage.
//! Extra members exist purely to be fetched, expanded, and destroyed
//! alongside it (auxiliary resources, typically).

use crate::stage::Staging;
use async_trait::async_trait;
use smelt_errors::Error;
use std::path::{Path, PathBuf};

pub struct StageComposite {
    members: Vec<Box<dyn Staging>>,
    keep: bool,
}

impl StageComposite {
    /// A composite always has a root: the member all queries delegate to.
    #[must_use]
    pub fn with_root(root: Box<dyn Staging>) -> Self {
        Self {
            members: vec![root],
            keep: false,
        }
    }

    /// Append a member; it participates in every broadcast operation.
    pub fn push(&mut self, member: Box<dyn Staging>) {
        self.members.push(member);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Staging for StageComposite {
    async fn enter(&mut self) -> Result<(), Error> {
        for member in &mut self.members {
            member.enter().await?;
        }
        Ok(())
    }

    async fn exit(&mut self, failed: bool) -> Result<(), Error> {
        // Reverse order, propagating the composite's keep flag first.
        for member in self.members.iter_mut().rev() {
            member.set_keep(self.keep);
            member.exit(failed).await?;
        }
        Ok(())
    }

    async fn create(&mut self) -> Result<(), Error> {
        for member in &mut self.members {
            member.create().await?;
        }
        Ok(())
    }

    async fn fetch(&mut self, mirror_only: bool) -> Result<(), Error> {
        for member in &mut self.members {
            member.fetch(mirror_only).await?;
        }
        Ok(())
    }

    async fn check(&self) -> Result<(), Error> {
        for member in &self.members {
            member.check().await?;
        }
        Ok(())
    }

    async fn expand_archive(&mut self) -> Result<(), Error> {
        for member in &mut self.members {
            member.expand_archive().await?;
        }
        Ok(())
    }

    async fn restage(&mut self) -> Result<(), Error> {
        for member in &mut self.members {
            member.restage().await?;
        }
        Ok(())
    }

    async fn destroy(&mut self) -> Result<(), Error> {
        for member in &mut self.members {
            member.destroy().await?;
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        self.members[0].path()
    }

    fn source_path(&self) -> Option<PathBuf> {
        self.members[0].source_path()
    }

    fn archive_file(&self) -> Option<PathBuf> {
        self.members[0].archive_file()
    }

    fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }
}
