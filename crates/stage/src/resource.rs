//! Resource stages
//!
//! A resource is an auxiliary archive that, once expanded in its own stage,
//! gets relocated into the source tree of a root stage at a configured
//! destination. Relocation is a physical move: downstream build code relies
//! on the content actually living inside the root tree.

use crate::stage::{Stage, StageHandle, Staging};
use async_trait::async_trait;
use smelt_errors::{Error, StageError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where expanded resource content goes, relative to the resource's
/// destination directory under the root stage's source tree.
#[derive(Debug, Clone)]
pub enum Placement {
    /// Move the whole expanded tree to this name.
    Single(String),
    /// Move selected entries of the expanded tree: each key is a relative
    /// path within the resource, each value its relative destination.
    Map(BTreeMap<String, String>),
}

/// Configuration for one auxiliary resource.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Destination directory relative to the root stage's source tree.
    pub destination: String,
    /// `None` keeps the expanded tree's own basename.
    pub placement: Option<Placement>,
}

impl Resource {
    #[must_use]
    pub fn new(destination: impl Into<String>, placement: Option<Placement>) -> Self {
        Self {
            destination: destination.into(),
            placement,
        }
    }
}

/// A stage whose expanded content is placed into a root stage.
pub struct ResourceStage {
    stage: Stage,
    root: StageHandle,
    resource: Resource,
}

impl ResourceStage {
    #[must_use]
    pub fn new(stage: Stage, root: StageHandle, resource: Resource) -> Self {
        Self {
            stage,
            root,
            resource,
        }
    }

    /// Normalized placement mapping: relative source entry → relative
    /// destination.
    fn placement_mapping(&self, source_path: &Path) -> BTreeMap<String, String> {
        match &self.resource.placement {
            None => {
                let basename = source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                BTreeMap::from([(String::new(), basename)])
            }
            Some(Placement::Single(name)) => BTreeMap::from([(String::new(), name.clone())]),
            Some(Placement::Map(map)) => map.clone(),
        }
    }

    /// Move the expanded resource content into the root stage's source
    /// tree. Entries whose destination already exists are left untouched,
    /// which makes repeated placement a no-op.
    async fn place(&self) -> Result<(), Error> {
        let source_path = self.stage.source_path().ok_or_else(|| {
            StageError::NoSourceDirectory {
                stage: self.stage.name().to_string(),
            }
        })?;
        let root_source = self.root.source_path().ok_or_else(|| {
            StageError::NoSourceDirectory {
                stage: self.root.name().to_string(),
            }
        })?;

        let target_path = root_source.join(&self.resource.destination);

        for (key, value) in self.placement_mapping(&source_path) {
            let entry_source = if key.is_empty() {
                source_path.clone()
            } else {
                source_path.join(&key)
            };
            let destination = target_path.join(&value);

            // Tolerates a pre-existing directory; any other failure is real.
            tokio::fs::create_dir_all(&target_path).await?;

            if !destination.exists() {
                info!(
                    source = %entry_source.display(),
                    destination = %destination.display(),
                    "moving resource into root stage"
                );
                tokio::fs::rename(&entry_source, &destination).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Staging for ResourceStage {
    async fn enter(&mut self) -> Result<(), Error> {
        self.stage.enter().await
    }

    async fn exit(&mut self, failed: bool) -> Result<(), Error> {
        self.stage.exit(failed).await
    }

    async fn create(&mut self) -> Result<(), Error> {
        self.stage.create().await
    }

    async fn fetch(&mut self, mirror_only: bool) -> Result<(), Error> {
        self.stage.fetch(mirror_only).await
    }

    async fn check(&self) -> Result<(), Error> {
        self.stage.check().await
    }

    async fn expand_archive(&mut self) -> Result<(), Error> {
        self.stage.expand_archive().await?;
        self.place().await
    }

    async fn restage(&mut self) -> Result<(), Error> {
        self.stage.restage().await
    }

    async fn destroy(&mut self) -> Result<(), Error> {
        self.stage.destroy().await
    }

    fn path(&self) -> &Path {
        Staging::path(&self.stage)
    }

    fn source_path(&self) -> Option<PathBuf> {
        self.stage.source_path()
    }

    fn archive_file(&self) -> Option<PathBuf> {
        self.stage.archive_file()
    }

    fn set_keep(&mut self, keep: bool) {
        self.stage.set_keep(keep);
    }
}
