//! Archive download strategy
//!
//! Downloads one archive file into the stage directory, verifies it against
//! a BLAKE3 digest, and expands it into the source tree.

use crate::{Fetcher, NetClient, StageRef};
use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder, ZstdDecoder};
use async_trait::async_trait;
use futures::StreamExt;
use smelt_errors::{Error, FetchError};
use smelt_hash::Hash;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info};
use url::Url;

/// Supported archive container formats, detected from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
}

impl ArchiveFormat {
    pub(crate) fn detect(file_name: &str) -> Result<Self, Error> {
        let lower = file_name.to_lowercase();
        let format = if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Self::TarBz2
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Self::TarXz
        } else if lower.ends_with(".tar.zst") {
            Self::TarZst
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else {
            let format = Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_string();
            return Err(FetchError::UnsupportedArchiveFormat { format }.into());
        };
        Ok(format)
    }
}

/// Fetch strategy that downloads an archive from a URL.
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    url: String,
    digest: Option<Hash>,
    expand: bool,
    client: NetClient,
    stage: Option<StageRef>,
}

impl UrlFetcher {
    /// Create a fetcher for an archive URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or has no file name
    /// component.
    pub fn new(url: &str) -> Result<Self, Error> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        if basename_of(&parsed).is_none() {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            }
            .into());
        }

        Ok(Self {
            url: url.to_string(),
            digest: None,
            expand: true,
            client: NetClient::with_defaults()?,
            stage: None,
        })
    }

    /// Attach the digest the downloaded archive is verified against.
    #[must_use]
    pub fn with_digest(mut self, digest: Option<Hash>) -> Self {
        self.digest = digest;
        self
    }

    /// Treat the download as a bare file: no expansion, the stage directory
    /// itself is the source path.
    #[must_use]
    pub fn bare(mut self) -> Self {
        self.expand = false;
        self
    }

    /// Use a preconfigured HTTP client (shared connection pool, timeouts).
    #[must_use]
    pub fn with_client(mut self, client: NetClient) -> Self {
        self.client = client;
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

    /// Path the archive is downloaded to within the stage.
    fn archive_path(&self) -> Result<PathBuf, Error> {
        let stage = self.stage()?;
        let parsed = Url::parse(&self.url).map_err(|_| FetchError::InvalidUrl {
            url: self.url.clone(),
        })?;
        let name = basename_of(&parsed).ok_or_else(|| FetchError::InvalidUrl {
            url: self.url.clone(),
        })?;
        Ok(stage.path().join(name))
    }

    async fn download(&self, dest: &Path) -> Result<(), Error> {
        let response = self.client.get(&self.url).await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpError {
                status: response.status().as_u16(),
                url: self.url.clone(),
            }
            .into());
        }

        // Download to a partial file first so an interrupted transfer never
        // looks like a complete archive.
        let part_path = dest.with_extension("part");
        let mut file = File::create(&part_path).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::DownloadFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part_path, dest).await?;
        Ok(())
    }
}

#[async_trait]
impl Fetcher for UrlFetcher {
    fn bind(&mut self, stage: StageRef) {
        self.stage = Some(stage);
    }

    async fn fetch(&mut self) -> Result<(), Error> {
        let archive = self.archive_path()?;
        if tokio::fs::try_exists(&archive).await? {
            debug!(archive = %archive.display(), "archive already downloaded");
            return Ok(());
        }

        info!(url = %self.url, "fetching archive");
        self.download(&archive).await
    }

    async fn check(&self) -> Result<(), Error> {
        let archive = self.archive_path()?;
        let file = archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let Some(expected) = &self.digest else {
            return Err(FetchError::MissingDigest { file }.into());
        };

        let actual = Hash::hash_file(&archive).await?;
        if actual != *expected {
            return Err(FetchError::ChecksumMismatch {
                file,
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            }
            .into());
        }
        Ok(())
    }

    async fn expand(&self) -> Result<(), Error> {
        if !self.expand {
            debug!(url = %self.url, "fetched file is used as-is, skipping expansion");
            return Ok(());
        }

        let archive = self.archive_path()?;
        if !tokio::fs::try_exists(&archive).await? {
            return Err(FetchError::MissingArchive.into());
        }

        let stage = self.stage()?;
        extract_archive(&archive, stage.path()).await
    }

    async fn reset(&self) -> Result<(), Error> {
        let stage = self.stage()?;

        // Drop every expanded subdirectory; the retained archive file stays.
        let mut entries = tokio::fs::read_dir(stage.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
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
        self.expand
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn basename_of(url: &Url) -> Option<&str> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
}

/// Extract `archive` into `dest`, decompressing as dictated by the file name.
async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), Error> {
    let file_name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let format = ArchiveFormat::detect(file_name)?;

    // Decompress to a plain tar next to the archive, then unpack that with
    // blocking tar. The intermediate file is removed afterwards.
    let tar_path = if format == ArchiveFormat::Tar {
        archive.to_path_buf()
    } else {
        let tar_path = archive.with_extension("decompressed.tar");
        decompress(archive, &tar_path, format).await?;
        tar_path
    };

    let result = unpack_tar(&tar_path, dest).await;

    if tar_path != archive {
        let _ = tokio::fs::remove_file(&tar_path).await;
    }

    result
}

async fn decompress(src: &Path, dest: &Path, format: ArchiveFormat) -> Result<(), Error> {
    let input = File::open(src).await?;
    let reader = BufReader::new(input);
    let mut output = File::create(dest).await?;

    match format {
        ArchiveFormat::TarGz => {
            tokio::io::copy(&mut GzipDecoder::new(reader), &mut output).await?;
        }
        ArchiveFormat::TarBz2 => {
            tokio::io::copy(&mut BzDecoder::new(reader), &mut output).await?;
        }
        ArchiveFormat::TarXz => {
            tokio::io::copy(&mut XzDecoder::new(reader), &mut output).await?;
        }
        ArchiveFormat::TarZst => {
            tokio::io::copy(&mut ZstdDecoder::new(reader), &mut output).await?;
        }
        ArchiveFormat::Tar => {}
    }

    output.flush().await?;
    Ok(())
}

async fn unpack_tar(tar_path: &Path, dest: &Path) -> Result<(), Error> {
    let tar_path = tar_path.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&tar_path)?;
        let mut archive = tar::Archive::new(file);
        archive.set_preserve_permissions(true);
        archive.set_unpack_xattrs(false);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path().map_err(|e| FetchError::ExtractionFailed {
                message: e.to_string(),
            })?;

            if path
                .components()
                .any(|c| c == std::path::Component::ParentDir)
            {
                return Err(FetchError::ExtractionFailed {
                    message: "archive contains path traversal".to_string(),
                }
                .into());
            }

            entry.unpack_in(&dest)?;
        }

        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::internal(format!("extract task failed: {e}")))??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_formats() {
        assert_eq!(
            ArchiveFormat::detect("zlib-1.3.1.tar.gz").unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::detect("pkg.tgz").unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::detect("pkg.tar.xz").unwrap(),
            ArchiveFormat::TarXz
        );
        assert_eq!(ArchiveFormat::detect("pkg.tar").unwrap(), ArchiveFormat::Tar);
        assert!(ArchiveFormat::detect("pkg.rar").is_err());
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(UrlFetcher::new("not a url").is_err());
        assert!(UrlFetcher::new("https://example.com").is_err());
    }

    #[test]
    fn test_capability_properties() {
        let fetcher = UrlFetcher::new("https://example.com/dist/zlib-1.3.1.tar.gz").unwrap();
        assert_eq!(
            fetcher.source_url(),
            Some("https://example.com/dist/zlib-1.3.1.tar.gz")
        );
        assert!(fetcher.expands());
        assert!(fetcher.digest().is_none());

        let bare = UrlFetcher::new("https://example.com/dist/patch-1.diff")
            .unwrap()
            .bare();
        assert!(!bare.expands());
    }
}
