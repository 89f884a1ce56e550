//! Fetch strategy error types
//!
//! Individual fetcher failures are recoverable: the stage fallback loop
//! logs them and tries the next candidate.

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("HTTP {status} fetching {url}")]
    HttpError { status: u16, url: String },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("no digest available to verify {file}")]
    MissingDigest { file: String },

    #[error("no archive found in stage to expand")]
    MissingArchive,

    #[error("unsupported archive format: {format}")]
    UnsupportedArchiveFormat { format: String },

    #[error("extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("git clone failed for {url}: {message}")]
    GitCloneFailed { url: String, message: String },

    #[error("invalid digest: {message}")]
    InvalidDigest { message: String },
}

impl UserFacingError for FetchError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::DownloadFailed { .. } | Self::HttpError { .. } => {
                Some("Check network access or configure a mirror that carries this archive.")
            }
            Self::ChecksumMismatch { .. } => {
                Some("The downloaded archive does not match the recorded digest; remove it and retry.")
            }
            Self::GitCloneFailed { .. } => {
                Some("Verify the repository URL and that git is installed.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed { .. } | Self::HttpError { .. } | Self::GitCloneFailed { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidUrl { .. } => "fetch.invalid_url",
            Self::DownloadFailed { .. } => "fetch.download_failed",
            Self::HttpError { .. } => "fetch.http_error",
            Self::ChecksumMismatch { .. } => "fetch.checksum_mismatch",
            Self::MissingDigest { .. } => "fetch.missing_digest",
            Self::MissingArchive => "fetch.missing_archive",
            Self::UnsupportedArchiveFormat { .. } => "fetch.unsupported_archive_format",
            Self::ExtractionFailed { .. } => "fetch.extraction_failed",
            Self::GitCloneFailed { .. } => "fetch.git_clone_failed",
            Self::InvalidDigest { .. } => "fetch.invalid_digest",
        };
        Some(code)
    }
}
