//! Staging error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StageError {
    #[error("staging failed: {message}")]
    Failed { message: String },

    #[error("cannot restage {stage}: {reason}")]
    Restage { stage: String, reason: String },

    #[error("no such directory: {path}")]
    ChdirFailed { path: String },

    #[error("no expanded source in stage {stage}")]
    NoSourceDirectory { stage: String },

    #[error("archive was empty for {stage}")]
    EmptySource { stage: String },

    #[error("insufficient permissions for {path}")]
    InsufficientPermissions { path: String },

    #[error("timed out waiting for lock on {path} after {seconds} seconds")]
    LockTimeout { path: String, seconds: u64 },

    #[error("all fetchers failed for {stage}")]
    AllFetchersFailed { stage: String },
}

impl UserFacingError for StageError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Another smelt process is using this stage; wait for it or remove the stale lock file.")
            }
            Self::AllFetchersFailed { .. } => {
                Some("Check network access and the configured mirrors, then retry.")
            }
            Self::InsufficientPermissions { .. } => {
                Some("Fix the permissions on the stage directory or choose a different stage root.")
            }
            Self::Restage { .. } => {
                Some("Stages backed by an existing source directory cannot be re-expanded.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::AllFetchersFailed { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Failed { .. } => "stage.failed",
            Self::Restage { .. } => "stage.restage",
            Self::ChdirFailed { .. } => "stage.chdir_failed",
            Self::NoSourceDirectory { .. } => "stage.no_source_directory",
            Self::EmptySource { .. } => "stage.empty_source",
            Self::InsufficientPermissions { .. } => "stage.insufficient_permissions",
            Self::LockTimeout { .. } => "stage.lock_timeout",
            Self::AllFetchersFailed { .. } => "stage.all_fetchers_failed",
        };
        Some(code)
    }
}
