#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration for the smelt package manager
//!
//! Loads the TOML configuration file and exposes the staging-related
//! settings: the stage root directory, the temp-staging switch, the ordered
//! list of temp-directory candidate templates, and the ordered mirror list.

use serde::{Deserialize, Serialize};
use smelt_errors::{ConfigError, Error};
use std::path::{Path, PathBuf};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stage: StageConfig,
    /// Ordered mirror list; order matters for fetch fallback.
    #[serde(default)]
    pub mirrors: Vec<Mirror>,
}

/// Staging area configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Directory that holds all named stage entries.
    #[serde(default = "default_stage_root")]
    pub root: PathBuf,
    /// When true, stage directories are backed by temp storage and the
    /// visible path under the stage root is a symlink.
    #[serde(default = "default_use_tmp")]
    pub use_tmp: bool,
    /// Candidate temp-directory templates, tried in order. `%u` expands to
    /// the current user name, a leading `~` to the home directory.
    #[serde(default = "default_tmp_dirs")]
    pub tmp_dirs: Vec<String>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            root: default_stage_root(),
            use_tmp: default_use_tmp(),
            tmp_dirs: default_tmp_dirs(),
        }
    }
}

/// A single configured mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    pub url: String,
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self, Error> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path).await,
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed as TOML.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::ReadFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SMELT_*` environment overrides on top of the loaded values.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Ok(root) = std::env::var("SMELT_STAGE_ROOT") {
            if root.is_empty() {
                return Err(ConfigError::Invalid {
                    message: "SMELT_STAGE_ROOT must not be empty".to_string(),
                }
                .into());
            }
            self.stage.root = PathBuf::from(root);
        }

        if let Ok(use_tmp) = std::env::var("SMELT_USE_TMP") {
            self.stage.use_tmp = match use_tmp.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => {
                    return Err(ConfigError::Invalid {
                        message: format!("invalid SMELT_USE_TMP value: {other}"),
                    }
                    .into())
                }
            };
        }

        Ok(())
    }

    /// Ordered mirror root URLs, in configuration order.
    #[must_use]
    pub fn mirror_urls(&self) -> Vec<String> {
        self.mirrors.iter().map(|m| m.url.clone()).collect()
    }

    fn validate(&self) -> Result<(), Error> {
        for mirror in &self.mirrors {
            if mirror.url.is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("mirror {} has an empty url", mirror.name),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn default_stage_root() -> PathBuf {
    dirs::home_dir()
        .map_or_else(|| PathBuf::from("/tmp/smelt"), |home| home.join(".smelt"))
        .join("stage")
}

fn default_use_tmp() -> bool {
    true
}

fn default_tmp_dirs() -> Vec<String> {
    vec![
        "/tmp/%u/smelt-stage".to_string(),
        "/var/tmp/%u/smelt-stage".to_string(),
        "/tmp/smelt-stage".to_string(),
    ]
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("smelt").join("config.toml"))
}
