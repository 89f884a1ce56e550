//! Process-wide staging context
//!
//! One immutable snapshot of everything a stage needs from configuration:
//! the stage root, the resolved temp root (if temp staging is enabled and a
//! writable candidate exists), and the ordered mirror list. The snapshot is
//! produced once per run and shared by every stage constructor.

use crate::STAGE_PREFIX;
use smelt_config::{Config, Mirror};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StageContext {
    stage_root: PathBuf,
    tmp_root: Option<PathBuf>,
    mirrors: Vec<Mirror>,
}

impl StageContext {
    /// Build the staging snapshot from loaded configuration, resolving the
    /// temp root by probing the configured candidate templates in order.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let tmp_root = if config.stage.use_tmp {
            find_tmp_root(&config.stage.tmp_dirs)
        } else {
            None
        };

        Self {
            stage_root: config.stage.root.clone(),
            tmp_root,
            mirrors: config.mirrors.clone(),
        }
    }

    /// A context rooted at `stage_root` with temp staging off and no
    /// mirrors.
    #[must_use]
    pub fn new(stage_root: impl Into<PathBuf>) -> Self {
        Self {
            stage_root: stage_root.into(),
            tmp_root: None,
            mirrors: Vec::new(),
        }
    }

    /// Back stages with uniquely-named directories under `tmp_root`,
    /// leaving a symlink under the stage root.
    #[must_use]
    pub fn with_tmp_root(mut self, tmp_root: impl Into<PathBuf>) -> Self {
        self.tmp_root = Some(tmp_root.into());
        self
    }

    #[must_use]
    pub fn with_mirrors(mut self, mirrors: Vec<Mirror>) -> Self {
        self.mirrors = mirrors;
        self
    }

    #[must_use]
    pub fn stage_root(&self) -> &Path {
        &self.stage_root
    }

    #[must_use]
    pub fn tmp_root(&self) -> Option<&Path> {
        self.tmp_root.as_deref()
    }

    #[must_use]
    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }

    /// Path of the named stage entry under the stage root.
    #[must_use]
    pub fn stage_path(&self, name: &str) -> PathBuf {
        self.stage_root.join(name)
    }

    /// Path of the lock file guarding the named stage.
    #[must_use]
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.stage_root.join(format!("{name}.lock"))
    }
}

/// Scan the candidate temp-directory templates in order and adopt the first
/// one that can be created. Returns `None` when no candidate works.
#[must_use]
pub fn find_tmp_root(templates: &[String]) -> Option<PathBuf> {
    for template in templates {
        let expanded = expand_template(template);
        match std::fs::create_dir_all(&expanded) {
            Ok(()) => {
                debug!(tmp_root = %expanded.display(), "adopted temp root");
                return Some(expanded);
            }
            Err(e) => {
                debug!(candidate = %expanded.display(), error = %e, "temp candidate rejected");
            }
        }
    }
    None
}

/// Expand `%u` to the current user name and a leading `~` to the home
/// directory.
fn expand_template(template: &str) -> PathBuf {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let expanded = template.replace("%u", &user);

    if let Some(rest) = expanded.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(expanded)
}

/// Generate a unique name for an unnamed, run-scoped stage.
#[must_use]
pub fn generated_stage_name() -> String {
    format!("{STAGE_PREFIX}{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_user_token() {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let expanded = expand_template("/tmp/%u/smelt-stage");
        assert_eq!(expanded, PathBuf::from(format!("/tmp/{user}/smelt-stage")));
    }

    #[test]
    fn test_find_tmp_root_takes_first_creatable() {
        let sandbox = tempfile::tempdir().unwrap();
        let good = sandbox.path().join("scratch");
        // A file blocks the first candidate from being created as a dir.
        let blocked = sandbox.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let blocked_child = blocked.join("sub");

        let templates = vec![
            blocked_child.display().to_string(),
            good.display().to_string(),
        ];
        assert_eq!(find_tmp_root(&templates), Some(good));
    }

    #[test]
    fn test_find_tmp_root_none_when_all_fail() {
        let sandbox = tempfile::tempdir().unwrap();
        let blocked = sandbox.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();

        let templates = vec![blocked.join("sub").display().to_string()];
        assert_eq!(find_tmp_root(&templates), None);
    }

    #[test]
    fn test_generated_names_are_unique() {
        let a = generated_stage_name();
        let b = generated_stage_name();
        assert!(a.starts_with(STAGE_PREFIX));
        assert_ne!(a, b);
    }
}
