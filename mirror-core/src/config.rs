//! Rule and option types for mirroring.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// Extension that marks a redirect file.
pub const DEFAULT_REDIRECT_EXTENSION: &str = "strm";

/// How one source tree is mirrored onto one target tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRule {
    /// Root of the tree being mirrored.
    pub source_root: PathBuf,

    /// Root of the mirror.
    pub target_root: PathBuf,

    /// Text replaced in redirect files. Empty means mirror only.
    #[serde(default)]
    pub search: String,

    /// Replacement for the first match of `search`.
    #[serde(default)]
    pub replace: String,

    /// Extension (without dot) of files whose content is rewritten.
    #[serde(default = "default_redirect_extension")]
    pub redirect_extension: String,
}

fn default_redirect_extension() -> String {
    DEFAULT_REDIRECT_EXTENSION.to_string()
}

impl SyncRule {
    /// Create a mirror-only rule.
    pub fn new(source_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
            search: String::new(),
            replace: String::new(),
            redirect_extension: default_redirect_extension(),
        }
    }

    /// Set the search/replace pair applied to redirect files.
    pub fn with_rewrite(mut self, search: impl Into<String>, replace: impl Into<String>) -> Self {
        self.search = search.into();
        self.replace = replace.into();
        self
    }

    /// Set the redirect file extension. A leading dot is ignored.
    pub fn with_redirect_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        self.redirect_extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Whether this rule rewrites anything.
    pub fn is_mirror_only(&self) -> bool {
        self.search.is_empty()
    }

    /// Whether `path` names a redirect file under this rule.
    pub fn is_redirect(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.redirect_extension))
    }

    /// Check that the rule can be applied.
    pub fn validate(&self) -> Result<()> {
        if self.source_root.as_os_str().is_empty() {
            return Err(MirrorError::Validation("source root is empty".to_string()));
        }
        if self.target_root.as_os_str().is_empty() {
            return Err(MirrorError::Validation("target root is empty".to_string()));
        }
        if self.source_root.starts_with(&self.target_root)
            || self.target_root.starts_with(&self.source_root)
        {
            return Err(MirrorError::Validation(format!(
                "source {} and target {} must not overlap",
                self.source_root.display(),
                self.target_root.display()
            )));
        }
        Ok(())
    }
}

/// Timing knobs for watch sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    /// Quiet period before a change is acted on.
    pub debounce: Duration,

    /// Bounded wait when stopping a single session.
    pub stop_timeout: Duration,

    /// Bounded wait per session when stopping all sessions.
    pub stop_all_timeout: Duration,
}

impl WatchOptions {
    /// Set the debounce delay.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the stop timeouts.
    pub fn with_stop_timeouts(mut self, single: Duration, all: Duration) -> Self {
        self.stop_timeout = single;
        self.stop_all_timeout = all;
        self
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(2),
            stop_all_timeout: Duration::from_secs(1),
        }
    }
}
