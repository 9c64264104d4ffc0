//! Configuration for the mirror service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use strm_mirror_core::{DEFAULT_REDIRECT_EXTENSION, WatchOptions};

use crate::error::{Result, ServiceError};

/// Configuration for the mirror service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Path to the YAML records file.
    pub records_path: PathBuf,

    /// Quiet period before a watched change is applied (in milliseconds).
    pub debounce_ms: u64,

    /// Bounded wait when stopping one watch (in milliseconds).
    pub stop_timeout_ms: u64,

    /// Bounded wait per watch when stopping all (in milliseconds).
    pub stop_all_timeout_ms: u64,

    /// Extension of redirect files whose content is rewritten.
    pub redirect_extension: String,
}

impl ServiceConfig {
    /// Create a configuration reading records from `records_path`.
    pub fn new(records_path: impl Into<PathBuf>) -> Self {
        Self {
            records_path: records_path.into(),
            ..Self::default()
        }
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("strm-mirror/config.toml")
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults if it is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Set the debounce delay.
    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.records_path.as_os_str().is_empty() {
            return Err(ServiceError::Validation("records_path is empty".to_string()));
        }
        if self.redirect_extension.trim_start_matches('.').is_empty() {
            return Err(ServiceError::Validation(
                "redirect_extension is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Watch timing derived from this configuration.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions::default()
            .with_debounce(Duration::from_millis(self.debounce_ms))
            .with_stop_timeouts(
                Duration::from_millis(self.stop_timeout_ms),
                Duration::from_millis(self.stop_all_timeout_ms),
            )
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            records_path: PathBuf::from("config.yaml"),
            debounce_ms: 500,
            stop_timeout_ms: 2000,
            stop_all_timeout_ms: 1000,
            redirect_extension: DEFAULT_REDIRECT_EXTENSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "records_path = \"/etc/strm/records.yaml\"\ndebounce_ms = 250\n")
            .unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.records_path, Path::new("/etc/strm/records.yaml"));
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.stop_timeout_ms, 2000);
        assert_eq!(config.redirect_extension, "strm");
        assert_eq!(config.watch_options().debounce, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServiceConfig::load_or_default(&temp_dir.path().join("none.toml")).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert!(ServiceConfig::load(&temp_dir.path().join("none.toml")).is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "redirect_extension = \".\"\n").unwrap();
        assert!(matches!(
            ServiceConfig::load(&path).unwrap_err(),
            ServiceError::Validation(_)
        ));

        std::fs::write(&path, "debounce_ms = \"soon\"\n").unwrap();
        assert!(matches!(
            ServiceConfig::load(&path).unwrap_err(),
            ServiceError::Toml(_)
        ));
    }
}
