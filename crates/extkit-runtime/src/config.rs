//! Runtime configuration loaded from RON.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```ron
//! (
//!     engine: (max_operations: 500000),
//!     oauth: (poll_interval_ms: 1000, poll_max_attempts: 120),
//!     icons: (size: 32),
//! )
//! ```

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Limits applied to every sandboxed script engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineLimits {
    /// Maximum operations per evaluation before the script is aborted.
    pub max_operations: u64,
    /// Maximum function call nesting.
    pub max_call_levels: usize,
    /// Maximum expression nesting at global level.
    pub max_expr_depth: usize,
    /// Maximum expression nesting inside functions.
    pub max_fn_expr_depth: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 200_000,
            max_call_levels: 64,
            max_expr_depth: 128,
            max_fn_expr_depth: 64,
        }
    }
}

/// Bounds for the sign-in token poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OAuthConfig {
    /// Delay between token store checks.
    pub poll_interval_ms: u64,
    /// Number of checks before giving up.
    pub poll_max_attempts: u32,
    /// Wall-clock ceiling for one flow.
    pub poll_timeout_ms: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            poll_max_attempts: 120,
            poll_timeout_ms: 150_000,
        }
    }
}

impl OAuthConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Flow timeout as a `Duration`.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Icon resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IconConfig {
    /// Pixel size requested from the icon extractor.
    pub size: u32,
    /// Number of extracted file icons kept in memory.
    pub cache_capacity: usize,
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            size: 16,
            cache_capacity: 256,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Script engine limits.
    pub engine: EngineLimits,
    /// Sign-in polling bounds.
    pub oauth: OAuthConfig,
    /// Icon resolution.
    pub icons: IconConfig,
}

impl RuntimeConfig {
    /// Parse a configuration from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        ron::from_str(text).map_err(|e| ConfigError::Parse {
            path: None,
            message: e.to_string(),
        })
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ron_str(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let cfg = RuntimeConfig::from_ron_str("()").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg =
            RuntimeConfig::from_ron_str("(oauth: (poll_interval_ms: 50), icons: (size: 32))")
                .unwrap();
        assert_eq!(cfg.oauth.poll_interval(), Duration::from_millis(50));
        assert_eq!(cfg.oauth.poll_max_attempts, 120);
        assert_eq!(cfg.icons.size, 32);
        assert_eq!(cfg.icons.cache_capacity, 256);
        assert_eq!(cfg.engine, EngineLimits::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = RuntimeConfig::from_ron_str("(oauth: (interval: 5))").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: None, .. }));
    }

    #[test]
    fn missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RuntimeConfig::load_or_default(&dir.path().join("runtime.ron")).unwrap();
        assert_eq!(cfg, RuntimeConfig::default());

        let path = dir.path().join("bad.ron");
        fs::write(&path, "(engine: (max_operations: \"lots\"))").unwrap();
        match RuntimeConfig::load(&path) {
            Err(ConfigError::Parse { path: Some(p), .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
