//! Configuration management for the lumen core layer.
//!
//! Configuration is a single TOML document deserialized into [`CoreConfig`].
//! Every field has a default, so a missing file or a partial file both yield
//! a usable configuration. [`ConfigLoader`] owns the read/parse/validate
//! pipeline; validation failures surface as
//! [`ConfigError::InvalidValue`](crate::error::ConfigError::InvalidValue).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/dri/card0")
}

fn default_allow_modifiers() -> bool {
    true
}

/// Configuration for the logging subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter: one of `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path. When absent, only console output is produced.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Output format: `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file_path: None,
            format: default_log_format(),
        }
    }
}

/// Configuration for the display backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Path of the DRM render/primary node to open.
    #[serde(default = "default_device_path")]
    pub device_path: PathBuf,
    /// Whether modifier-aware framebuffer registration may be used when the
    /// device advertises support for it.
    #[serde(default = "default_allow_modifiers")]
    pub allow_modifiers: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            device_path: default_device_path(),
            allow_modifiers: default_allow_modifiers(),
        }
    }
}

/// Root configuration structure for the lumen core layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Loads and validates [`CoreConfig`] from TOML.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the given path.
    ///
    /// A missing file is not an error: defaults are returned. Read failures
    /// other than `NotFound`, parse failures and validation failures are.
    pub fn load_from_path(path: &Path) -> Result<CoreConfig, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(CoreConfig::default());
            }
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: CoreConfig = toml::from_str(&content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parses configuration from an in-memory TOML string.
    pub fn load_from_str(content: &str) -> Result<CoreConfig, ConfigError> {
        let config: CoreConfig = toml::from_str(content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &CoreConfig) -> Result<(), ConfigError> {
        match config.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.level".to_string(),
                    reason: format!("unknown log level '{}'", other),
                })
            }
        }
        match config.logging.format.to_lowercase().as_str() {
            "text" | "json" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.format".to_string(),
                    reason: format!("unknown log format '{}'", other),
                })
            }
        }
        if config.backend.device_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "backend.device_path".to_string(),
                reason: "device path must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.backend.device_path, PathBuf::from("/dev/dri/card0"));
        assert!(config.backend.allow_modifiers);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = ConfigLoader::load_from_str(
            r#"
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "text");
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn full_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [logging]
            level = "trace"
            format = "json"
            file_path = "/var/log/lumen/core.log"

            [backend]
            device_path = "/dev/dri/card1"
            allow_modifiers = false
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.logging.file_path,
            Some(PathBuf::from("/var/log/lumen/core.log"))
        );
        assert_eq!(config.backend.device_path, PathBuf::from("/dev/dri/card1"));
        assert!(!config.backend.allow_modifiers);
    }

    #[test]
    fn invalid_level_is_rejected() {
        let err = ConfigLoader::load_from_str(
            r#"
            [logging]
            level = "supertrace"
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::InvalidValue { field, reason } => {
                assert_eq!(field, "logging.level");
                assert!(reason.contains("supertrace"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = ConfigLoader::load_from_str("logging = = nope").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
