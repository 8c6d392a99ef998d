//! Error handling for the lumen core layer.
//!
//! The main error type for this crate is [`CoreError`], which encapsulates
//! the more specific [`ConfigError`]. Both are defined with `thiserror` so
//! callers get `Display` and `source()` for free.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for the lumen infrastructure layer.
///
/// Represents all failures the core layer itself can produce. Higher layers
/// wrap this in their own error enums rather than matching on it.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Errors related to configuration loading, parsing, or validation.
    /// Wraps a [`ConfigError`].
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// Errors that occur during the initialization of the logging system.
    /// Contains a descriptive message of the failure.
    #[error("Logging Initialization Failed: {0}")]
    LoggingInitialization(String),

    /// General I/O errors not covered by other specific variants.
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors due to invalid input provided to a function or method.
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// Catch-all for unexpected internal errors within the core library.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Error type for configuration-related operations.
///
/// Typically wrapped by [`CoreError::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An error occurred while attempting to read a configuration file.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error occurred while parsing a configuration file (invalid TOML).
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A configuration value failed validation after successful parsing.
    #[error("Configuration validation failed for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn core_error_config_variant_carries_source() {
        let config_err = ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            reason: "unknown level".to_string(),
        };
        let core_err = CoreError::Config(config_err);

        assert_eq!(
            format!("{}", core_err),
            "Configuration Error: Configuration validation failed for 'logging.level': unknown level"
        );
        assert!(core_err.source().is_some());
    }

    #[test]
    fn core_error_logging_initialization_variant() {
        let core_err = CoreError::LoggingInitialization("subscriber already set".to_string());
        assert_eq!(
            format!("{}", core_err),
            "Logging Initialization Failed: subscriber already set"
        );
        assert!(core_err.source().is_none());
    }

    #[test]
    fn core_error_io_variant_preserves_kind() {
        let core_err = CoreError::Io(IoError::new(ErrorKind::NotFound, "missing"));
        assert!(core_err.source().is_some());
        assert_eq!(
            core_err
                .source()
                .unwrap()
                .downcast_ref::<IoError>()
                .unwrap()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn config_error_read_error_variant() {
        let path = PathBuf::from("/etc/lumen/config.toml");
        let config_err = ConfigError::ReadError {
            path: path.clone(),
            source: IoError::new(ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            format!("{}", config_err),
            format!("Failed to read configuration file from {:?}", path)
        );
        assert!(config_err.source().is_some());
    }

    #[test]
    fn config_error_parse_error_variant() {
        let toml_err: toml::de::Error = toml::from_str::<toml::Value>("not = = toml").unwrap_err();
        let config_err = ConfigError::ParseError(toml_err);
        assert!(config_err.source().is_some());
        assert!(config_err.source().unwrap().is::<toml::de::Error>());
    }
}
