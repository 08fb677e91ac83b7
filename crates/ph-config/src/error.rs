//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no configuration file found (searched: {searched})")]
    NotFound { searched: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid identifier '{name}' for {field}")]
    InvalidIdentifier { field: String, name: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
