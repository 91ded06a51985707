//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the autoscaler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value}")]
    Duration { field: &'static str, value: String },

    #[error("{0} is not specified")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("database type isn't supported: {0}")]
    UnsupportedDatabase(String),

    #[error("failed to prepare database directory {path}: {source}")]
    DatabaseDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
