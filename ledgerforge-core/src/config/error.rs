//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    FileReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing configuration value: {0}")]
    MissingValue(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Malformed node location '{entry}': {reason}")]
    MalformedNodeLocation { entry: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}
