//! Configuration error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn parse_error(message: impl Into<String>, _source: &str, key: &str) -> Self {
        Self::ParseError(format!("{key}: {}", message.into()))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
