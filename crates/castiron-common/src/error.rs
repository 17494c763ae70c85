//! Error types shared across Castiron crates

use thiserror::Error;

/// Result type alias for Castiron operations
pub type Result<T> = std::result::Result<T, CastironError>;

/// Errors that are not specific to one pipeline stage
#[derive(Error, Debug)]
pub enum CastironError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker setting is missing or out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// A setting was present but could not be interpreted
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidSetting {
        name: String,
        value: String,
        reason: String,
    },
}

impl CastironError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_setting(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
