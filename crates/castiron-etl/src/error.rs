//! Error types for the ETL worker
//!
//! Every variant is scoped to the handling of a single event. The consume
//! loop logs it and moves on to the next notification.

use thiserror::Error;

/// Result type alias for ETL operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    /// The processor config document is malformed or incomplete
    #[error("Invalid processor config: {0}")]
    ConfigParse(String),

    /// Two configs resolve to the same inbox directory
    #[error("Config {config} claims inbox {inbox}, which is already owned by {owner}")]
    InboxConflict {
        config: String,
        inbox: String,
        owner: String,
    },

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    /// The transformation process could not be started at all
    #[error("Failed to launch command: {0}")]
    CommandLaunch(#[source] std::io::Error),

    /// Any object store call; carries the storage layer's context chain
    #[error("Object store operation failed: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Malformed notification: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] castiron_common::CastironError),
}

impl EtlError {
    pub fn config_parse(msg: impl std::fmt::Display) -> Self {
        Self::ConfigParse(msg.to_string())
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }
}
