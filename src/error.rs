use thiserror::Error;

use crate::persistence::SinkError;

/// Main error type for the persister
#[derive(Error, Debug)]
pub enum PersisterError {
    // Engine control errors
    #[error("Rejected after stop: message {0} was not queued")]
    RejectedAfterStop(uuid::Uuid),

    #[error("Engine fault: {0}")]
    EngineFault(String),

    // Sink errors
    #[error("Sink write failed: {0}")]
    SinkWrite(#[from] SinkError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PersisterError {
    /// True for the recoverable "engine no longer accepting" outcome of `persist`
    pub fn is_rejection(&self) -> bool {
        matches!(self, PersisterError::RejectedAfterStop(_))
    }
}

/// Result type alias for PersisterError
pub type Result<T> = std::result::Result<T, PersisterError>;
