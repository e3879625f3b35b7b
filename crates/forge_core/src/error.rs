//! Error types for the core module.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A chunk arrived for a path that was never opened with `FileStarted`.
    #[error("Protocol violation: chunk for unknown file {0}")]
    UnknownFile(String),

    /// A chunk or re-open arrived for a path that was already completed.
    #[error("Protocol violation: file already completed: {0}")]
    FileAlreadyCompleted(String),

    /// An event arrived after the session reached a terminal event.
    #[error("Protocol violation: event after session end: {0}")]
    SessionClosed(String),

    #[error("Knowledge store unavailable: {0}")]
    KnowledgeUnavailable(String),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Whether this error is a streaming protocol violation.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownFile(_) | Self::FileAlreadyCompleted(_) | Self::SessionClosed(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
