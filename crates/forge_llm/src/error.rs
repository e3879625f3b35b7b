//! Error types for generation sessions.

use thiserror::Error;

/// Result type alias for generation operations.
pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    /// A session is already active for this controller.
    #[error("Protocol violation: a generation session is already active")]
    ConcurrentSession,

    #[error("Provider not configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY")]
    NotConfigured,

    /// Connection failure or dropped stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success response from the provider API.
    #[error("Provider error {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Malformed provider payload: {0}")]
    Payload(String),
}

impl LlmError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ConcurrentSession)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}
