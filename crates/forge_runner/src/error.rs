//! Error types for the runner module.

use thiserror::Error;

use forge_core::CoreError;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while executing a build.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Docker not available: {0}")]
    DockerNotAvailable(String),

    #[error("Build execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Image pull failed: {0}")]
    ImagePullFailed(String),

    /// The build was aborted before it finished.
    #[error("Build cancelled")]
    Cancelled,

    #[error("Invalid diagnostic pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Project error: {0}")]
    Project(#[from] CoreError),

    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
