//! Build executor contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use forge_core::AssembledProject;

use crate::error::RunnerResult;

/// Raw output of one build process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecutionOutput {
    pub fn new(exit_code: i64, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration_ms: 0,
        }
    }
}

/// Runs the external build for a project tree.
///
/// Implementations must stop the external process and return
/// [`RunnerError::Cancelled`](crate::RunnerError::Cancelled) once `cancel`
/// fires, and must not leave the process running if the returned future is
/// dropped.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        project: &AssembledProject,
        cancel: CancellationToken,
    ) -> RunnerResult<ExecutionOutput>;
}
