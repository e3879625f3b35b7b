//! Mock build executor for testing.
//!
//! Returns predefined responses in order and captures every project it is
//! asked to build, so tests can drive the build loop without running a
//! real toolchain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use forge_core::AssembledProject;

use crate::error::{RunnerError, RunnerResult};
use crate::executor::{BuildExecutor, ExecutionOutput};

/// Predefined response for one build.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub delay: Duration,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Simulated build duration.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Mock executor. Cloning shares the captured state.
#[derive(Clone, Default)]
pub struct MockExecutor {
    responses: Arc<RwLock<Vec<MockResponse>>>,
    response_index: Arc<AtomicUsize>,
    captured: Arc<RwLock<Vec<AssembledProject>>>,
    cancelled: Arc<AtomicUsize>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response for the next build.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// Fail every build with an execution error.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// Projects received so far.
    pub fn builds(&self) -> Vec<AssembledProject> {
        self.captured.read().clone()
    }

    pub fn build_count(&self) -> usize {
        self.captured.read().len()
    }

    /// Builds stopped by cancellation.
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Responses are used in order; the last one repeats.
    fn next_response(&self) -> MockResponse {
        let responses = self.responses.read();
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index)
            .or_else(|| responses.last())
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl BuildExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(
        &self,
        project: &AssembledProject,
        cancel: CancellationToken,
    ) -> RunnerResult<ExecutionOutput> {
        self.captured.write().push(project.clone());
        if let Some(message) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(message));
        }

        let response = self.next_response();
        if !response.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    return Err(RunnerError::Cancelled);
                }
                _ = tokio::time::sleep(response.delay) => {}
            }
        }

        Ok(ExecutionOutput {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            duration_ms: response.delay.as_millis() as u64,
        })
    }
}
