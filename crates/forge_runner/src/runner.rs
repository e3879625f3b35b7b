//! Build runner: executes a build and turns its output into a [`BuildResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forge_core::{AssembledProject, BuildConfig, BuildOutcome, BuildResult, Diagnostic, ExecutorKind, Severity};

use crate::classify::DiagnosticClassifier;
use crate::docker::ContainerExecutor;
use crate::error::{RunnerError, RunnerResult};
use crate::executor::{BuildExecutor, ExecutionOutput};
use crate::process::ProcessExecutor;

/// Runs builds under a hard wall-clock timeout.
pub struct BuildRunner {
    executor: Arc<dyn BuildExecutor>,
    classifier: DiagnosticClassifier,
    timeout: Duration,
}

impl BuildRunner {
    pub fn new(executor: Arc<dyn BuildExecutor>, timeout: Duration) -> RunnerResult<Self> {
        Ok(Self {
            executor,
            classifier: DiagnosticClassifier::new()?,
            timeout,
        })
    }

    /// Create a runner with the executor selected by the configuration.
    pub async fn from_config(config: &BuildConfig) -> RunnerResult<Self> {
        let executor: Arc<dyn BuildExecutor> = match config.executor {
            ExecutorKind::Process => Arc::new(ProcessExecutor::new(config.command.clone())),
            ExecutorKind::Container => Arc::new(
                ContainerExecutor::new(config.image.clone(), config.tag.clone(), config.command.clone())
                    .await?,
            ),
        };
        Self::new(executor, config.timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Build a project. Never pending past the timeout.
    pub async fn run(&self, project: &AssembledProject) -> BuildResult {
        let abort = CancellationToken::new();
        match self.run_with_abort(project, &abort).await {
            Some(result) => result,
            None => failed("build cancelled", 0),
        }
    }

    /// Build a project, returning `None` if `abort` fires first. Aborting
    /// terminates the external build.
    pub async fn run_with_abort(
        &self,
        project: &AssembledProject,
        abort: &CancellationToken,
    ) -> Option<BuildResult> {
        let token = abort.child_token();
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.timeout, self.executor.execute(project, token.clone())).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(_) => {
                token.cancel();
                warn!("Build timed out after {:?}", self.timeout);
                BuildResult::timed_out(elapsed_ms)
            }
            Ok(Err(RunnerError::Cancelled)) => return None,
            Ok(Err(_)) if abort.is_cancelled() => return None,
            Ok(Err(e)) => {
                warn!("Build could not run: {}", e);
                failed(&format!("build could not run: {}", e), elapsed_ms)
            }
            Ok(Ok(output)) => self.evaluate(&output, elapsed_ms),
        };

        info!(
            outcome = ?result.outcome,
            errors = result.errors().count(),
            warnings = result.warnings().count(),
            duration_ms = result.duration_ms,
            "Build finished"
        );
        Some(result)
    }

    /// Success requires a zero exit status and no error line.
    pub fn evaluate(&self, output: &ExecutionOutput, elapsed_ms: u64) -> BuildResult {
        let diagnostics = self.classifier.classify(output);
        let has_error = diagnostics.iter().any(|d| d.severity == Severity::Error);
        let outcome = if output.exit_code == 0 && !has_error {
            BuildOutcome::Success
        } else {
            BuildOutcome::Failure
        };

        let mut diagnostics = diagnostics;
        if outcome == BuildOutcome::Failure && !has_error {
            diagnostics.push(Diagnostic::error(format!(
                "build exited with status {}",
                output.exit_code
            )));
        }

        BuildResult {
            outcome,
            diagnostics,
            exit_code: Some(output.exit_code),
            timed_out: false,
            duration_ms: if output.duration_ms > 0 {
                output.duration_ms
            } else {
                elapsed_ms
            },
        }
    }
}

fn failed(message: &str, duration_ms: u64) -> BuildResult {
    BuildResult {
        outcome: BuildOutcome::Failure,
        diagnostics: vec![Diagnostic::error(message)],
        exit_code: None,
        timed_out: false,
        duration_ms,
    }
}
