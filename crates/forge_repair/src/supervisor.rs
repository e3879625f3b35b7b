//! The generate, build and repair loop.
//!
//! One [`RepairSupervisor`] can drive many jobs at once. Every job owns its
//! stream controller, draft, attempt history and transition log; nothing
//! mutable is shared between jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use forge_core::{
    AssembledProject, DependencyResolver, DependencySet, FailureReason, FileAssembler,
    ForgeConfig, KnowledgeStore, RepairContext, RequestComposer, SearchFilters, StreamEvent,
    DEFAULT_MAX_MATCHES,
};
use forge_llm::{GenerationProvider, GenerationStreamController, DEFAULT_IDLE_TIMEOUT};
use forge_runner::BuildRunner;

use crate::error::{ProtocolViolation, RepairError, RepairResult};
use crate::state::{
    JobFailure, JobProgress, JobReport, JobSpec, JobState, RepairAttempt, StateTransition,
};

/// Default total attempts per job, including the initial one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_attempts: u32,
    pub idle_timeout: Duration,
    pub max_knowledge_matches: usize,
    pub search_timeout: Duration,
    pub filters: SearchFilters,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_knowledge_matches: DEFAULT_MAX_MATCHES,
            search_timeout: Duration::from_secs(2),
            filters: SearchFilters::default(),
        }
    }
}

impl From<&ForgeConfig> for SupervisorConfig {
    fn from(config: &ForgeConfig) -> Self {
        Self {
            max_attempts: config.repair.max_attempts,
            idle_timeout: config.generation.idle_timeout(),
            max_knowledge_matches: config.generation.max_knowledge_matches,
            search_timeout: config.knowledge.search_timeout(),
            filters: config.knowledge.filters(),
        }
    }
}

impl SupervisorConfig {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Drives jobs through compose, generate, assemble, resolve and build,
/// repairing failed builds until the attempt budget is spent.
pub struct RepairSupervisor {
    knowledge: Arc<dyn KnowledgeStore>,
    provider: Arc<dyn GenerationProvider>,
    runner: Arc<BuildRunner>,
    composer: RequestComposer,
    resolver: DependencyResolver,
    config: SupervisorConfig,
}

/// How a generation session ended, as seen by the job.
enum SessionEnd {
    Completed,
    Failed(FailureReason),
}

impl RepairSupervisor {
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn GenerationProvider>,
        runner: Arc<BuildRunner>,
        config: SupervisorConfig,
    ) -> RepairResult<Self> {
        if config.max_attempts == 0 {
            return Err(RepairError::Config("max_attempts must be at least 1".into()));
        }
        if config.idle_timeout.is_zero() {
            return Err(RepairError::Config("idle_timeout must be positive".into()));
        }

        Ok(Self {
            knowledge,
            provider,
            runner,
            composer: RequestComposer::new(config.max_knowledge_matches)
                .with_search_timeout(config.search_timeout),
            resolver: DependencyResolver::new()?,
            config,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run a job to a terminal state.
    ///
    /// Build failures, an exhausted budget and `abort` all end in a report.
    /// Only a broken streaming contract is returned as an error, carrying the
    /// partial report.
    pub async fn run_job(&self, spec: JobSpec, abort: CancellationToken) -> RepairResult<JobReport> {
        let (progress, _) = watch::channel(JobProgress::default());
        self.run_job_observed(spec, abort, progress).await
    }

    /// Like [`run_job`](Self::run_job), publishing a [`JobProgress`] snapshot
    /// on every transition and file.
    pub async fn run_job_observed(
        &self,
        spec: JobSpec,
        abort: CancellationToken,
        progress: watch::Sender<JobProgress>,
    ) -> RepairResult<JobReport> {
        let job_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "job",
            job_id = %job_id,
            attempt = tracing::field::Empty,
            state = tracing::field::Empty
        );
        let job = Job::new(job_id, self.config.max_attempts, progress);
        self.drive(job, &spec, &abort).instrument(span).await
    }

    async fn drive(
        &self,
        mut job: Job,
        spec: &JobSpec,
        abort: &CancellationToken,
    ) -> RepairResult<JobReport> {
        let controller = GenerationStreamController::new(Arc::clone(&self.provider))
            .with_idle_timeout(self.config.idle_timeout);
        let query = spec.knowledge_query();
        let mut repair_context: Option<RepairContext> = None;

        info!(
            "Starting job with provider {} and {} executor",
            controller.provider_name(),
            self.runner.executor_name()
        );
        job.publish("Composing request");

        loop {
            let matches = tokio::select! {
                biased;
                _ = abort.cancelled() => return Ok(job.aborted()),
                matches = self.composer.retrieve(self.knowledge.as_ref(), &query, &self.config.filters) => matches,
            };
            let request = self
                .composer
                .compose(&spec.request, &spec.meta, &matches, repair_context.clone());

            job.attempt += 1;
            job.transition(JobState::Generating, "Generating code");
            let mut attempt = RepairAttempt {
                attempt_number: job.attempt,
                request: request.clone(),
                build_result: None,
                session_failure: None,
            };

            let mut handle = match controller.start(request) {
                Ok(handle) => handle,
                Err(e) => return Err(job.violation(attempt, e)),
            };

            let mut assembler = FileAssembler::new();
            let end = loop {
                let event = tokio::select! {
                    biased;
                    _ = abort.cancelled() => {
                        handle.cancel();
                        job.attempts.push(attempt);
                        return Ok(job.aborted());
                    }
                    event = handle.next_event() => event,
                };
                let Some(event) = event else {
                    break SessionEnd::Failed(FailureReason::Transport);
                };

                if let Err(e) = assembler.apply(&event) {
                    handle.cancel();
                    return Err(job.violation(attempt, e));
                }

                match event {
                    StreamEvent::FileStarted { path } => {
                        job.current_file = Some(path);
                        job.publish("Generating code");
                    }
                    StreamEvent::FileCompleted { path, .. } => {
                        debug!("Completed {}", path);
                        job.files_completed = assembler.completed_files();
                        job.current_file = None;
                        job.publish("Generating code");
                    }
                    StreamEvent::SessionCompleted { .. } => break SessionEnd::Completed,
                    StreamEvent::SessionFailed { reason, message } => {
                        warn!(
                            "Generation failed ({}): {}",
                            reason,
                            message.as_deref().unwrap_or("no details")
                        );
                        break SessionEnd::Failed(reason);
                    }
                    _ => {}
                }
            };
            drop(handle);

            if let SessionEnd::Failed(reason) = end {
                if reason == FailureReason::Cancelled {
                    job.attempts.push(attempt);
                    return Ok(job.aborted());
                }
                attempt.session_failure = Some(reason);

                if assembler.is_empty() {
                    job.attempts.push(attempt);
                    if job.attempt >= job.max_attempts {
                        return Ok(job.exhausted());
                    }
                    // Nothing to build: retry with the same context.
                    job.transition(JobState::Composing, "Retrying generation");
                    continue;
                }
                info!(
                    "Building partial output ({} files completed)",
                    assembler.completed_files()
                );
            }

            job.transition(JobState::Assembling, "Assembling project");
            let snapshot = assembler.snapshot();

            job.transition(JobState::ResolvingDeps, "Resolving dependencies");
            job.dependencies = self.resolver.resolve(&snapshot);
            info!("Resolved {} dependencies", job.dependencies.len());

            job.transition(JobState::Building, "Building project");
            let Some(result) = self.runner.run_with_abort(&snapshot, abort).await else {
                job.project = Some(snapshot);
                job.attempts.push(attempt);
                return Ok(job.aborted());
            };

            let success = result.success();
            let diagnostics = result.diagnostics.clone();
            attempt.build_result = Some(result);
            job.attempts.push(attempt);

            if success {
                job.project = Some(snapshot);
                job.transition(JobState::Succeeded, "Build succeeded");
                return Ok(job.finish(None));
            }

            if job.attempt >= job.max_attempts {
                job.project = Some(snapshot);
                return Ok(job.exhausted());
            }

            job.transition(JobState::Repairing, "Repairing build errors");
            repair_context = Some(RepairContext {
                prior_files: snapshot.files.clone(),
                diagnostics,
            });
            job.project = Some(snapshot);
        }
    }
}

/// Job-local bookkeeping. Never shared.
struct Job {
    id: String,
    state: JobState,
    attempt: u32,
    max_attempts: u32,
    current_file: Option<String>,
    files_completed: usize,
    project: Option<AssembledProject>,
    dependencies: DependencySet,
    attempts: Vec<RepairAttempt>,
    transitions: Vec<StateTransition>,
    progress: watch::Sender<JobProgress>,
}

impl Job {
    fn new(id: String, max_attempts: u32, progress: watch::Sender<JobProgress>) -> Self {
        Self {
            id,
            state: JobState::Composing,
            attempt: 0,
            max_attempts,
            current_file: None,
            files_completed: 0,
            project: None,
            dependencies: DependencySet::new(),
            attempts: Vec::new(),
            transitions: Vec::new(),
            progress,
        }
    }

    fn transition(&mut self, to: JobState, message: &str) {
        let from = self.state;
        self.transitions.push(StateTransition {
            from,
            to,
            attempt: self.attempt,
            at: Utc::now(),
        });
        self.state = to;
        if to == JobState::Generating {
            self.current_file = None;
            self.files_completed = 0;
        }

        let span = Span::current();
        span.record("attempt", self.attempt);
        span.record("state", to.as_str());
        info!("{} -> {} (attempt {}/{})", from, to, self.attempt, self.max_attempts);
        self.publish(message);
    }

    fn publish(&self, message: &str) {
        self.progress.send_replace(JobProgress {
            job_id: self.id.clone(),
            state: self.state,
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            message: message.to_string(),
            current_file: self.current_file.clone(),
            files_completed: self.files_completed,
        });
    }

    fn exhausted(mut self) -> JobReport {
        warn!("Giving up after {} attempts", self.attempt);
        self.transition(JobState::Exhausted, "Retry budget exhausted");
        self.finish(Some(JobFailure::RetryBudgetExhausted))
    }

    fn aborted(mut self) -> JobReport {
        warn!("Job aborted in state {}", self.state);
        self.transition(JobState::Exhausted, "Cancelled");
        self.finish(Some(JobFailure::Cancelled))
    }

    fn violation(
        mut self,
        attempt: RepairAttempt,
        source: impl Into<ProtocolViolation>,
    ) -> RepairError {
        let source = source.into();
        error!("Protocol violation in attempt {}: {}", self.attempt, source);
        self.attempts.push(attempt);
        self.transition(JobState::Exhausted, "Protocol violation");
        let number = self.attempt;
        RepairError::protocol(number, source, self.finish(Some(JobFailure::ProtocolViolation)))
    }

    fn finish(self, failure: Option<JobFailure>) -> JobReport {
        info!(
            final_state = %self.state,
            attempts = self.attempts.len(),
            "Job finished"
        );
        JobReport {
            job_id: self.id,
            final_state: self.state,
            project: self.project,
            dependencies: self.dependencies,
            attempts: self.attempts,
            transitions: self.transitions,
            failure,
        }
    }
}
