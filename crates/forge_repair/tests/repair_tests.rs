//! Integration tests for the repair loop with scripted generation and mock builds.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use forge_core::{FailureReason, InMemoryKnowledgeStore, ProjectMeta, StreamEvent, UserRequest};
use forge_llm::{ScriptStep, ScriptedProvider};
use forge_repair::{
    JobFailure, JobSpec, JobState, RepairError, RepairSupervisor, SupervisorConfig,
};
use forge_runner::{BuildRunner, MockExecutor, MockResponse};

fn spec() -> JobSpec {
    JobSpec::new(
        UserRequest::new("dashboard with charts"),
        ProjectMeta::new("metrics").frontend("react"),
    )
}

fn supervisor(
    provider: Arc<ScriptedProvider>,
    executor: &MockExecutor,
    config: SupervisorConfig,
) -> RepairSupervisor {
    let runner = BuildRunner::new(Arc::new(executor.clone()), Duration::from_secs(120)).unwrap();
    RepairSupervisor::new(
        Arc::new(InMemoryKnowledgeStore::new()),
        provider,
        Arc::new(runner),
        config,
    )
    .unwrap()
}

fn app_session() -> Vec<ScriptStep> {
    let mut steps = ScriptStep::file("src/App.jsx", "export default function App() {}\n");
    steps.extend(ScriptStep::file("package.json", "{\"dependencies\":{\"react\":\"^18\"}}\n"));
    steps.push(ScriptStep::completed(&["src/App.jsx", "package.json"]));
    steps
}

fn failing_build() -> MockResponse {
    MockResponse::failure(1, "src/App.jsx:1:10 error: Unexpected token")
}

fn states(report: &forge_repair::JobReport) -> Vec<JobState> {
    report.transitions.iter().map(|t| t.to).collect()
}

/// Two failed builds with a budget of two end the job with both attempts recorded.
#[tokio::test]
async fn test_budget_of_two_exhausts_after_two_failed_builds() {
    let provider = Arc::new(ScriptedProvider::new(app_session()));
    let executor = MockExecutor::new().add_response(failing_build());
    let supervisor = supervisor(provider, &executor, SupervisorConfig::default().max_attempts(2));

    let report = supervisor.run_job(spec(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.final_state, JobState::Exhausted);
    assert_eq!(report.failure, Some(JobFailure::RetryBudgetExhausted));
    assert_eq!(report.attempts.len(), 2);
    for (index, attempt) in report.attempts.iter().enumerate() {
        assert_eq!(attempt.attempt_number, index as u32 + 1);
        let build = attempt.build_result.as_ref().unwrap();
        assert!(!build.success());
        assert!(build.errors().any(|d| d.message.contains("Unexpected token")));
    }
    assert!(report.project.is_some());
    assert!(report.dependencies.contains("react"));
}

/// A job that never succeeds generates exactly `max_attempts` times.
#[tokio::test]
async fn test_generation_count_matches_budget() {
    for max_attempts in 1..=4 {
        let provider = Arc::new(ScriptedProvider::new(app_session()));
        let executor = MockExecutor::new().add_response(failing_build());
        let supervisor = supervisor(
            provider.clone(),
            &executor,
            SupervisorConfig::default().max_attempts(max_attempts),
        );

        let report = supervisor.run_job(spec(), CancellationToken::new()).await.unwrap();

        assert_eq!(report.generation_count(), max_attempts as usize);
        assert_eq!(provider.session_count(), max_attempts as usize);
        assert_eq!(executor.build_count(), max_attempts as usize);
        assert_eq!(states(&report).last(), Some(&JobState::Exhausted));
    }
}

/// Idle timeout with two completed files still assembles, resolves and builds.
#[tokio::test(start_paused = true)]
async fn test_idle_timeout_builds_partial_snapshot() {
    let mut steps = ScriptStep::file("src/a.js", "import lodash from 'lodash';\n");
    steps.extend(ScriptStep::file("src/b.js", "export const b = 2;\n"));
    steps.push(ScriptStep::Event(StreamEvent::file_started("src/c.js")));
    steps.push(ScriptStep::Hang);
    let provider = Arc::new(ScriptedProvider::new(steps));
    let executor = MockExecutor::new().add_response(failing_build());
    let config = SupervisorConfig::default()
        .max_attempts(1)
        .idle_timeout(Duration::from_secs(30));
    let supervisor = supervisor(provider, &executor, config);

    let report = supervisor.run_job(spec(), CancellationToken::new()).await.unwrap();

    assert_eq!(
        states(&report),
        vec![
            JobState::Generating,
            JobState::Assembling,
            JobState::ResolvingDeps,
            JobState::Building,
            JobState::Exhausted,
        ]
    );
    assert_eq!(report.attempts[0].session_failure, Some(FailureReason::Timeout));
    assert!(report.attempts[0].build_result.is_some());

    let built = &executor.builds()[0];
    assert!(!built.is_buildable());
    assert_eq!(built.content("src/a.js"), Some("import lodash from 'lodash';\n"));
    assert_eq!(built.content("src/b.js"), Some("export const b = 2;\n"));
    assert!(report.dependencies.contains("lodash"));
}

/// A session failing before any file retries with the same context and no build.
#[tokio::test]
async fn test_session_failure_without_files_retries_generation() {
    let provider = Arc::new(ScriptedProvider::sessions(vec![
        vec![ScriptStep::Fail("connection reset".into())],
        app_session(),
    ]));
    let executor = MockExecutor::new();
    let supervisor = supervisor(provider.clone(), &executor, SupervisorConfig::default());

    let report = supervisor.run_job(spec(), CancellationToken::new()).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.attempts[0].session_failure, Some(FailureReason::Transport));
    assert!(report.attempts[0].build_result.is_none());
    assert_eq!(executor.build_count(), 1);
    assert!(report
        .transitions
        .iter()
        .any(|t| t.from == JobState::Generating && t.to == JobState::Composing));

    let requests = provider.requests();
    assert!(!requests[1].is_repair());
    assert_eq!(requests[0].prompt, requests[1].prompt);
}

/// Repeated transport failures spend the budget without building.
#[tokio::test]
async fn test_repeated_session_failures_exhaust_budget() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::Fail("503".into())]));
    let executor = MockExecutor::new();
    let supervisor = supervisor(provider, &executor, SupervisorConfig::default().max_attempts(2));

    let report = supervisor.run_job(spec(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.final_state, JobState::Exhausted);
    assert_eq!(report.failure, Some(JobFailure::RetryBudgetExhausted));
    assert_eq!(report.generation_count(), 2);
    assert_eq!(executor.build_count(), 0);
    assert!(report.project.is_none());
}

/// Every repair request carries the previous build's diagnostics.
#[tokio::test]
async fn test_repair_prompt_embeds_previous_diagnostics() {
    let provider = Arc::new(ScriptedProvider::new(app_session()));
    let executor = MockExecutor::new()
        .with_responses(vec![failing_build(), MockResponse::success("compiled")]);
    let supervisor = supervisor(provider.clone(), &executor, SupervisorConfig::default());

    let report = supervisor.run_job(spec(), CancellationToken::new()).await.unwrap();

    assert!(report.succeeded());
    let repair = &provider.requests()[1];
    assert!(repair.is_repair());
    assert!(repair.prompt.contains("Unexpected token"));
    assert!(repair.prompt.contains("### FILE: src/App.jsx"));
    assert_eq!(report.last_build().map(|b| b.success()), Some(true));
}

/// Aborting while the stream is open ends the job without building.
#[tokio::test(start_paused = true)]
async fn test_abort_during_generation() {
    let mut steps = vec![ScriptStep::Event(StreamEvent::file_started("src/App.jsx"))];
    steps.push(ScriptStep::Hang);
    let provider = Arc::new(ScriptedProvider::new(steps));
    let executor = MockExecutor::new();
    let supervisor = supervisor(provider, &executor, SupervisorConfig::default());

    let abort = CancellationToken::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = supervisor.run_job(spec(), abort).await.unwrap();

    assert_eq!(report.final_state, JobState::Exhausted);
    assert_eq!(report.failure, Some(JobFailure::Cancelled));
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(executor.build_count(), 0);
}

/// Aborting during the build stops the executor.
#[tokio::test(start_paused = true)]
async fn test_abort_during_build() {
    let provider = Arc::new(ScriptedProvider::new(app_session()));
    let executor = MockExecutor::new()
        .add_response(MockResponse::success("slow").with_delay(Duration::from_secs(90)));
    let supervisor = supervisor(provider, &executor, SupervisorConfig::default());

    let abort = CancellationToken::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let report = supervisor.run_job(spec(), abort).await.unwrap();

    assert_eq!(report.failure, Some(JobFailure::Cancelled));
    assert_eq!(executor.cancelled_count(), 1);
    let last = report.transitions.last().unwrap();
    assert_eq!((last.from, last.to), (JobState::Building, JobState::Exhausted));
    assert!(report.project.is_some());
}

/// An already aborted job never generates.
#[tokio::test]
async fn test_abort_before_start() {
    let provider = Arc::new(ScriptedProvider::new(app_session()));
    let executor = MockExecutor::new();
    let supervisor = supervisor(provider.clone(), &executor, SupervisorConfig::default());
    let abort = CancellationToken::new();
    abort.cancel();

    let report = supervisor.run_job(spec(), abort).await.unwrap();

    assert_eq!(report.failure, Some(JobFailure::Cancelled));
    assert_eq!(report.generation_count(), 0);
    assert_eq!(provider.session_count(), 0);
}

/// A chunk for a file that was never started fails the job, keeping the
/// history of earlier attempts.
#[tokio::test]
async fn test_chunk_for_unopened_file_is_protocol_violation() {
    let provider = Arc::new(ScriptedProvider::sessions(vec![
        app_session(),
        vec![
            ScriptStep::Event(StreamEvent::chunk("src/ghost.js", "boo")),
            ScriptStep::completed(&[]),
        ],
    ]));
    let executor = MockExecutor::new().add_response(failing_build());
    let supervisor = supervisor(provider, &executor, SupervisorConfig::default());

    let err = supervisor
        .run_job(spec(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_protocol_violation());
    assert!(matches!(err, RepairError::Protocol { attempt: 2, .. }));
    assert_eq!(executor.build_count(), 1);

    let report = err.report().unwrap();
    assert_eq!(report.final_state, JobState::Exhausted);
    assert_eq!(report.failure, Some(JobFailure::ProtocolViolation));
    assert_eq!(report.generation_count(), 2);
    assert_eq!(report.attempts.len(), 2);

    let first = report.attempts[0].build_result.as_ref().unwrap();
    assert!(!first.success());
    assert!(first.errors().any(|d| d.message.contains("Unexpected token")));
    assert_eq!(report.attempts[1].attempt_number, 2);
    assert!(report.attempts[1].build_result.is_none());
    assert_eq!(states(report).last(), Some(&JobState::Exhausted));
}

/// Jobs on one supervisor run side by side without sharing state.
#[tokio::test]
async fn test_concurrent_jobs_are_independent() {
    let provider = Arc::new(ScriptedProvider::new(app_session()));
    let executor = MockExecutor::new();
    let supervisor = Arc::new(supervisor(provider.clone(), &executor, SupervisorConfig::default()));

    let other_spec = JobSpec::new(UserRequest::new("settings page"), ProjectMeta::new("settings"));
    let (first, second) = tokio::join!(
        supervisor.run_job(spec(), CancellationToken::new()),
        supervisor.run_job(other_spec, CancellationToken::new()),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.succeeded());
    assert!(second.succeeded());
    assert_ne!(first.job_id, second.job_id);
    assert_eq!(provider.session_count(), 2);
    assert_eq!(executor.build_count(), 2);
}
