//! Job state, transitions and reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forge_core::{
    AssembledProject, BuildResult, DependencySet, FailureReason, GenerationRequest, ProjectMeta,
    UserRequest,
};

/// State of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Building the next generation request
    #[default]
    Composing,
    /// A generation session is streaming
    Generating,
    /// Freezing the streamed files into a project
    Assembling,
    /// Inferring external dependencies
    ResolvingDeps,
    /// The external build is running
    Building,
    /// Composing a repair request from build diagnostics
    Repairing,
    /// The project built cleanly
    Succeeded,
    /// Attempts ran out or the job was aborted
    Exhausted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Composing => "composing",
            Self::Generating => "generating",
            Self::Assembling => "assembling",
            Self::ResolvingDeps => "resolving_deps",
            Self::Building => "building",
            Self::Repairing => "repairing",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobState,
    pub to: JobState,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Why a job ended in `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFailure {
    RetryBudgetExhausted,
    Cancelled,
    ProtocolViolation,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryBudgetExhausted => write!(f, "retry budget exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ProtocolViolation => write!(f, "protocol violation"),
        }
    }
}

/// Input of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub request: UserRequest,
    pub meta: ProjectMeta,
}

impl JobSpec {
    pub fn new(request: UserRequest, meta: ProjectMeta) -> Self {
        Self { request, meta }
    }

    /// Text used to search the knowledge store.
    pub fn knowledge_query(&self) -> String {
        match &self.request.component_hint {
            Some(hint) => format!("{} {}", self.request.target_spec, hint),
            None => self.request.target_spec.clone(),
        }
    }
}

/// One generation cycle of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub attempt_number: u32,
    pub request: GenerationRequest,
    /// Absent when no build ran for this attempt
    pub build_result: Option<BuildResult>,
    /// Set when the generation session did not complete
    pub session_failure: Option<FailureReason>,
}

/// Final outcome of a job, including every attempt made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub final_state: JobState,
    /// Last assembled project, accepted or not
    pub project: Option<AssembledProject>,
    pub dependencies: DependencySet,
    pub attempts: Vec<RepairAttempt>,
    pub transitions: Vec<StateTransition>,
    pub failure: Option<JobFailure>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == JobState::Succeeded
    }

    /// Number of `Generating` transitions.
    pub fn generation_count(&self) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.to == JobState::Generating)
            .count()
    }

    pub fn last_build(&self) -> Option<&BuildResult> {
        self.attempts.iter().rev().find_map(|a| a.build_result.as_ref())
    }
}

/// Read-only view of a running job, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub state: JobState,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Human-readable stage description
    pub message: String,
    /// File currently being streamed
    pub current_file: Option<String>,
    pub files_completed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Exhausted.is_terminal());
        assert!(!JobState::Repairing.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&JobState::ResolvingDeps).unwrap();
        assert_eq!(json, "\"resolving_deps\"");
        assert_eq!(JobState::ResolvingDeps.to_string(), "resolving_deps");
    }

    #[test]
    fn test_knowledge_query_includes_hint() {
        let spec = JobSpec::new(
            UserRequest::new("landing page").component("hero"),
            ProjectMeta::new("site"),
        );
        assert_eq!(spec.knowledge_query(), "landing page hero");
    }
}
