//! Error types for the repair supervisor.

use thiserror::Error;

use forge_core::CoreError;
use forge_llm::LlmError;

use crate::state::JobReport;

/// Result type alias for supervisor operations.
pub type RepairResult<T> = Result<T, RepairError>;

/// A broken streaming contract. Always fatal to the job.
#[derive(Error, Debug)]
pub enum ProtocolViolation {
    /// The event stream broke the per-file ordering rules.
    #[error(transparent)]
    Stream(#[from] CoreError),

    /// A second session was started while one was active.
    #[error(transparent)]
    Session(#[from] LlmError),
}

/// Errors surfaced by [`RepairSupervisor`](crate::RepairSupervisor).
///
/// Build failures, exhausted budgets and cancellation are not errors; they
/// are reported in the [`JobReport`](crate::JobReport).
#[derive(Error, Debug)]
pub enum RepairError {
    /// The report holds every attempt up to and including the violating one.
    #[error("Protocol violation in attempt {attempt}: {source}")]
    Protocol {
        attempt: u32,
        #[source]
        source: ProtocolViolation,
        report: Box<JobReport>,
    },

    #[error("Invalid supervisor configuration: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl RepairError {
    pub fn protocol(
        attempt: u32,
        source: impl Into<ProtocolViolation>,
        report: JobReport,
    ) -> Self {
        Self::Protocol {
            attempt,
            source: source.into(),
            report: Box::new(report),
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Partial job history, when the job had started.
    pub fn report(&self) -> Option<&JobReport> {
        match self {
            Self::Protocol { report, .. } => Some(report),
            _ => None,
        }
    }
}
