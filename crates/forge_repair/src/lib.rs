//! # forge_repair
//!
//! The job supervisor of forge. A job moves through
//!
//! ```text
//! Composing -> Generating -> Assembling -> ResolvingDeps -> Building
//!                  ^                                           |
//!                  +------------- Repairing <------------------+
//!                                                              |
//!                                          Succeeded | Exhausted
//! ```
//!
//! Failed builds are repaired by feeding their diagnostics into the next
//! generation request, until the attempt budget is spent. The returned
//! [`JobReport`] keeps every attempt so callers can see what was tried.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use forge_core::{InMemoryKnowledgeStore, ProjectMeta, UserRequest};
//! use forge_llm::LlmAdapter;
//! use forge_repair::{JobSpec, RepairSupervisor, SupervisorConfig};
//! use forge_runner::{BuildRunner, ProcessExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = BuildRunner::new(
//!         Arc::new(ProcessExecutor::new("npm install && npm run build")),
//!         Duration::from_secs(300),
//!     )?;
//!     let supervisor = RepairSupervisor::new(
//!         Arc::new(InMemoryKnowledgeStore::new()),
//!         Arc::new(LlmAdapter::from_env()?),
//!         Arc::new(runner),
//!         SupervisorConfig::default(),
//!     )?;
//!
//!     let spec = JobSpec::new(UserRequest::new("todo list with filters"), ProjectMeta::new("todo"));
//!     let report = supervisor.run_job(spec, CancellationToken::new()).await?;
//!     println!("{} after {} attempts", report.final_state, report.attempts.len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod state;
pub mod supervisor;

pub use error::{ProtocolViolation, RepairError, RepairResult};
pub use state::{
    JobFailure, JobProgress, JobReport, JobSpec, JobState, RepairAttempt, StateTransition,
};
pub use supervisor::{RepairSupervisor, SupervisorConfig, DEFAULT_MAX_ATTEMPTS};
