//! # forge_runner
//!
//! Build execution for forge.
//!
//! A [`BuildRunner`] hands an assembled project to a [`BuildExecutor`],
//! enforces a wall-clock timeout, and classifies every output line into a
//! diagnostic. A build succeeds only when the process exits with status zero
//! **and** no output line was classified as an error.
//!
//! # Executors
//!
//! - [`ProcessExecutor`]: local shell command in a scratch directory
//! - [`ContainerExecutor`]: Docker container via bollard, project bind-mounted at `/workspace`
//! - [`MockExecutor`]: predefined responses for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use forge_core::AssembledProject;
//! use forge_runner::{BuildRunner, ProcessExecutor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Arc::new(ProcessExecutor::new("npm install && npm run build"));
//!     let runner = BuildRunner::new(executor, Duration::from_secs(300))?;
//!
//!     let project = AssembledProject::load_dir(std::path::Path::new("."))?;
//!     let result = runner.run(&project).await;
//!     println!("{:?}: {} errors", result.outcome, result.errors().count());
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod docker;
pub mod error;
pub mod executor;
pub mod mock;
pub mod process;
pub mod runner;

pub use classify::{DiagnosticClassifier, OutputStream};
pub use docker::{ContainerExecutor, WORKSPACE_DIR};
pub use error::{RunnerError, RunnerResult};
pub use executor::{BuildExecutor, ExecutionOutput};
pub use mock::{MockExecutor, MockResponse};
pub use process::ProcessExecutor;
pub use runner::BuildRunner;
