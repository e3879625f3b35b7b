//! Local process executor.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use forge_core::AssembledProject;

use crate::error::{RunnerError, RunnerResult};
use crate::executor::{BuildExecutor, ExecutionOutput};

/// Runs the build command through the platform shell in a scratch copy of
/// the project.
pub struct ProcessExecutor {
    command: String,
    env: Vec<(String, String)>,
}

impl ProcessExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn run_in(&self, dir: &Path, cancel: &CancellationToken) -> RunnerResult<ExecutionOutput> {
        let (shell, shell_arg) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut command = Command::new(shell);
        command
            .arg(shell_arg)
            .arg(&self.command)
            .current_dir(dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::ExecutionFailed(format!("failed to spawn `{}`: {}", self.command, e)))?;

        // Read both pipes concurrently so neither can fill up and block the child.
        let stdout_task = read_lines(child.stdout.take());
        let stderr_task = read_lines(child.stderr.take());

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Build cancelled, killing process");
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(RunnerError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        // Killed by a signal: no exit code
        let exit_code = status.code().map(i64::from).unwrap_or(-1);
        debug!("Build exited with {} after {}ms", exit_code, duration_ms);

        Ok(ExecutionOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms,
        })
    }
}

#[async_trait]
impl BuildExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        project: &AssembledProject,
        cancel: CancellationToken,
    ) -> RunnerResult<ExecutionOutput> {
        let workspace = tempfile::Builder::new().prefix("forge-build-").tempdir()?;
        project.write_to_dir(workspace.path())?;
        info!(
            "Running `{}` on {} files in {}",
            self.command,
            project.len(),
            workspace.path().display()
        );
        self.run_in(workspace.path(), &cancel).await
    }
}

fn read_lines<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut output = String::new();
        if let Some(pipe) = pipe {
            let mut reader = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                output.push_str(&line);
                output.push('\n');
            }
        }
        output
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_captures_both_streams_and_exit_code() {
        let executor = ProcessExecutor::new("echo built; echo oops >&2; exit 3");
        let output = executor
            .execute(&AssembledProject::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "built\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_runs_inside_project_tree() {
        let project = AssembledProject::new().with_file("src/a.txt", "hello");
        let executor = ProcessExecutor::new("cat src/a.txt && echo \" $GREETING\"").env("GREETING", "world");
        let output = executor.execute(&project, CancellationToken::new()).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "hello world\n");
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let executor = ProcessExecutor::new("sleep 30");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = executor.execute(&AssembledProject::new(), cancel).await;
        assert!(matches!(result, Err(RunnerError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
