//! Docker executor: runs the build command inside a container.

use std::time::Instant;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use forge_core::AssembledProject;

use crate::error::{RunnerError, RunnerResult};
use crate::executor::{BuildExecutor, ExecutionOutput};

/// Mount point of the project inside the container.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Docker-based build executor.
pub struct ContainerExecutor {
    client: Docker,
    image: String,
    tag: String,
    command: String,
    env: Vec<String>,
}

impl ContainerExecutor {
    /// Connect to the local Docker daemon.
    pub async fn new(
        image: impl Into<String>,
        tag: impl Into<String>,
        command: impl Into<String>,
    ) -> RunnerResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RunnerError::DockerNotAvailable(e.to_string()))?;

        // Verify connection
        client
            .ping()
            .await
            .map_err(|e| RunnerError::DockerNotAvailable(e.to_string()))?;

        Ok(Self {
            client,
            image: image.into(),
            tag: tag.into(),
            command: command.into(),
            env: Vec::new(),
        })
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    fn full_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    async fn ensure_image(&self) -> RunnerResult<()> {
        let full_image = self.full_image();
        match self.client.inspect_image(&full_image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Pulling image {}", full_image);
        let options = CreateImageOptions {
            from_image: self.image.as_str(),
            tag: self.tag.as_str(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(RunnerError::ImagePullFailed(e.to_string())),
            }
        }
        Ok(())
    }

    async fn wait(&self, container_id: &str) -> RunnerResult<i64> {
        let mut wait_stream = self
            .client
            .wait_container(container_id, None::<WaitContainerOptions<String>>);

        match wait_stream.next().await {
            Some(Ok(exit)) => Ok(exit.status_code),
            // Non-zero exits are reported as errors by the wait endpoint.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(RunnerError::ExecutionFailed(e.to_string())),
            None => Err(RunnerError::ExecutionFailed("container wait failed".into())),
        }
    }

    async fn logs(&self, container_id: &str) -> (String, String) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut stream = self.client.logs(container_id, Some(options));
        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to read container logs: {}", e);
                    break;
                }
            }
        }
        (stdout, stderr)
    }
}

#[async_trait]
impl BuildExecutor for ContainerExecutor {
    fn name(&self) -> &str {
        "container"
    }

    async fn execute(
        &self,
        project: &AssembledProject,
        cancel: CancellationToken,
    ) -> RunnerResult<ExecutionOutput> {
        let workspace = tempfile::Builder::new().prefix("forge-build-").tempdir()?;
        project.write_to_dir(workspace.path())?;
        self.ensure_image().await?;

        let container_name = format!("forge-build-{}", &Uuid::new_v4().to_string()[..8]);
        let host_config = HostConfig {
            mounts: Some(vec![Mount {
                target: Some(WORKSPACE_DIR.to_string()),
                source: Some(workspace.path().to_string_lossy().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(false),
                ..Default::default()
            }]),
            auto_remove: Some(false), // removed by the guard after logs are read
            ..Default::default()
        };
        let config = Config {
            image: Some(self.full_image()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), self.command.clone()]),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            env: Some(self.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;
        let guard = ContainerGuard {
            client: self.client.clone(),
            id: container.id.clone(),
        };

        let started = Instant::now();
        self.client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Started build container {} ({})", container_name, self.full_image());

        let exit_code = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Build cancelled, stopping container {}", container_name);
                drop(guard);
                return Err(RunnerError::Cancelled);
            }
            code = self.wait(&container.id) => code?,
        };

        let (stdout, stderr) = self.logs(&container.id).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        drop(guard);

        Ok(ExecutionOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms,
        })
    }
}

/// Force-removes the container when dropped, including when the build
/// future itself is dropped on timeout.
struct ContainerGuard {
    client: Docker,
    id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let client = self.client.clone();
        let id = std::mem::take(&mut self.id);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let options = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                if let Err(e) = client.remove_container(&id, Some(options)).await {
                    debug!("Failed to remove container {}: {}", id, e);
                }
            });
        }
    }
}
