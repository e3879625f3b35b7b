//! Build command - Build an existing project tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use forge_core::{AssembledProject, BuildResult, ExecutorKind};
use forge_runner::BuildRunner;

#[derive(Args)]
pub struct BuildArgs {
    /// Project directory
    pub dir: PathBuf,

    /// Build command (overrides the configuration)
    #[arg(short, long)]
    pub command: Option<String>,

    /// Build timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Run the build inside a Docker container
    #[arg(long)]
    pub container: bool,

    /// Print the build result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: BuildArgs) -> Result<()> {
    let dir = super::project_dir(&args.dir)?;
    let mut config = super::load_config(Some(&dir))?.build;
    if let Some(command) = args.command {
        config = config.command(command);
    }
    if let Some(timeout) = args.timeout {
        config = config.timeout_secs(timeout);
    }
    if args.container {
        config.executor = ExecutorKind::Container;
    }

    let project = AssembledProject::load_dir(&dir)
        .with_context(|| format!("Failed to read project at {}", dir.display()))?;
    let runner = BuildRunner::from_config(&config)
        .await
        .context("Failed to prepare build executor")?;
    info!(
        "Building {} files with `{}` ({} executor)",
        project.len(),
        config.command,
        runner.executor_name()
    );

    let result = runner.run(&project).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.success() {
        anyhow::bail!("Build failed with {} error(s)", result.errors().count());
    }
    Ok(())
}

/// Print diagnostics, errors first.
pub fn print_result(result: &BuildResult) {
    for diagnostic in forge_core::ordered_diagnostics(&result.diagnostics) {
        match &diagnostic.source_line {
            Some(location) => println!("  [{}] {} ({})", diagnostic.severity, diagnostic.message, location),
            None => println!("  [{}] {}", diagnostic.severity, diagnostic.message),
        }
    }

    if result.success() {
        println!("Build succeeded in {}ms", result.duration_ms);
    } else if result.timed_out {
        println!("Build timed out after {}ms", result.duration_ms);
    } else {
        println!(
            "Build failed (exit code {}) with {} error(s), {} warning(s)",
            result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            result.errors().count(),
            result.warnings().count()
        );
    }
}
