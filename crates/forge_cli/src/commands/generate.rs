//! Generate command - Run a generate/build/repair job.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forge_core::{
    ForgeConfig, GenerationKind, InMemoryKnowledgeStore, KnowledgeStore, ProjectMeta, UserRequest,
};
use forge_llm::LlmAdapter;
use forge_repair::{JobProgress, JobReport, JobSpec, RepairSupervisor, SupervisorConfig};
use forge_runner::BuildRunner;

#[derive(Args)]
pub struct GenerateArgs {
    /// What to generate
    pub request: String,

    /// Kind of output (component, page, service, full-project)
    #[arg(short, long, default_value = "component")]
    pub kind: GenerationKind,

    /// Project name
    #[arg(short, long, default_value = "app")]
    pub name: String,

    /// Component to focus on
    #[arg(long)]
    pub component: Option<String>,

    /// Visual style
    #[arg(long, default_value = "modern")]
    pub style: String,

    /// Requested feature (repeatable)
    #[arg(long = "feature")]
    pub features: Vec<String>,

    /// Project category
    #[arg(long)]
    pub category: Option<String>,

    /// Frontend stack
    #[arg(long)]
    pub frontend: Option<String>,

    /// Backend stack
    #[arg(long)]
    pub backend: Option<String>,

    /// Knowledge entries (JSON array)
    #[arg(long)]
    pub knowledge: Option<PathBuf>,

    /// Output directory (defaults to ./<name>)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Total generation attempts
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Write the job report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Workspace holding .forge/config.toml
    #[arg(long)]
    pub workspace: Option<PathBuf>,
}

impl GenerateArgs {
    fn job_spec(&self) -> JobSpec {
        let mut request = UserRequest::new(&self.request)
            .kind(self.kind)
            .style(&self.style);
        if let Some(component) = &self.component {
            request = request.component(component);
        }
        for feature in &self.features {
            request = request.feature(feature);
        }

        let mut meta = ProjectMeta::new(&self.name);
        if let Some(category) = &self.category {
            meta = meta.category(category);
        }
        if let Some(frontend) = &self.frontend {
            meta = meta.frontend(frontend);
        }
        if let Some(backend) = &self.backend {
            meta = meta.backend(backend);
        }

        JobSpec::new(request, meta)
    }
}

pub async fn execute(args: GenerateArgs) -> Result<()> {
    let mut config = super::load_config(args.workspace.as_deref())?;
    if let Some(max_attempts) = args.max_attempts {
        config.repair.max_attempts = max_attempts;
        config.validate()?;
    }

    let output = match &args.out {
        Some(path) => path.clone(),
        None => std::env::current_dir()?.join(&args.name),
    };
    if output.exists() {
        anyhow::bail!("Output directory already exists: {}", output.display());
    }

    let supervisor = build_supervisor(&config, &args).await?;
    let spec = args.job_spec();
    info!("Generating {} '{}'", spec.request.generation_kind, spec.meta.name);

    let abort = CancellationToken::new();
    let ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting job");
            ctrl_c.cancel();
        }
    });

    let (progress_tx, progress_rx) = watch::channel(JobProgress::default());
    let printer = tokio::spawn(print_progress(progress_rx));
    let report = match supervisor.run_job_observed(spec, abort, progress_tx).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(report) = e.report() {
                print_history(report);
            }
            return Err(e).context("Generation job failed");
        }
    };
    let _ = printer.await;

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if !report.succeeded() {
        print_history(&report);
        anyhow::bail!(
            "Generation failed after {} attempt(s): {}",
            report.attempts.len(),
            report
                .failure
                .map(|f| f.to_string())
                .unwrap_or_else(|| report.final_state.to_string())
        );
    }

    let Some(project) = &report.project else {
        anyhow::bail!("Generation failed: no project was assembled");
    };
    project
        .write_to_dir(&output)
        .with_context(|| format!("Failed to write project to {}", output.display()))?;

    println!(
        "Generated {} files in {} after {} attempt(s)",
        project.len(),
        output.display(),
        report.attempts.len()
    );
    if !report.dependencies.is_empty() {
        println!("Dependencies:");
        for name in &report.dependencies {
            println!("  {}", name);
        }
    }

    Ok(())
}

async fn build_supervisor(config: &ForgeConfig, args: &GenerateArgs) -> Result<RepairSupervisor> {
    let provider = LlmAdapter::from_config(&config.generation)?;

    let store = match &args.knowledge {
        Some(path) => InMemoryKnowledgeStore::load_json(path)
            .with_context(|| format!("Failed to load knowledge from {}", path.display()))?,
        None => InMemoryKnowledgeStore::new(),
    };
    let store: Arc<dyn KnowledgeStore> =
        Arc::new(store.min_similarity(config.knowledge.min_similarity));

    let runner = BuildRunner::from_config(&config.build)
        .await
        .context("Failed to prepare build executor")?;

    let supervisor = RepairSupervisor::new(
        store,
        Arc::new(provider),
        Arc::new(runner),
        SupervisorConfig::from(config),
    )?;
    Ok(supervisor)
}

async fn print_progress(mut rx: watch::Receiver<JobProgress>) {
    let mut last = {
        let progress = rx.borrow();
        (progress.state, progress.attempt)
    };
    while rx.changed().await.is_ok() {
        let progress = rx.borrow_and_update().clone();
        if (progress.state, progress.attempt) != last {
            println!(
                "[{}/{}] {}",
                progress.attempt, progress.max_attempts, progress.message
            );
            last = (progress.state, progress.attempt);
        }
    }
}

fn print_history(report: &JobReport) {
    for attempt in &report.attempts {
        println!("Attempt {}:", attempt.attempt_number);
        if let Some(reason) = attempt.session_failure {
            println!("  generation ended early ({})", reason);
        }
        match &attempt.build_result {
            Some(result) => super::build::print_result(result),
            None => println!("  no build"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_from_args() {
        let args = GenerateArgs {
            request: "pricing table".to_string(),
            kind: GenerationKind::Component,
            name: "shop".to_string(),
            component: Some("PricingTable".to_string()),
            style: "minimal".to_string(),
            features: vec!["annual toggle".to_string()],
            category: Some("ecommerce".to_string()),
            frontend: Some("react".to_string()),
            backend: None,
            knowledge: None,
            out: None,
            max_attempts: None,
            report: None,
            workspace: None,
        };

        let spec = args.job_spec();
        assert_eq!(spec.request.component_hint.as_deref(), Some("PricingTable"));
        assert_eq!(spec.request.options.style, "minimal");
        assert_eq!(spec.request.options.features, vec!["annual toggle"]);
        assert_eq!(spec.meta.category, "ecommerce");
        assert_eq!(spec.meta.frontend.as_deref(), Some("react"));
        assert!(spec.meta.backend.is_none());
    }
}
