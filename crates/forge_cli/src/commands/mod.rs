//! CLI command definitions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use forge_core::ForgeConfig;

pub mod build;
pub mod deps;
pub mod generate;

/// forge - generate, build and repair code projects
#[derive(Parser)]
#[command(name = "forge")]
#[command(version, about = "forge - generate, build and repair code projects")]
#[command(long_about = r#"
forge turns a free-text request into a project that builds. Generated files
are streamed from an LLM, assembled, built, and repaired from the build
diagnostics until the build passes or the attempt budget runs out.

COMMANDS:
  generate  → Run a full generate/build/repair job and write the project
  build     → Build an existing project tree and classify its output
  deps      → List the external dependencies of a project tree

CONFIGURATION:
  .forge/config.toml in the workspace, overridden by FORGE_LLM_PROVIDER,
  FORGE_LLM_MODEL, FORGE_BUILD_COMMAND and FORGE_MAX_ATTEMPTS.
  API keys: OPENAI_API_KEY or ANTHROPIC_API_KEY.

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Build failure
  4 - Configuration error
  5 - Provider error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a project from a request, repairing failed builds
    Generate(generate::GenerateArgs),

    /// Build an existing project tree
    Build(build::BuildArgs),

    /// Resolve the dependencies of a project tree
    Deps(deps::DepsArgs),
}

/// Load the workspace configuration with environment overrides.
pub fn load_config(workspace: Option<&Path>) -> Result<ForgeConfig> {
    let root = match workspace {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    ForgeConfig::from_workspace(&root)
        .and_then(ForgeConfig::apply_env)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))
}

/// Verify a project directory argument.
pub fn project_dir(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        anyhow::bail!("Project directory not found: {}", path.display());
    }
    if !path.is_dir() {
        anyhow::bail!("{} is not a directory", path.display());
    }
    Ok(path.to_path_buf())
}
