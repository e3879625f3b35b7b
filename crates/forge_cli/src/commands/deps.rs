//! Deps command - List the external dependencies of a project tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use forge_core::{AssembledProject, DependencyResolver, DependencySet};

#[derive(Args)]
pub struct DepsArgs {
    /// Project directory
    pub dir: PathBuf,

    /// Print the set as a JSON array
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: DepsArgs) -> Result<()> {
    let deps = resolve(&args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&deps)?);
    } else if deps.is_empty() {
        println!("No external dependencies found");
    } else {
        for name in &deps {
            println!("{}", name);
        }
    }

    Ok(())
}

fn resolve(args: &DepsArgs) -> Result<DependencySet> {
    let dir = super::project_dir(&args.dir)?;
    let project = AssembledProject::load_dir(&dir)
        .with_context(|| format!("Failed to read project at {}", dir.display()))?;
    info!("Scanning {} files in {}", project.len(), dir.display());

    let resolver = DependencyResolver::new()?;
    Ok(resolver.resolve(&project))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolves_manifest_and_imports() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "^18.2.0"}}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/App.js"),
            "import axios from 'axios';\nimport './App.css';\n",
        )
        .unwrap();

        let deps = resolve(&DepsArgs {
            dir: dir.path().to_path_buf(),
            json: false,
        })
        .unwrap();

        assert!(deps.contains("react"));
        assert!(deps.contains("axios"));
        assert_eq!(deps.len(), 2);
    }
}
