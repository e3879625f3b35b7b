//! Workspace configuration.
//!
//! Loaded from `<workspace>/.forge/config.toml` when present; every field has
//! a default so an empty or missing file yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::knowledge::{SearchFilters, DEFAULT_MIN_SIMILARITY};

/// Directory holding forge state inside a workspace.
pub const FORGE_DIR: &str = ".forge";

/// Configuration file name inside [`FORGE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Generation provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAI,
    Anthropic,
}

impl std::str::FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(CoreError::Config(format!("unknown provider: {}", other))),
        }
    }
}

/// Where builds run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Process,
    Container,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub model: Option<String>,
    /// Seconds without any stream event before the session fails
    pub idle_timeout_secs: u64,
    pub max_tokens: u32,
    /// Knowledge matches embedded in a prompt
    pub max_knowledge_matches: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            idle_timeout_secs: 60,
            max_tokens: 8192,
            max_knowledge_matches: 3,
        }
    }
}

impl GenerationConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub min_similarity: f64,
    pub search_timeout_ms: u64,
    pub stack: Option<String>,
    pub category: Option<String>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
            search_timeout_ms: 2000,
            stack: None,
            category: None,
        }
    }
}

impl KnowledgeConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            stack: self.stack.clone(),
            category: self.category.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Shell command run in the project root
    pub command: String,
    pub timeout_secs: u64,
    pub executor: ExecutorKind,
    /// Container image for the container executor
    pub image: String,
    pub tag: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: "npm install && npm run build".to_string(),
            timeout_secs: 300, // 5 minutes
            executor: ExecutorKind::default(),
            image: "node".to_string(),
            tag: "20-slim".to_string(),
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Total generation attempts per job, including the initial one
    pub max_attempts: u32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ForgeConfig {
    pub generation: GenerationConfig,
    pub knowledge: KnowledgeConfig,
    pub build: BuildConfig,
    pub repair: RepairConfig,
}

impl ForgeConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `<root>/.forge/config.toml`, falling back to defaults.
    pub fn from_workspace(root: &Path) -> CoreResult<Self> {
        let path = root.join(FORGE_DIR).join(CONFIG_FILE);
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `FORGE_*` environment overrides.
    pub fn apply_env(mut self) -> CoreResult<Self> {
        if let Ok(provider) = std::env::var("FORGE_LLM_PROVIDER") {
            if !provider.is_empty() {
                self.generation.provider = provider.parse()?;
            }
        }
        if let Ok(model) = std::env::var("FORGE_LLM_MODEL") {
            if !model.is_empty() {
                self.generation.model = Some(model);
            }
        }
        if let Ok(command) = std::env::var("FORGE_BUILD_COMMAND") {
            if !command.is_empty() {
                self.build.command = command;
            }
        }
        if let Ok(attempts) = std::env::var("FORGE_MAX_ATTEMPTS") {
            match attempts.parse() {
                Ok(value) => self.repair.max_attempts = value,
                Err(_) => warn!("Ignoring invalid FORGE_MAX_ATTEMPTS={}", attempts),
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.repair.max_attempts == 0 {
            return Err(CoreError::Config("repair.max_attempts must be at least 1".into()));
        }
        if self.generation.idle_timeout_secs == 0 {
            return Err(CoreError::Config("generation.idle_timeout_secs must be positive".into()));
        }
        if self.build.timeout_secs == 0 {
            return Err(CoreError::Config("build.timeout_secs must be positive".into()));
        }
        if self.build.command.trim().is_empty() {
            return Err(CoreError::Config("build.command must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::default();
        assert_eq!(config.repair.max_attempts, 3);
        assert_eq!(config.generation.max_knowledge_matches, 3);
        assert_eq!(config.build.timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = ForgeConfig::from_toml(
            r#"
            [generation]
            provider = "anthropic"
            idle_timeout_secs = 15

            [build]
            command = "cargo build"
            executor = "container"
            image = "rust"
            tag = "1.75-slim"
            "#,
        )
        .unwrap();

        assert_eq!(config.generation.provider, ProviderKind::Anthropic);
        assert_eq!(config.generation.idle_timeout(), Duration::from_secs(15));
        assert_eq!(config.build.executor, ExecutorKind::Container);
        assert_eq!(config.build.command, "cargo build");
        assert_eq!(config.repair.max_attempts, 3);
    }

    #[test]
    fn test_invalid_attempt_budget() {
        let result = ForgeConfig::from_toml("[repair]\nmax_attempts = 0\n");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_from_workspace_without_file() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::from_workspace(dir.path()).unwrap();
        assert_eq!(config, ForgeConfig::default());
    }

    #[test]
    fn test_from_workspace_with_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(FORGE_DIR)).unwrap();
        std::fs::write(
            dir.path().join(FORGE_DIR).join(CONFIG_FILE),
            "[repair]\nmax_attempts = 5\n",
        )
        .unwrap();
        let config = ForgeConfig::from_workspace(dir.path()).unwrap();
        assert_eq!(config.repair.max_attempts, 5);
    }
}
