//! Assembled project trees.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};

/// Directories never loaded from disk.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "target", "dist", "build", "__pycache__", ".venv"];

/// Maximum size of a file loaded from disk (1 MiB).
const MAX_LOADED_FILE_BYTES: u64 = 1024 * 1024;

/// A single generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub content: String,
    pub language: String,
}

impl ProjectFile {
    pub fn new(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: language.into(),
        }
    }
}

/// Frozen project tree produced by a generation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledProject {
    pub files: BTreeMap<String, ProjectFile>,
    #[serde(rename = "generatedAt")]
    pub generated_at: DateTime<Utc>,
    /// False for drafts taken before the session completed
    pub complete: bool,
}

impl AssembledProject {
    /// Create an empty, complete project.
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            generated_at: Utc::now(),
            complete: true,
        }
    }

    /// Add a file, inferring the language from its extension.
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = language_for_path(&path).to_string();
        self.files.insert(path, ProjectFile::new(content, language));
        self
    }

    pub fn file(&self, path: &str) -> Option<&ProjectFile> {
        self.files.get(path)
    }

    pub fn content(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.content.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Only snapshots of completed sessions are buildable.
    pub fn is_buildable(&self) -> bool {
        self.complete
    }

    /// Write every file below `root`, creating directories as needed.
    pub fn write_to_dir(&self, root: &Path) -> CoreResult<()> {
        for (path, file) in &self.files {
            let target = root.join(safe_relative_path(path)?);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &file.content)?;
        }
        debug!("Wrote {} files to {}", self.files.len(), root.display());
        Ok(())
    }

    /// Load a project tree from disk. Binary and oversized files are skipped.
    pub fn load_dir(root: &Path) -> CoreResult<Self> {
        let mut project = Self::new();

        let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && e.file_name()
                    .to_str()
                    .map(|name| SKIPPED_DIRS.contains(&name))
                    .unwrap_or(false))
        });

        for entry in walker {
            let entry = entry.map_err(|e| CoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_LOADED_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| CoreError::InvalidPath(entry.path().display().to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            project = project.with_file(key, content);
        }

        Ok(project)
    }
}

impl Default for AssembledProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject absolute paths and parent traversal in generated file names.
pub fn safe_relative_path(path: &str) -> CoreResult<PathBuf> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(CoreError::InvalidPath(path.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    Ok(clean)
}

/// Infer a language name from a file extension.
pub fn language_for_path(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name {
        "Dockerfile" => return "dockerfile",
        "Makefile" => return "makefile",
        _ => {}
    }
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension.to_ascii_lowercase().as_str() {
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "tsx",
        "vue" => "vue",
        "svelte" => "svelte",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" | "sass" => "scss",
        "md" => "markdown",
        "sh" => "shell",
        "sql" => "sql",
        "txt" => "text",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_language_detection() {
        assert_eq!(language_for_path("src/App.jsx"), "jsx");
        assert_eq!(language_for_path("main.py"), "python");
        assert_eq!(language_for_path("deploy/Dockerfile"), "dockerfile");
        assert_eq!(language_for_path("LICENSE"), "plaintext");
    }

    #[test]
    fn test_safe_relative_path() {
        assert!(safe_relative_path("src/index.js").is_ok());
        assert!(safe_relative_path("./src/index.js").is_ok());
        assert!(safe_relative_path("../escape.js").is_err());
        assert!(safe_relative_path("/etc/passwd").is_err());
        assert!(safe_relative_path("").is_err());
    }

    #[test]
    fn test_write_and_load_dir() {
        let dir = TempDir::new().unwrap();
        let project = AssembledProject::new()
            .with_file("package.json", "{}")
            .with_file("src/index.js", "console.log('hi');");

        project.write_to_dir(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/left-pad")).unwrap();
        fs::write(dir.path().join("node_modules/left-pad/index.js"), "x").unwrap();

        let loaded = AssembledProject::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.content("src/index.js"), Some("console.log('hi');"));
        assert_eq!(loaded.file("src/index.js").unwrap().language, "javascript");
    }

    #[test]
    fn test_write_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let project = AssembledProject::new().with_file("../outside.txt", "nope");
        assert!(matches!(
            project.write_to_dir(dir.path()),
            Err(CoreError::InvalidPath(_))
        ));
    }
}
