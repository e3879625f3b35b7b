//! Core types shared by every stage of a generation job.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::project::ProjectFile;

/// A previously generated fragment held by the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    /// Kind of code (component, page, service, ...)
    #[serde(rename = "codeKind")]
    pub code_kind: String,
    pub description: String,
    /// Token signature used for similarity search
    pub signature: String,
    #[serde(rename = "reuseCount", default)]
    pub reuse_count: u64,
    #[serde(rename = "successRate", default)]
    pub success_rate: f64,
    /// Stored fragment. Never placed in prompts.
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl KnowledgeEntry {
    /// Create an entry whose signature is derived from its description.
    pub fn new(
        id: impl Into<String>,
        code_kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let description = description.into();
        Self {
            id: id.into(),
            code_kind: code_kind.into(),
            signature: crate::knowledge::signature_for(&description),
            description,
            reuse_count: 0,
            success_rate: 0.0,
            code: String::new(),
            stack: None,
            category: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_stats(mut self, reuse_count: u64, success_rate: f64) -> Self {
        self.reuse_count = reuse_count;
        self.success_rate = success_rate;
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// What the user asked to have generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationKind {
    #[default]
    Component,
    Page,
    Service,
    FullProject,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Page => "page",
            Self::Service => "service",
            Self::FullProject => "full-project",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "component" => Ok(Self::Component),
            "page" => Ok(Self::Page),
            "service" | "api" => Ok(Self::Service),
            "full-project" | "project" => Ok(Self::FullProject),
            other => Err(format!("unknown generation kind: {}", other)),
        }
    }
}

/// Style and feature options attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub style: String,
    #[serde(default)]
    pub features: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            style: "modern".to_string(),
            features: Vec::new(),
        }
    }
}

/// Project metadata supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectMeta {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl ProjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn frontend(mut self, stack: impl Into<String>) -> Self {
        self.frontend = Some(stack.into());
        self
    }

    pub fn backend(mut self, stack: impl Into<String>) -> Self {
        self.backend = Some(stack.into());
        self
    }
}

/// The user's free-text request together with its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    pub target_spec: String,
    #[serde(default)]
    pub generation_kind: GenerationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_hint: Option<String>,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl UserRequest {
    pub fn new(target_spec: impl Into<String>) -> Self {
        Self {
            target_spec: target_spec.into(),
            generation_kind: GenerationKind::default(),
            component_hint: None,
            options: GenerationOptions::default(),
        }
    }

    pub fn kind(mut self, kind: GenerationKind) -> Self {
        self.generation_kind = kind;
        self
    }

    pub fn component(mut self, hint: impl Into<String>) -> Self {
        self.component_hint = Some(hint.into());
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.options.style = style.into();
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.options.features.push(feature.into());
        self
    }
}

/// Whether a request starts a job or repairs a failed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Initial,
    Repair,
}

/// Context carried into a repair request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairContext {
    /// Files of the previous attempt, keyed by path
    pub prior_files: BTreeMap<String, ProjectFile>,
    /// Diagnostics of the failed build, in emission order
    pub diagnostics: Vec<Diagnostic>,
}

/// A fully composed generation request. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    pub generation_kind: GenerationKind,
    pub target_spec: String,
    pub component_hint: Option<String>,
    pub options: GenerationOptions,
    pub knowledge_context: Vec<KnowledgeEntry>,
    pub repair_context: Option<RepairContext>,
    /// Rendered prompt text sent to the provider
    pub prompt: String,
}

impl GenerationRequest {
    pub fn is_repair(&self) -> bool {
        self.kind == RequestKind::Repair
    }
}

/// Why a generation session ended without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    Cancelled,
    Transport,
    Timeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Provider metadata reported when a session completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionMetadata {
    pub provider: String,
    #[serde(rename = "tokensUsed")]
    pub tokens_used: u64,
}

/// Events produced by a generation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    SessionStarted {
        session_id: String,
    },
    KnowledgeMatched {
        count: usize,
        top_match: Option<String>,
    },
    FileStarted {
        path: String,
    },
    FileChunk {
        path: String,
        text: String,
    },
    FileCompleted {
        path: String,
        final_text: String,
        language: String,
    },
    SessionCompleted {
        files: Vec<String>,
        metadata: SessionMetadata,
    },
    SessionFailed {
        reason: FailureReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl StreamEvent {
    pub fn file_started(path: impl Into<String>) -> Self {
        Self::FileStarted { path: path.into() }
    }

    pub fn chunk(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self::FileChunk {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn file_completed(
        path: impl Into<String>,
        final_text: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self::FileCompleted {
            path: path.into(),
            final_text: final_text.into(),
            language: language.into(),
        }
    }

    pub fn failed(reason: FailureReason, message: Option<String>) -> Self {
        Self::SessionFailed { reason, message }
    }

    /// Terminal events end a session; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionCompleted { .. } | Self::SessionFailed { .. }
        )
    }

    /// File path this event refers to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::FileStarted { path }
            | Self::FileChunk { path, .. }
            | Self::FileCompleted { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::KnowledgeMatched { .. } => "knowledge_matched",
            Self::FileStarted { .. } => "file_started",
            Self::FileChunk { .. } => "file_chunk",
            Self::FileCompleted { .. } => "file_completed",
            Self::SessionCompleted { .. } => "session_completed",
            Self::SessionFailed { .. } => "session_failed",
        }
    }
}

/// Severity of a build output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// File reference parsed from a diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub path: String,
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

/// One classified line of build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(rename = "sourceLine", default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            source_line: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            source_line: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.source_line = Some(location);
        self
    }
}

/// Outcome of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutcome {
    Success,
    Failure,
}

/// Structured result of one build run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub outcome: BuildOutcome,
    pub diagnostics: Vec<Diagnostic>,
    /// Exit status of the external process, when it finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

impl BuildResult {
    /// Result reported when the wall-clock budget ran out.
    pub fn timed_out(duration_ms: u64) -> Self {
        Self {
            outcome: BuildOutcome::Failure,
            diagnostics: vec![Diagnostic::error("build timed out")],
            exit_code: None,
            timed_out: true,
            duration_ms,
        }
    }

    pub fn success(&self) -> bool {
        self.outcome == BuildOutcome::Success
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_serialization() {
        let event = StreamEvent::chunk("a.js", "const x=1;");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"file_chunk\""));

        let failed = StreamEvent::failed(FailureReason::Timeout, None);
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"reason\":\"timeout\""));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::failed(FailureReason::Cancelled, None).is_terminal());
        assert!(StreamEvent::SessionCompleted {
            files: vec![],
            metadata: SessionMetadata::default(),
        }
        .is_terminal());
        assert!(!StreamEvent::file_started("a.js").is_terminal());
        assert_eq!(StreamEvent::file_started("a.js").path(), Some("a.js"));
    }

    #[test]
    fn test_generation_kind_parsing() {
        assert_eq!("page".parse::<GenerationKind>(), Ok(GenerationKind::Page));
        assert_eq!(
            "full-project".parse::<GenerationKind>(),
            Ok(GenerationKind::FullProject)
        );
        assert!("widget".parse::<GenerationKind>().is_err());
    }

    #[test]
    fn test_timed_out_build_result() {
        let result = BuildResult::timed_out(1500);
        assert!(!result.success());
        assert!(result.timed_out);
        assert_eq!(result.errors().count(), 1);
        assert_eq!(result.diagnostics[0].message, "build timed out");
    }

    #[test]
    fn test_source_location_display() {
        let location = SourceLocation {
            path: "src/App.js".to_string(),
            line: Some(12),
            column: Some(4),
        };
        assert_eq!(location.to_string(), "src/App.js:12:4");
    }
}
