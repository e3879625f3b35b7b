//! # forge_core
//!
//! Data model and pure building blocks of the forge generation pipeline.
//!
//! A job turns a free-text request into a buildable project:
//!
//! - **Knowledge**: similarity search over previously generated fragments
//! - **Composition**: deterministic prompt rendering for initial and repair requests
//! - **Assembly**: ordered accumulation of streamed file fragments
//! - **Dependencies**: static inference of external packages from manifests and imports
//! - **Configuration**: `.forge/config.toml` with environment overrides
//!
//! Streaming, build execution and the repair loop live in `forge_llm`,
//! `forge_runner` and `forge_repair`.
//!
//! # Example
//!
//! ```rust
//! use forge_core::{FileAssembler, StreamEvent};
//!
//! let mut assembler = FileAssembler::new();
//! assembler.apply(&StreamEvent::file_started("src/App.js")).unwrap();
//! assembler.apply(&StreamEvent::chunk("src/App.js", "export default 1;")).unwrap();
//! assert_eq!(assembler.content("src/App.js"), Some("export default 1;"));
//! ```

pub mod assembler;
pub mod composer;
pub mod config;
pub mod deps;
pub mod error;
pub mod knowledge;
pub mod project;
pub mod types;

pub use assembler::{DraftStatus, FileAssembler};
pub use composer::{ordered_diagnostics, RequestComposer, DEFAULT_MAX_MATCHES, OUTPUT_FORMAT};
pub use config::{
    BuildConfig, ExecutorKind, ForgeConfig, GenerationConfig, KnowledgeConfig, ProviderKind,
    RepairConfig, CONFIG_FILE, FORGE_DIR,
};
pub use deps::{DependencyResolver, DependencySet};
pub use error::{CoreError, CoreResult};
pub use knowledge::{
    signature_for, similarity, InMemoryKnowledgeStore, KnowledgeStats, KnowledgeStore,
    SearchFilters, UnavailableKnowledgeStore, DEFAULT_MIN_SIMILARITY,
};
pub use project::{language_for_path, safe_relative_path, AssembledProject, ProjectFile};
pub use types::{
    BuildOutcome, BuildResult, Diagnostic, FailureReason, GenerationKind, GenerationOptions,
    GenerationRequest, KnowledgeEntry, ProjectMeta, RepairContext, RequestKind, SessionMetadata,
    Severity, SourceLocation, StreamEvent, UserRequest,
};
