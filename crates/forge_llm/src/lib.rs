//! # forge_llm
//!
//! Streamed generation sessions for forge.
//!
//! - [`GenerationProvider`]: contract for remote code generation services
//! - [`LlmAdapter`]: OpenAI and Anthropic streaming over server-sent events
//! - [`FileBlockParser`]: incremental `### FILE:` block parser
//! - [`GenerationStreamController`]: one cancellable session at a time, with an idle timeout
//! - [`ScriptedProvider`]: deterministic provider for tests

pub mod controller;
pub mod error;
pub mod llm;
pub mod mock;
pub mod parser;
pub mod provider;

pub use controller::{GenerationStreamController, SessionHandle, DEFAULT_IDLE_TIMEOUT};
pub use error::{LlmError, LlmResult};
pub use llm::LlmAdapter;
pub use mock::{ScriptStep, ScriptedProvider};
pub use parser::FileBlockParser;
pub use provider::{EventStream, GenerationProvider};
