//! Assembly of streamed file fragments into a project tree.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::project::{language_for_path, AssembledProject, ProjectFile};
use crate::types::{FailureReason, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Open,
    Completed,
}

#[derive(Debug, Clone)]
struct DraftFile {
    content: String,
    language: String,
    state: FileState,
}

/// Lifecycle of the draft being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStatus {
    InProgress,
    Completed,
    Failed(FailureReason),
}

/// Accumulates stream events for one session.
///
/// Chunks for a path are appended in the order they are applied; a
/// `FileCompleted` replaces whatever was accumulated for its path. A new
/// `FileStarted` for a completed path reopens it empty, so the last
/// completed block for a path wins.
#[derive(Debug)]
pub struct FileAssembler {
    files: BTreeMap<String, DraftFile>,
    status: DraftStatus,
}

impl Default for FileAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FileAssembler {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            status: DraftStatus::InProgress,
        }
    }

    /// Apply one event to the draft.
    pub fn apply(&mut self, event: &StreamEvent) -> CoreResult<()> {
        if self.status != DraftStatus::InProgress {
            return Err(CoreError::SessionClosed(event.name().to_string()));
        }

        match event {
            StreamEvent::FileStarted { path } => match self.files.get(path).map(|f| f.state) {
                Some(FileState::Open) => {
                    debug!("Duplicate start for {}", path);
                }
                state => {
                    if state == Some(FileState::Completed) {
                        debug!("Reopening {}, the later block replaces it", path);
                    }
                    self.files.insert(
                        path.clone(),
                        DraftFile {
                            content: String::new(),
                            language: language_for_path(path).to_string(),
                            state: FileState::Open,
                        },
                    );
                }
            },
            StreamEvent::FileChunk { path, text } => {
                let file = self
                    .files
                    .get_mut(path)
                    .ok_or_else(|| CoreError::UnknownFile(path.clone()))?;
                if file.state == FileState::Completed {
                    return Err(CoreError::FileAlreadyCompleted(path.clone()));
                }
                file.content.push_str(text);
            }
            StreamEvent::FileCompleted {
                path,
                final_text,
                language,
            } => {
                let language = if language.is_empty() {
                    language_for_path(path).to_string()
                } else {
                    language.clone()
                };
                match self.files.get_mut(path) {
                    Some(file) if file.state == FileState::Completed => {
                        return Err(CoreError::FileAlreadyCompleted(path.clone()));
                    }
                    Some(file) => {
                        file.content.clone_from(final_text);
                        file.language = language;
                        file.state = FileState::Completed;
                    }
                    None => {
                        warn!("File {} completed without being started", path);
                        self.files.insert(
                            path.clone(),
                            DraftFile {
                                content: final_text.clone(),
                                language,
                                state: FileState::Completed,
                            },
                        );
                    }
                }
            }
            StreamEvent::SessionCompleted { .. } => {
                let open = self.open_paths();
                if !open.is_empty() {
                    warn!("Session completed with {} unfinished file(s): {:?}", open.len(), open);
                }
                self.status = DraftStatus::Completed;
            }
            StreamEvent::SessionFailed { reason, .. } => {
                self.status = DraftStatus::Failed(*reason);
            }
            StreamEvent::SessionStarted { .. } | StreamEvent::KnowledgeMatched { .. } => {}
        }

        Ok(())
    }

    pub fn status(&self) -> DraftStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == DraftStatus::Completed
    }

    /// Number of files that received their final content.
    pub fn completed_files(&self) -> usize {
        self.files
            .values()
            .filter(|f| f.state == FileState::Completed)
            .count()
    }

    /// Paths that were started but not completed.
    pub fn open_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, f)| f.state == FileState::Open)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Current content of a path.
    pub fn content(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.content.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Frozen copy of the draft. Marked incomplete unless the session completed.
    pub fn snapshot(&self) -> AssembledProject {
        let files = self
            .files
            .iter()
            .map(|(path, f)| (path.clone(), ProjectFile::new(f.content.clone(), f.language.clone())))
            .collect();

        AssembledProject {
            files,
            generated_at: Utc::now(),
            complete: self.is_complete(),
        }
    }
}
