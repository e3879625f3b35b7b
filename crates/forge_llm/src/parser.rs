//! Incremental parser turning model text into file events.
//!
//! Models are instructed to answer with blocks of the form
//!
//! ````text
//! ### FILE: src/App.jsx
//! ```jsx
//! ...content...
//! ```
//! ````
//!
//! Text arrives in arbitrary fragments. Complete lines are parsed as soon as
//! they are available; every content line becomes a `FileChunk`, and the
//! closing fence produces `FileCompleted` with the full content.

use forge_core::{language_for_path, StreamEvent};

#[derive(Debug)]
enum State {
    Outside,
    AwaitingFence { path: String },
    InFile {
        path: String,
        language: String,
        content: String,
    },
}

/// Line-oriented parser for `### FILE:` blocks.
#[derive(Debug)]
pub struct FileBlockParser {
    buffer: String,
    state: State,
    files: Vec<String>,
}

impl Default for FileBlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBlockParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: State::Outside,
            files: Vec::new(),
        }
    }

    /// Feed a text fragment, returning the events it completes.
    pub fn push(&mut self, text: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(text);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            self.parse_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flush the trailing partial line at end of input.
    ///
    /// A file still open at this point stays open; the caller decides
    /// whether the session can complete.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.parse_line(line.trim_end_matches('\r'), &mut events);
        }
        events
    }

    /// Complete a block left open at end of input with the content seen so far.
    pub fn close_open(&mut self) -> Option<StreamEvent> {
        match std::mem::replace(&mut self.state, State::Outside) {
            State::InFile {
                path,
                language,
                content,
            } => {
                self.record(&path);
                Some(StreamEvent::file_completed(path, content, language))
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Paths completed so far, each once, in order of last completion.
    pub fn completed_files(&self) -> &[String] {
        &self.files
    }

    fn record(&mut self, path: &str) {
        self.files.retain(|p| p != path);
        self.files.push(path.to_string());
    }

    /// Whether a file block is open.
    pub fn in_file(&self) -> bool {
        matches!(self.state, State::InFile { .. })
    }

    fn parse_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let state = std::mem::replace(&mut self.state, State::Outside);
        self.state = match state {
            State::Outside => match file_header(line) {
                Some(path) => State::AwaitingFence { path },
                None => State::Outside,
            },
            State::AwaitingFence { path } => {
                if let Some(next) = file_header(line) {
                    State::AwaitingFence { path: next }
                } else if let Some(info) = line.trim_start().strip_prefix("```") {
                    events.push(StreamEvent::file_started(path.clone()));
                    let language = match info.trim() {
                        "" => language_for_path(&path).to_string(),
                        tag => tag.to_ascii_lowercase(),
                    };
                    State::InFile {
                        path,
                        language,
                        content: String::new(),
                    }
                } else {
                    State::AwaitingFence { path }
                }
            }
            State::InFile {
                path,
                language,
                mut content,
            } => {
                if line.trim() == "```" {
                    events.push(StreamEvent::file_completed(
                        path.clone(),
                        content,
                        language,
                    ));
                    self.record(&path);
                    State::Outside
                } else {
                    let text = format!("{}\n", line);
                    content.push_str(&text);
                    events.push(StreamEvent::chunk(path.clone(), text));
                    State::InFile {
                        path,
                        language,
                        content,
                    }
                }
            }
        };
    }
}

/// Path named by a `### FILE:` header line.
fn file_header(line: &str) -> Option<String> {
    let rest = line.trim().trim_start_matches('#').trim_start();
    if !line.trim_start().starts_with('#') {
        return None;
    }
    let path = rest
        .strip_prefix("FILE:")
        .or_else(|| rest.strip_prefix("File:"))?
        .trim()
        .trim_matches(|c: char| c == '`' || c == '*')
        .trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}
