//! Classification of build output into diagnostics.
//!
//! Each non-blank line becomes one [`Diagnostic`]. Rules, first match wins:
//!
//! 1. every stderr line classifies as error
//! 2. failure keywords (`error`, `failed`, `not found`, ...) classify as error;
//!    counters such as `0 errors` are ignored
//! 3. warning keywords classify as warning
//! 4. everything else is info
//!
//! File references (`src/a.ts:3:7`, `File "app.py", line 4`, `--> src/main.rs:2:5`,
//! `src/a.ts(3,7)`) are attached as the diagnostic's source location.

use regex::Regex;

use forge_core::{Diagnostic, Severity, SourceLocation};

use crate::error::RunnerResult;
use crate::executor::ExecutionOutput;

/// Output channel a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

pub struct DiagnosticClassifier {
    ansi: Regex,
    benign: Regex,
    error: Regex,
    warning: Regex,
    python_location: Regex,
    rust_location: Regex,
    paren_location: Regex,
    colon_location: Regex,
}

impl DiagnosticClassifier {
    pub fn new() -> RunnerResult<Self> {
        Ok(Self {
            ansi: Regex::new(r"\x1b\[[0-9;]*[A-Za-z]")?,
            benign: Regex::new(r"(?i)\b(?:0|no)\s+(?:errors?|warnings?|failures?|failed)\b")?,
            error: Regex::new(
                r"(?i)\b(?:errors?|failed|failure|fatal|exception|traceback|panicked|cannot find|not found|unresolved)\b|npm ERR!",
            )?,
            warning: Regex::new(r"(?i)\b(?:warnings?|warn|deprecated)\b")?,
            python_location: Regex::new(r#"File "([^"]+)", line (\d+)"#)?,
            rust_location: Regex::new(r"-->\s*([^\s:]+):(\d+):(\d+)")?,
            paren_location: Regex::new(r"([\w./@-]+\.[A-Za-z0-9]+)\((\d+),(\d+)\)")?,
            colon_location: Regex::new(r"([\w./@-]*[A-Za-z_][\w./@-]*\.[A-Za-z]\w*):(\d+)(?::(\d+))?")?,
        })
    }

    /// Classify one line. Blank lines yield `None`.
    pub fn classify_line(&self, line: &str, stream: OutputStream) -> Option<Diagnostic> {
        let clean = self.ansi.replace_all(line, "");
        let message = clean.trim();
        if message.is_empty() {
            return None;
        }

        let scrubbed = self.benign.replace_all(message, "");
        let severity = if stream == OutputStream::Stderr || self.error.is_match(&scrubbed) {
            Severity::Error
        } else if self.warning.is_match(&scrubbed) {
            Severity::Warning
        } else {
            Severity::Info
        };

        Some(Diagnostic {
            severity,
            message: message.to_string(),
            source_line: self.locate(message),
        })
    }

    /// Classify captured output, stdout lines before stderr lines.
    pub fn classify(&self, output: &ExecutionOutput) -> Vec<Diagnostic> {
        let stdout = output
            .stdout
            .lines()
            .filter_map(|line| self.classify_line(line, OutputStream::Stdout));
        let stderr = output
            .stderr
            .lines()
            .filter_map(|line| self.classify_line(line, OutputStream::Stderr));
        stdout.chain(stderr).collect()
    }

    /// Source location referenced by a line, if any.
    pub fn locate(&self, line: &str) -> Option<SourceLocation> {
        if let Some(c) = self.python_location.captures(line) {
            return Some(SourceLocation {
                path: c[1].to_string(),
                line: c[2].parse().ok(),
                column: None,
            });
        }
        for pattern in [&self.rust_location, &self.paren_location, &self.colon_location] {
            if let Some(c) = pattern.captures(line) {
                return Some(SourceLocation {
                    path: c[1].trim_start_matches("./").to_string(),
                    line: c[2].parse().ok(),
                    column: c.get(3).and_then(|m| m.as_str().parse().ok()),
                });
            }
        }
        None
    }
}
