//! Scripted provider for testing without a remote model.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use forge_core::{language_for_path, GenerationRequest, SessionMetadata, StreamEvent};

use crate::error::{LlmError, LlmResult};
use crate::provider::{EventStream, GenerationProvider};

/// One step of a scripted session.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield an event.
    Event(StreamEvent),
    /// Wait before the next step.
    Delay(Duration),
    /// Yield a transport error.
    Fail(String),
    /// Never yield again.
    Hang,
}

impl ScriptStep {
    /// Steps streaming one file as start, one chunk per line, completion.
    pub fn file(path: &str, content: &str) -> Vec<ScriptStep> {
        let mut steps = vec![ScriptStep::Event(StreamEvent::file_started(path))];
        steps.extend(
            content
                .split_inclusive('\n')
                .map(|line| ScriptStep::Event(StreamEvent::chunk(path, line))),
        );
        steps.push(ScriptStep::Event(StreamEvent::file_completed(
            path,
            content,
            language_for_path(path),
        )));
        steps
    }

    /// Terminal `SessionCompleted` step.
    pub fn completed(files: &[&str]) -> ScriptStep {
        ScriptStep::Event(StreamEvent::SessionCompleted {
            files: files.iter().map(|f| f.to_string()).collect(),
            metadata: SessionMetadata {
                provider: "scripted".to_string(),
                tokens_used: 0,
            },
        })
    }
}

/// Provider replaying scripted sessions.
///
/// Each `open` consumes the next script; the last script is replayed once
/// the queue runs dry. Every request is captured for inspection.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    last: Mutex<Vec<ScriptStep>>,
    requests: Mutex<Vec<GenerationRequest>>,
    open_error: Mutex<Option<String>>,
}

impl ScriptedProvider {
    /// Provider replaying the same script for every session.
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self::sessions(vec![steps])
    }

    /// Provider replaying one script per session, in order.
    pub fn sessions(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            last: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            open_error: Mutex::new(None),
        }
    }

    /// Provider streaming the given events, then `SessionCompleted`.
    pub fn completing(events: Vec<StreamEvent>) -> Self {
        let files: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::FileCompleted { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect();
        let mut steps: Vec<ScriptStep> = events.into_iter().map(ScriptStep::Event).collect();
        let files: Vec<&str> = files.iter().map(|f| f.as_str()).collect();
        steps.push(ScriptStep::completed(&files));
        Self::new(steps)
    }

    /// Make every subsequent `open` fail.
    pub fn fail_open(self, message: impl Into<String>) -> Self {
        *self.open_error.lock() = Some(message.into());
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn session_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_script(&self) -> Vec<ScriptStep> {
        let mut scripts = self.scripts.lock();
        let mut last = self.last.lock();
        if let Some(script) = scripts.pop_front() {
            *last = script.clone();
            script
        } else {
            last.clone()
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: &GenerationRequest) -> LlmResult<EventStream> {
        self.requests.lock().push(request.clone());
        if let Some(message) = self.open_error.lock().clone() {
            return Err(LlmError::Transport(message));
        }

        let steps: VecDeque<ScriptStep> = self.next_script().into();
        let stream = stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    ScriptStep::Event(event) => return Some((Ok(event), steps)),
                    ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Fail(message) => {
                        return Some((Err(LlmError::Transport(message)), steps))
                    }
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        });
        Ok(stream.boxed())
    }
}
