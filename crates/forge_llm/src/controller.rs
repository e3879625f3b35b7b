//! Session control for streamed generation.
//!
//! The controller owns at most one live session. Each session runs in its
//! own task that pulls events from the provider and forwards them, in order,
//! over a channel to the [`SessionHandle`]. The task guarantees that the
//! handle observes exactly one terminal event:
//!
//! - `SessionCompleted` forwarded from the provider
//! - `SessionFailed { reason: transport }` on a provider error or early end
//! - `SessionFailed { reason: timeout }` when no event arrives within the idle window
//! - `SessionFailed { reason: cancelled }` after [`SessionHandle::cancel`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use forge_core::{FailureReason, GenerationRequest, StreamEvent};

use crate::error::{LlmError, LlmResult};
use crate::provider::{EventStream, GenerationProvider};

/// Events buffered between the session task and its consumer.
const EVENT_BUFFER: usize = 256;

/// Default idle window between two events.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Starts and cancels generation sessions, one at a time.
pub struct GenerationStreamController {
    provider: Arc<dyn GenerationProvider>,
    idle_timeout: Duration,
    active: Arc<AtomicBool>,
}

impl GenerationStreamController {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            provider,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Whether a session is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a session.
    ///
    /// Fails with [`LlmError::ConcurrentSession`] while another session of
    /// this controller has not yet produced its terminal event.
    pub fn start(&self, request: GenerationRequest) -> LlmResult<SessionHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LlmError::ConcurrentSession);
        }

        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let task = SessionTask {
            session_id: session_id.clone(),
            provider: Arc::clone(&self.provider),
            idle_timeout: self.idle_timeout,
            cancel: cancel.clone(),
            tx,
            slot: ActiveSlot(Some(Arc::clone(&self.active))),
        };
        let span = tracing::info_span!("session", session_id = %session_id);
        tokio::spawn(task.run(request).instrument(span));

        Ok(SessionHandle {
            session_id,
            events: rx,
            cancel,
            finished: false,
        })
    }

    /// Cancel a session. Equivalent to [`SessionHandle::cancel`].
    pub fn cancel(&self, handle: &SessionHandle) {
        handle.cancel();
    }
}

/// Consumer side of a running session.
///
/// Dropping the handle cancels the session.
pub struct SessionHandle {
    session_id: String,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event, or `None` once the terminal event has been returned.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await;
        match &event {
            Some(e) if e.is_terminal() => self.finished = true,
            None => self.finished = true,
            _ => {}
        }
        event
    }

    /// Stop consuming the remote stream. The session ends with a single
    /// `SessionFailed { reason: cancelled }` unless it already ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by the session task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Marks the controller busy until released or dropped.
struct ActiveSlot(Option<Arc<AtomicBool>>);

impl ActiveSlot {
    fn release(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.store(false, Ordering::Release);
        }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.release();
    }
}

enum Next {
    Event(StreamEvent),
    Failed(FailureReason, String),
}

struct SessionTask {
    session_id: String,
    provider: Arc<dyn GenerationProvider>,
    idle_timeout: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamEvent>,
    slot: ActiveSlot,
}

impl SessionTask {
    async fn run(mut self, request: GenerationRequest) {
        info!("Generation session started ({})", self.provider.name());

        let opening = [
            StreamEvent::SessionStarted {
                session_id: self.session_id.clone(),
            },
            StreamEvent::KnowledgeMatched {
                count: request.knowledge_context.len(),
                top_match: request
                    .knowledge_context
                    .first()
                    .map(|entry| entry.description.clone()),
            },
        ];
        for event in opening {
            if self.tx.send(event).await.is_err() {
                return;
            }
        }

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err((FailureReason::Cancelled, "cancelled".to_string())),
            result = tokio::time::timeout(self.idle_timeout, self.provider.open(&request)) => match result {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err((FailureReason::Transport, e.to_string())),
                Err(_) => Err((FailureReason::Timeout, "provider did not respond".to_string())),
            },
        };

        let terminal = match opened {
            Ok(stream) => self.pump(stream).await,
            Err((reason, message)) => Some(StreamEvent::failed(reason, Some(message))),
        };

        if let Some(event) = terminal {
            self.finish(event).await;
        }
    }

    /// Forward provider events until a terminal condition. Returns the
    /// terminal event still to be delivered, if any.
    async fn pump(&mut self, mut stream: EventStream) -> Option<StreamEvent> {
        let mut forwarded = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Next::Failed(FailureReason::Cancelled, "cancelled".into()),
                item = tokio::time::timeout(self.idle_timeout, stream.next()) => match item {
                    Ok(Some(Ok(event))) => Next::Event(event),
                    Ok(Some(Err(e))) => Next::Failed(FailureReason::Transport, e.to_string()),
                    Ok(None) => Next::Failed(
                        FailureReason::Transport,
                        "provider stream ended without completing".into(),
                    ),
                    Err(_) => Next::Failed(
                        FailureReason::Timeout,
                        format!("no event within {:?}", self.idle_timeout),
                    ),
                },
            };

            match next {
                Next::Event(event) if event.is_terminal() => {
                    debug!("Forwarded {} events before terminal", forwarded);
                    return Some(event);
                }
                Next::Event(event @ (StreamEvent::SessionStarted { .. } | StreamEvent::KnowledgeMatched { .. })) => {
                    debug!("Ignoring provider {} event", event.name());
                }
                Next::Event(event) => {
                    if self.tx.send(event).await.is_err() {
                        // Consumer dropped the handle.
                        return None;
                    }
                    forwarded += 1;
                }
                Next::Failed(reason, message) => {
                    return Some(StreamEvent::failed(reason, Some(message)));
                }
            }
        }
    }

    /// Release the controller and deliver the terminal event.
    async fn finish(&mut self, event: StreamEvent) {
        match &event {
            StreamEvent::SessionFailed { reason, message } => warn!(
                "Generation session failed ({}): {}",
                reason,
                message.as_deref().unwrap_or("")
            ),
            _ => info!("Generation session completed"),
        }
        // Released before delivery so the consumer can start the next session
        // as soon as it observes the terminal event.
        self.slot.release();
        let _ = self.tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptStep, ScriptedProvider};
    use forge_core::{GenerationKind, GenerationOptions, KnowledgeEntry, RequestKind};

    fn request() -> GenerationRequest {
        GenerationRequest {
            kind: RequestKind::Initial,
            generation_kind: GenerationKind::Component,
            target_spec: "a button".to_string(),
            component_hint: None,
            options: GenerationOptions::default(),
            knowledge_context: vec![KnowledgeEntry::new("k1", "component", "primary button")],
            repair_context: None,
            prompt: "a button".to_string(),
        }
    }

    async fn drain(handle: &mut SessionHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_session_opening_events() {
        let provider = Arc::new(ScriptedProvider::completing(vec![]));
        let controller = GenerationStreamController::new(provider);
        let mut handle = controller.start(request()).unwrap();

        let events = drain(&mut handle).await;
        assert!(matches!(events[0], StreamEvent::SessionStarted { .. }));
        assert_eq!(
            events[1],
            StreamEvent::KnowledgeMatched {
                count: 1,
                top_match: Some("primary button".to_string()),
            }
        );
        assert!(matches!(events[2], StreamEvent::SessionCompleted { .. }));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_active() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::Hang]));
        let controller = GenerationStreamController::new(provider);
        let _first = controller.start(request()).unwrap();

        assert!(matches!(
            controller.start(request()),
            Err(LlmError::ConcurrentSession)
        ));
    }

    #[tokio::test]
    async fn test_start_allowed_after_terminal_event() {
        let provider = Arc::new(ScriptedProvider::completing(vec![]));
        let controller = GenerationStreamController::new(provider);

        let mut first = controller.start(request()).unwrap();
        drain(&mut first).await;
        let mut second = controller.start(request()).unwrap();
        drain(&mut second).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fails_session() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::Event(StreamEvent::file_started("a.js")),
            ScriptStep::Hang,
        ]));
        let controller = GenerationStreamController::new(provider)
            .with_idle_timeout(Duration::from_secs(5));
        let mut handle = controller.start(request()).unwrap();

        let events = drain(&mut handle).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::SessionFailed { reason: FailureReason::Timeout, .. })
        ));
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn test_transport_error_fails_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::Event(StreamEvent::file_started("a.js")),
            ScriptStep::Fail("connection reset".to_string()),
            ScriptStep::Event(StreamEvent::chunk("a.js", "never")),
        ]));
        let controller = GenerationStreamController::new(provider);
        let mut handle = controller.start(request()).unwrap();

        let events = drain(&mut handle).await;
        let failures = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(failures, 1);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::SessionFailed { reason: FailureReason::Transport, .. })
        ));
        assert!(!events.contains(&StreamEvent::chunk("a.js", "never")));
    }

    #[tokio::test]
    async fn test_cancel_emits_single_cancelled_event() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::Event(StreamEvent::file_started("a.js")),
            ScriptStep::Hang,
        ]));
        let controller = GenerationStreamController::new(provider);
        let mut handle = controller.start(request()).unwrap();

        // Wait until the file event arrives, then cancel twice.
        loop {
            if let Some(StreamEvent::FileStarted { .. }) = handle.next_event().await {
                break;
            }
        }
        controller.cancel(&handle);
        handle.cancel();

        let rest = drain(&mut handle).await;
        assert_eq!(
            rest,
            vec![StreamEvent::failed(FailureReason::Cancelled, Some("cancelled".to_string()))]
        );
    }
}
