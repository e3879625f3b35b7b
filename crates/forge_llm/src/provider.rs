//! Generation provider contract.

use async_trait::async_trait;
use futures::stream::BoxStream;

use forge_core::{GenerationRequest, StreamEvent};

use crate::error::LlmResult;

/// Events produced by a provider for one session.
///
/// Providers emit file events followed by `SessionCompleted`. An `Err` item
/// or an early end of the stream is a transport failure.
pub type EventStream = BoxStream<'static, LlmResult<StreamEvent>>;

/// A remote code generation service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name reported in session metadata.
    fn name(&self) -> &str;

    /// Open a streamed session for a request.
    async fn open(&self, request: &GenerationRequest) -> LlmResult<EventStream>;
}
