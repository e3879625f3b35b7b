//! Streaming LLM adapter.
//!
//! Supports the OpenAI and Anthropic streaming APIs. Response text is read
//! as server-sent events and fed through a [`FileBlockParser`], so files are
//! announced to the session as soon as the model starts writing them.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use forge_core::{GenerationConfig, GenerationRequest, ProviderKind, SessionMetadata, StreamEvent};

use crate::error::{LlmError, LlmResult};
use crate::parser::FileBlockParser;
use crate::provider::{EventStream, GenerationProvider};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Attempts to open a stream before giving up. Never applied mid-stream.
const MAX_CONNECT_ATTEMPTS: u32 = 3;

const SYSTEM_PROMPT: &str = "You are a senior software engineer generating complete, buildable \
project files. Follow the requested output format exactly and never omit file content.";

/// LLM provider backed by a streaming HTTP API.
pub struct LlmAdapter {
    provider: ProviderKind,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: Option<String>,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new adapter with explicit configuration.
    pub fn new(provider: ProviderKind, api_key: String, model: Option<String>) -> Self {
        let default_model = match provider {
            ProviderKind::OpenAI => "gpt-5-mini".to_string(),
            ProviderKind::Anthropic => "claude-sonnet-4.5".to_string(),
        };

        Self {
            provider,
            api_key,
            model: model.unwrap_or(default_model),
            max_tokens: 8192,
            base_url: None,
            client: reqwest::Client::new(),
        }
    }

    /// Create an adapter from whichever API key is set.
    ///
    /// Checks `OPENAI_API_KEY` first, then `ANTHROPIC_API_KEY`.
    pub fn from_env() -> LlmResult<Self> {
        let model = std::env::var("FORGE_LLM_MODEL").ok().filter(|m| !m.is_empty());

        for provider in [ProviderKind::OpenAI, ProviderKind::Anthropic] {
            if let Some(api_key) = api_key_for(provider) {
                return Ok(Self::new(provider, api_key, model));
            }
        }

        Err(LlmError::NotConfigured)
    }

    /// Create an adapter for the configured provider.
    pub fn from_config(config: &GenerationConfig) -> LlmResult<Self> {
        let api_key = api_key_for(config.provider).ok_or(LlmError::NotConfigured)?;
        Ok(Self::new(config.provider, api_key, config.model.clone())
            .with_max_tokens(config.max_tokens))
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the API endpoint, e.g. for a proxy.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str) -> reqwest::RequestBuilder {
        match self.provider {
            ProviderKind::OpenAI => {
                let body = OpenAIRequest {
                    model: self.model.clone(),
                    messages: vec![
                        OpenAIMessage {
                            role: "system".to_string(),
                            content: SYSTEM_PROMPT.to_string(),
                        },
                        OpenAIMessage {
                            role: "user".to_string(),
                            content: prompt.to_string(),
                        },
                    ],
                    max_completion_tokens: Some(self.max_tokens),
                    stream: true,
                    stream_options: OpenAIStreamOptions { include_usage: true },
                };
                self.client
                    .post(self.base_url.as_deref().unwrap_or(OPENAI_URL))
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&body)
            }
            ProviderKind::Anthropic => {
                let body = AnthropicRequest {
                    model: self.model.clone(),
                    max_tokens: self.max_tokens,
                    system: Some(SYSTEM_PROMPT.to_string()),
                    messages: vec![AnthropicMessage {
                        role: "user".to_string(),
                        content: prompt.to_string(),
                    }],
                    stream: true,
                };
                self.client
                    .post(self.base_url.as_deref().unwrap_or(ANTHROPIC_URL))
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("Content-Type", "application/json")
                    .json(&body)
            }
        }
    }

    /// Send the request, retrying connection errors, 429 and 5xx.
    async fn connect(&self, prompt: &str) -> LlmResult<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..MAX_CONNECT_ATTEMPTS {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }

            let response = match self.request(prompt).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Provider connection failed (attempt {}): {}", attempt + 1, e);
                    last_error = Some(LlmError::from(e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(LlmError::Provider {
                    status: status.as_u16(),
                    body,
                });
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Provider {
                    status: status.as_u16(),
                    body,
                });
            }
            return Ok(response);
        }

        Err(last_error.unwrap_or_else(|| LlmError::Transport("max retries exceeded".to_string())))
    }
}

#[async_trait]
impl GenerationProvider for LlmAdapter {
    fn name(&self) -> &str {
        match self.provider {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    async fn open(&self, request: &GenerationRequest) -> LlmResult<EventStream> {
        debug!(
            "Opening {} stream with model {} ({} prompt bytes)",
            self.name(),
            self.model,
            request.prompt.len()
        );
        let response = self.connect(&request.prompt).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(LlmError::from))
            .boxed();
        Ok(sse_events(body, self.provider, self.name().to_string()))
    }
}

fn api_key_for(provider: ProviderKind) -> Option<String> {
    let variable = match provider {
        ProviderKind::OpenAI => "OPENAI_API_KEY",
        ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
    };
    std::env::var(variable).ok().filter(|key| !key.is_empty())
}

/// Turn a raw server-sent-events body into session events.
pub(crate) fn sse_events(
    body: BoxStream<'static, LlmResult<Vec<u8>>>,
    dialect: ProviderKind,
    provider_name: String,
) -> EventStream {
    let state = SseState {
        body,
        dialect,
        provider_name,
        line: Vec::new(),
        parser: FileBlockParser::new(),
        pending: VecDeque::new(),
        tokens_used: 0,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.ingest(&bytes),
                Some(Err(e)) => state.fail(e),
                None => state.fail(LlmError::Transport(
                    "stream ended before the provider signalled completion".to_string(),
                )),
            }
        }
    })
    .boxed()
}

struct SseState {
    body: BoxStream<'static, LlmResult<Vec<u8>>>,
    dialect: ProviderKind,
    provider_name: String,
    line: Vec<u8>,
    parser: FileBlockParser,
    pending: VecDeque<LlmResult<StreamEvent>>,
    tokens_used: u64,
    done: bool,
}

impl SseState {
    fn ingest(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.done {
                return;
            }
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line);
                let line = String::from_utf8_lossy(&line);
                self.handle_line(line.trim_end_matches('\r'));
            } else {
                self.line.push(byte);
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }

        match self.dialect {
            ProviderKind::OpenAI => {
                if data == "[DONE]" {
                    self.complete();
                    return;
                }
                match serde_json::from_str::<OpenAIChunk>(data) {
                    Ok(chunk) => {
                        if let Some(usage) = chunk.usage {
                            self.tokens_used = usage.total_tokens;
                        }
                        let text: String = chunk
                            .choices
                            .into_iter()
                            .filter_map(|c| c.delta.content)
                            .collect();
                        self.text(&text);
                    }
                    Err(e) => debug!("Skipping unrecognised stream payload: {}", e),
                }
            }
            ProviderKind::Anthropic => match serde_json::from_str::<AnthropicEvent>(data) {
                Ok(AnthropicEvent::MessageStart { message }) => {
                    self.tokens_used += message.usage.input_tokens + message.usage.output_tokens;
                }
                Ok(AnthropicEvent::ContentBlockDelta { delta }) => {
                    if let Some(text) = delta.text {
                        self.text(&text);
                    }
                }
                Ok(AnthropicEvent::MessageDelta { usage }) => {
                    if let Some(usage) = usage {
                        self.tokens_used += usage.output_tokens;
                    }
                }
                Ok(AnthropicEvent::MessageStop) => self.complete(),
                Ok(AnthropicEvent::Error { error }) => {
                    self.fail(LlmError::Transport(error.message));
                }
                Ok(AnthropicEvent::Other) => {}
                Err(e) => debug!("Skipping unrecognised stream payload: {}", e),
            },
        }
    }

    fn text(&mut self, text: &str) {
        if !text.is_empty() {
            self.pending.extend(self.parser.push(text).into_iter().map(Ok));
        }
    }

    fn complete(&mut self) {
        self.pending.extend(self.parser.finish().into_iter().map(Ok));
        if let Some(event) = self.parser.close_open() {
            warn!("Model output ended inside a file block; closing it");
            self.pending.push_back(Ok(event));
        }
        self.pending.push_back(Ok(StreamEvent::SessionCompleted {
            files: self.parser.completed_files().to_vec(),
            metadata: SessionMetadata {
                provider: self.provider_name.clone(),
                tokens_used: self.tokens_used,
            },
        }));
        self.done = true;
    }

    fn fail(&mut self, error: LlmError) {
        self.pending.push_back(Err(error));
        self.done = true;
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    stream: bool,
    stream_options: OpenAIStreamOptions,
}

#[derive(Debug, Serialize)]
struct OpenAIStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChunk {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    delta: OpenAIDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    MessageStart { message: AnthropicMessageStart },
    ContentBlockDelta { delta: AnthropicDelta },
    MessageDelta { usage: Option<AnthropicOutputUsage> },
    MessageStop,
    Error { error: AnthropicApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageStart {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicOutputUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> BoxStream<'static, LlmResult<Vec<u8>>> {
        let parts: Vec<LlmResult<Vec<u8>>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(parts).boxed()
    }

    fn openai_delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    #[tokio::test]
    async fn test_openai_stream_to_events() {
        let usage = "data: {\"choices\":[],\"usage\":{\"total_tokens\":120}}\n\n";
        let parts = vec![
            openai_delta("### FILE: a.js\n```js\n"),
            openai_delta("const x=1;\n"),
            openai_delta("```\n"),
            usage.to_string(),
            "data: [DONE]\n\n".to_string(),
        ];
        let parts: Vec<&str> = parts.iter().map(|s| s.as_str()).collect();

        let events: Vec<StreamEvent> = sse_events(body(&parts), ProviderKind::OpenAI, "openai".into())
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], StreamEvent::file_started("a.js"));
        assert_eq!(events[1], StreamEvent::chunk("a.js", "const x=1;\n"));
        assert_eq!(
            events[3],
            StreamEvent::SessionCompleted {
                files: vec!["a.js".to_string()],
                metadata: SessionMetadata {
                    provider: "openai".to_string(),
                    tokens_used: 120,
                },
            }
        );
    }

    #[tokio::test]
    async fn test_sse_lines_split_across_chunks() {
        let payload = openai_delta("### FILE: b.py\n```\nprint(1)\n```\n");
        let (head, tail) = payload.split_at(17);
        let events: Vec<LlmResult<StreamEvent>> = sse_events(
            body(&[head, tail, "data: [DONE]\n"]),
            ProviderKind::OpenAI,
            "openai".into(),
        )
        .collect()
        .await;

        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.is_ok()));
    }

    #[tokio::test]
    async fn test_early_end_is_transport_failure() {
        let parts = [openai_delta("### FILE: a.js\n```js\nconst")];
        let events: Vec<LlmResult<StreamEvent>> = sse_events(
            body(&[parts[0].as_str()]),
            ProviderKind::OpenAI,
            "openai".into(),
        )
        .collect()
        .await;

        assert!(matches!(events.last(), Some(Err(LlmError::Transport(_)))));
    }

    #[tokio::test]
    async fn test_anthropic_stream_to_events() {
        let parts = [
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":0}\n\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"### FILE: x.ts\\n```ts\\nexport {};\\n\"}}\n\n",
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":20}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        ];
        let events: Vec<StreamEvent> =
            sse_events(body(&parts), ProviderKind::Anthropic, "anthropic".into())
                .map(|e| e.unwrap())
                .collect()
                .await;

        // The unterminated block is closed at message_stop.
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[2],
            StreamEvent::file_completed("x.ts", "export {};\n", "ts")
        );
        assert!(matches!(
            &events[3],
            StreamEvent::SessionCompleted { metadata, .. } if metadata.tokens_used == 31
        ));
    }

    #[test]
    fn test_default_models() {
        let openai = LlmAdapter::new(ProviderKind::OpenAI, "key".to_string(), None);
        assert_eq!(openai.model(), "gpt-5-mini");
        assert_eq!(openai.name(), "openai");

        let anthropic = LlmAdapter::new(ProviderKind::Anthropic, "key".to_string(), None);
        assert_eq!(anthropic.model(), "claude-sonnet-4.5");
    }

    #[test]
    fn test_custom_model() {
        let adapter = LlmAdapter::new(
            ProviderKind::OpenAI,
            "key".to_string(),
            Some("gpt-4o".to_string()),
        );
        assert_eq!(adapter.model(), "gpt-4o");
    }
}
