//! # Completion Service Client
//!
//! Talks to an Anthropic-compatible Messages API.
//!
//! ## Streaming protocol:
//! With `stream: true` the service answers with Server-Sent Events:
//!
//! ```text
//! message_start → content_block_start → content_block_delta* → content_block_stop
//!              → message_delta → message_stop
//! ```
//!
//! Only `text_delta` payloads of `content_block_delta` events carry response text.
//! `message_stop` (or the end of the body) finishes the stream.
//!
//! ## Error Handling:
//! Transport failures, non-2xx statuses and in-stream `error` events all become
//! `ResponderError::UpstreamError`. Nothing is retried here.

use crate::completion::sse::{SseEvent, SseParser};
use crate::config::CompletionConfig;
use crate::error::{ResponderError, ResponderResult};
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error};

/// One role/content pair in the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Everything needed for one completion request besides model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

/// Items yielded by a completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    /// A fragment of response text, in order
    TextDelta(String),
    /// The service finished the response
    StreamEnd,
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = ResponderResult<CompletionEvent>> + Send>>;

/// Seam between the responder and the remote completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Open a streaming request.
    async fn stream(&self, request: CompletionRequest) -> ResponderResult<CompletionStream>;

    /// Non-streaming request returning the concatenated text content.
    async fn complete(&self, request: CompletionRequest) -> ResponderResult<String>;
}

/// Messages API client built on `reqwest`.
pub struct AnthropicClient {
    http: reqwest::Client,
    config: CompletionConfig,
}

impl AnthropicClient {
    pub fn new(config: CompletionConfig) -> ResponderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": request.system,
            "messages": request.messages,
            "stream": stream,
        })
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> ResponderResult<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let accept = if stream { "text/event-stream" } else { "application/json" };

        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            stream,
            "Sending completion request"
        );

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("accept", accept)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Completion request failed");
                ResponderError::UpstreamError(format!("completion request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Completion service returned an error");
            return Err(ResponderError::UpstreamError(format!(
                "completion service returned {}: {}",
                status,
                error_message(&body)
            )));
        }

        Ok(response)
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Translate one SSE event into at most one completion event.
fn parse_stream_event(event: &SseEvent) -> Option<ResponderResult<CompletionEvent>> {
    let payload: Value = serde_json::from_str(&event.data).ok()?;
    let kind = event
        .event_type
        .as_deref()
        .or_else(|| payload["type"].as_str())
        .unwrap_or_default();

    match kind {
        "content_block_delta" => {
            let delta = &payload["delta"];
            if delta["type"] == "text_delta" {
                delta["text"]
                    .as_str()
                    .map(|text| Ok(CompletionEvent::TextDelta(text.to_string())))
            } else {
                None
            }
        }
        "message_stop" => Some(Ok(CompletionEvent::StreamEnd)),
        "error" => {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown stream error")
                .to_string();
            Some(Err(ResponderError::UpstreamError(message)))
        }
        _ => None,
    }
}

struct StreamState<S> {
    bytes: S,
    parser: SseParser,
    queued: VecDeque<ResponderResult<CompletionEvent>>,
    finished: bool,
}

#[async_trait]
impl CompletionService for AnthropicClient {
    async fn stream(&self, request: CompletionRequest) -> ResponderResult<CompletionStream> {
        let response = self.send(&request, true).await?;

        let state = StreamState {
            bytes: Box::pin(response.bytes_stream()),
            parser: SseParser::new(),
            queued: VecDeque::new(),
            finished: false,
        };

        let events = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.queued.pop_front() {
                    // Nothing follows the end of the message or an error
                    if matches!(item, Ok(CompletionEvent::StreamEnd) | Err(_)) {
                        state.finished = true;
                        state.queued.clear();
                    }
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for event in state.parser.push(&chunk) {
                            state.queued.extend(parse_stream_event(&event));
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Completion stream read failed");
                        state
                            .queued
                            .push_back(Err(ResponderError::UpstreamError(format!("stream read error: {}", e))));
                    }
                    None => {
                        if let Some(event) = state.parser.flush() {
                            state.queued.extend(parse_stream_event(&event));
                        }
                        // A body that ends without message_stop still ends the response
                        state.queued.push_back(Ok(CompletionEvent::StreamEnd));
                    }
                }
            }
        });

        Ok(Box::pin(events))
    }

    async fn complete(&self, request: CompletionRequest) -> ResponderResult<String> {
        let response = self.send(&request, false).await?;
        let payload: Value = response.json().await?;

        let text: String = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block["type"] == "text")
                    .filter_map(|block| block["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ResponderError::UpstreamEmpty(
                "completion response contained no text".to_string(),
            ));
        }
        Ok(text)
    }
}
