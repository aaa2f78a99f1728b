//! # Responder
//!
//! Turns one `InboundEvent` into spoken audio.
//!
//! ## Flow for one event:
//! 1. Build the request: system profile, recent memory, optional context
//!    message rendered from the event's template, then the event's own text
//! 2. Stream the completion; every delta goes through the segmenter
//! 3. Each finished unit is handed to a `SynthesisDispatcher` immediately
//! 4. When the stream ends, the remainder becomes the last unit and the
//!    dispatcher is drained
//! 5. Only a fully successful exchange is written to memory (two entries)
//!
//! Requests are never retried here. A failure part-way through leaves whatever
//! audio already played; nothing is rolled back.

use crate::completion::{ChatMessage, CompletionEvent, CompletionRequest, CompletionService, PromptLibrary, Segmenter};
use crate::config::InputFormat;
use crate::error::{ResponderError, ResponderResult};
use crate::events::InboundEvent;
use crate::memory::{ConversationEntry, MemoryStore, Role};
use crate::speech::{SpeechSynthesizer, SynthesisDispatcher};
use crate::voice::VoiceSessionManager;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Pipeline counters, updated lock-free from any task.
#[derive(Debug, Default)]
pub struct ResponderMetrics {
    pub events_received: AtomicU64,
    pub responses_completed: AtomicU64,
    pub responses_failed: AtomicU64,
    pub units_emitted: AtomicU64,
    pub clips_played: AtomicU64,
    pub playback_short_circuits: AtomicU64,
    pub playback_failures: AtomicU64,
    pub synthesis_failures: AtomicU64,
}

/// Point-in-time copy of `ResponderMetrics` plus the playback queue depth.
#[derive(Debug, Clone, Serialize)]
pub struct ResponderMetricsSnapshot {
    pub events_received: u64,
    pub responses_completed: u64,
    pub responses_failed: u64,
    pub units_emitted: u64,
    pub clips_played: u64,
    pub playback_short_circuits: u64,
    pub playback_failures: u64,
    pub synthesis_failures: u64,
    pub pending_playback: usize,
}

/// Result of one spoken response.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSummary {
    pub text: String,
    pub units: usize,
    pub clips_played: usize,
    pub skipped_not_connected: usize,
}

pub struct Responder {
    completion: Arc<dyn CompletionService>,
    speech: Arc<dyn SpeechSynthesizer>,
    voice: VoiceSessionManager,
    memory: Arc<MemoryStore>,
    prompts: PromptLibrary,
    format: InputFormat,
    persona: String,
    metrics: Arc<ResponderMetrics>,
}

impl Responder {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        speech: Arc<dyn SpeechSynthesizer>,
        voice: VoiceSessionManager,
        memory: Arc<MemoryStore>,
        prompts: PromptLibrary,
        format: InputFormat,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            completion,
            speech,
            voice,
            memory,
            prompts,
            format,
            persona: persona.into(),
            metrics: Arc::new(ResponderMetrics::default()),
        }
    }

    pub fn voice(&self) -> &VoiceSessionManager {
        &self.voice
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn speech(&self) -> &Arc<dyn SpeechSynthesizer> {
        &self.speech
    }

    pub fn metrics(&self) -> ResponderMetricsSnapshot {
        let m = &self.metrics;
        ResponderMetricsSnapshot {
            events_received: m.events_received.load(Ordering::Relaxed),
            responses_completed: m.responses_completed.load(Ordering::Relaxed),
            responses_failed: m.responses_failed.load(Ordering::Relaxed),
            units_emitted: m.units_emitted.load(Ordering::Relaxed),
            clips_played: m.clips_played.load(Ordering::Relaxed),
            playback_short_circuits: m.playback_short_circuits.load(Ordering::Relaxed),
            playback_failures: m.playback_failures.load(Ordering::Relaxed),
            synthesis_failures: m.synthesis_failures.load(Ordering::Relaxed),
            pending_playback: self.voice.status().pending_playback,
        }
    }

    /// Assemble the completion request for an event.
    fn build_request(&self, event: &InboundEvent) -> ResponderResult<CompletionRequest> {
        let profile = self.format.system_profile();
        let system = self
            .prompts
            .system_prompt(profile)
            .ok_or_else(|| ResponderError::UpstreamEmpty(format!("no system prompt for profile '{}'", profile)))?
            .to_string();

        let mut messages: Vec<ChatMessage> = self
            .memory
            .recent()
            .into_iter()
            .map(|entry| match entry.role {
                Role::User => ChatMessage::user(entry.content),
                Role::Assistant => ChatMessage::assistant(entry.content),
            })
            .collect();

        if let Some(template) = event.template_name() {
            match self.prompts.render_context(template, &event.template_data()) {
                Some(context) if !context.trim().is_empty() => messages.push(ChatMessage::user(context)),
                Some(_) => {}
                None => warn!(template, "No context template found, sending event without context"),
            }
        }

        if let Some(text) = event.inbound_text() {
            messages.push(ChatMessage::user(text));
        }

        if messages.is_empty() {
            return Err(ResponderError::UpstreamEmpty(
                "no messages to send to the completion service".to_string(),
            ));
        }

        Ok(CompletionRequest { system, messages })
    }

    fn remember(&self, event: &InboundEvent, response: &str) {
        self.memory.append(ConversationEntry::new(
            Role::User,
            event.speaker(),
            event.memory_text(),
            event.timestamp(),
        ));
        self.memory.append(ConversationEntry::new(
            Role::Assistant,
            self.persona.as_str(),
            response,
            Utc::now(),
        ));
    }

    fn record<T>(&self, result: &ResponderResult<T>) {
        let counter = match result {
            Ok(_) => &self.metrics.responses_completed,
            Err(_) => &self.metrics.responses_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Stream a response for `event` and speak it as it arrives.
    pub async fn respond(&self, event: &InboundEvent) -> ResponderResult<ResponseSummary> {
        event.validate()?;
        self.metrics.events_received.fetch_add(1, Ordering::Relaxed);

        let span = tracing::info_span!("respond", event_kind = event.kind());
        let result = self.stream_and_speak(event).instrument(span).await;
        self.record(&result);
        result
    }

    async fn stream_and_speak(&self, event: &InboundEvent) -> ResponderResult<ResponseSummary> {
        let started = Instant::now();
        let request = self.build_request(event)?;
        debug!(messages = request.messages.len(), "Opening completion stream");
        let mut stream = self.completion.stream(request).await?;

        let dispatcher = SynthesisDispatcher::spawn(self.speech.clone(), self.voice.clone(), self.metrics.clone());
        let mut segmenter = Segmenter::new(self.format);
        let mut text = String::new();
        let mut units = 0;
        let mut stream_error = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(CompletionEvent::TextDelta(delta)) => {
                    text.push_str(&delta);
                    for unit in segmenter.push(&delta) {
                        debug!(unit_index = unit.index, "Speakable unit ready");
                        units += 1;
                        dispatcher.dispatch(unit);
                    }
                }
                Ok(CompletionEvent::StreamEnd) => break,
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            }
        }

        if stream_error.is_none() {
            if let Some(unit) = segmenter.finish() {
                units += 1;
                dispatcher.dispatch(unit);
            }
        }
        self.metrics.units_emitted.fetch_add(units as u64, Ordering::Relaxed);

        // Whatever was already handed over still plays out
        let outcome = dispatcher.finish().await;
        debug!(
            units_received = outcome.units_received,
            clips_queued = outcome.clips_queued,
            clips_played = outcome.clips_played,
            skipped_empty = outcome.skipped_empty,
            playback_failures = outcome.playback_failures,
            "Dispatcher drained"
        );

        if let Some(e) = stream_error {
            warn!(error = %e, "Completion stream failed");
            return Err(e);
        }
        if let Some(e) = outcome.error {
            return Err(e);
        }
        if text.trim().is_empty() {
            return Err(ResponderError::UpstreamEmpty(
                "completion stream produced no text".to_string(),
            ));
        }

        self.remember(event, &text);
        info!(
            units,
            clips_played = outcome.clips_played,
            duration_ms = started.elapsed().as_millis() as u64,
            "Response complete"
        );

        Ok(ResponseSummary {
            text,
            units,
            clips_played: outcome.clips_played,
            skipped_not_connected: outcome.skipped_not_connected,
        })
    }

    /// Generate a response without speaking it.
    pub async fn respond_text_only(&self, event: &InboundEvent) -> ResponderResult<String> {
        event.validate()?;
        self.metrics.events_received.fetch_add(1, Ordering::Relaxed);

        let result = async {
            let request = self.build_request(event)?;
            let text = self.completion.complete(request).await?;
            self.remember(event, &text);
            Ok(text)
        }
        .instrument(tracing::info_span!("respond_text_only", event_kind = event.kind()))
        .await;

        self.record(&result);
        result
    }
}
