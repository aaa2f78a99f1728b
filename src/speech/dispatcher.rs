//! # Synthesis Dispatcher
//!
//! One dispatcher serves one response. Units are handed over as soon as the
//! segmenter produces them and never block the text stream; a single worker
//! synthesizes them in arrival order and queues each clip for playback.
//!
//! ## Ordering:
//! The worker synthesizes unit N+1 as soon as unit N's clip has been *queued*,
//! not played, so synthesis overlaps with playback while clips still play in
//! order through the voice session's single playback queue.
//!
//! ## Failure handling:
//! - **Empty units**: skipped silently
//! - **Voice not ready / NotConnected**: logged and counted, never an error
//! - **Synthesis error**: no further units are synthesized for this response;
//!   the error is returned by `finish` after already-queued clips settle
//! - **Playback error**: logged and counted; the rest of the response still plays

use crate::completion::SpeakableUnit;
use crate::error::ResponderError;
use crate::responder::ResponderMetrics;
use crate::speech::client::SpeechSynthesizer;
use crate::voice::session::{PlaybackTicket, VoiceSessionManager};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happened to one response's units.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub units_received: usize,
    pub clips_queued: usize,
    pub clips_played: usize,
    pub skipped_empty: usize,
    pub skipped_not_connected: usize,
    pub playback_failures: usize,
    /// First synthesis error, if any
    pub error: Option<ResponderError>,
}

pub struct SynthesisDispatcher {
    units: mpsc::UnboundedSender<SpeakableUnit>,
    worker: JoinHandle<DispatchOutcome>,
}

impl SynthesisDispatcher {
    /// Start the worker for one response.
    pub fn spawn(
        speech: Arc<dyn SpeechSynthesizer>,
        voice: VoiceSessionManager,
        metrics: Arc<ResponderMetrics>,
    ) -> Self {
        let (units, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(speech, voice, metrics, rx));
        Self { units, worker }
    }

    /// Hand over the next unit. Never waits.
    pub fn dispatch(&self, unit: SpeakableUnit) {
        // The worker only exits after the sender is dropped
        let _ = self.units.send(unit);
    }

    /// No more units: wait for synthesis and playback of everything queued.
    pub async fn finish(self) -> DispatchOutcome {
        drop(self.units);
        match self.worker.await {
            Ok(outcome) => outcome,
            Err(e) => DispatchOutcome {
                error: Some(ResponderError::PlaybackFailed(format!("dispatcher task failed: {}", e))),
                ..DispatchOutcome::default()
            },
        }
    }
}

async fn run(
    speech: Arc<dyn SpeechSynthesizer>,
    voice: VoiceSessionManager,
    metrics: Arc<ResponderMetrics>,
    mut units: mpsc::UnboundedReceiver<SpeakableUnit>,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    let mut tickets: Vec<(usize, PlaybackTicket)> = Vec::new();

    while let Some(unit) = units.recv().await {
        outcome.units_received += 1;

        if outcome.error.is_some() {
            debug!(unit_index = unit.index, "Dropping unit after synthesis failure");
            continue;
        }
        if unit.text.trim().is_empty() {
            outcome.skipped_empty += 1;
            continue;
        }
        if !voice.is_ready() {
            debug!(unit_index = unit.index, "Voice not connected, skipping synthesis");
            outcome.skipped_not_connected += 1;
            metrics.playback_short_circuits.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let clip = match speech.synthesize(&unit).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!(unit_index = unit.index, error = %e, "Speech synthesis failed");
                metrics.synthesis_failures.fetch_add(1, Ordering::Relaxed);
                outcome.error = Some(e);
                continue;
            }
        };

        match voice.enqueue_clip(clip) {
            Ok(ticket) => {
                outcome.clips_queued += 1;
                tickets.push((unit.index, ticket));
            }
            Err(e) => {
                debug!(unit_index = unit.index, error = %e, "Playback short-circuited");
                outcome.skipped_not_connected += 1;
                metrics.playback_short_circuits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    for (index, ticket) in tickets {
        match ticket.wait().await {
            Ok(()) => {
                outcome.clips_played += 1;
                metrics.clips_played.fetch_add(1, Ordering::Relaxed);
            }
            Err(ResponderError::NotConnected) => {
                debug!(unit_index = index, "Voice disconnected before clip played");
                outcome.skipped_not_connected += 1;
                metrics.playback_short_circuits.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(unit_index = index, error = %e, "Clip playback failed");
                outcome.playback_failures += 1;
                metrics.playback_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    outcome
}
