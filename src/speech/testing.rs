//! Scripted speech synthesizer for tests.

use crate::audio::AudioClip;
use crate::completion::SpeakableUnit;
use crate::error::{ResponderError, ResponderResult};
use crate::speech::client::SpeechSynthesizer;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Returns one mono sample per character of the unit text, so clip sizes
/// identify which unit they came from.
#[derive(Default)]
pub struct FakeSpeech {
    pub fail_on_index: Option<usize>,
    pub delay: Duration,
    requests: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_on_index: Some(index),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, unit: &SpeakableUnit) -> ResponderResult<AudioClip> {
        self.requests.lock().unwrap().push(unit.text.clone());
        tokio::time::sleep(self.delay).await;
        if self.fail_on_index == Some(unit.index) {
            return Err(ResponderError::UpstreamError("synthesis quota exceeded".into()));
        }
        Ok(AudioClip {
            data: vec![0; unit.text.len() * 2],
            channels: 1,
            sample_rate: 48_000,
        })
    }
}
