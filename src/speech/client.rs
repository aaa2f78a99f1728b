//! # Speech Synthesis Client
//!
//! REST client for a Google Cloud Text-to-Speech compatible service.
//!
//! ## Request shape:
//! ```json
//! {
//!   "input": {"text": "..."},            // or {"ssml": "..."} for markup units
//!   "voice": {"languageCode": "en-US", "name": "en-US-Wavenet-C"},
//!   "audioConfig": {"audioEncoding": "LINEAR16", "sampleRateHertz": 48000,
//!                   "speakingRate": 1.0, "pitch": 0.0}
//! }
//! ```
//!
//! ## Response shape:
//! Either JSON with base64 `audioContent`, or the audio itself as a binary body.

use crate::audio::AudioClip;
use crate::completion::SpeakableUnit;
use crate::config::{InputFormat, SpeechConfig};
use crate::error::{ResponderError, ResponderResult};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error};

/// Seam between the dispatcher and the remote speech service.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize audio for one unit.
    async fn synthesize(&self, unit: &SpeakableUnit) -> ResponderResult<AudioClip>;

    /// Pick up runtime changes to voice settings.
    fn update_settings(&self, _config: &SpeechConfig) {}
}

pub struct GoogleSpeechClient {
    http: reqwest::Client,
    settings: RwLock<SpeechConfig>,
}

impl GoogleSpeechClient {
    pub fn new(config: SpeechConfig) -> ResponderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            settings: RwLock::new(config),
        })
    }

    fn settings(&self) -> SpeechConfig {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn body(settings: &SpeechConfig, unit: &SpeakableUnit) -> Value {
        let input = match unit.format {
            InputFormat::Plain => json!({ "text": unit.text }),
            InputFormat::Markup => json!({ "ssml": unit.text }),
        };
        json!({
            "input": input,
            "voice": {
                "languageCode": settings.language_code,
                "name": settings.voice_name,
            },
            "audioConfig": {
                "audioEncoding": settings.audio_encoding,
                "sampleRateHertz": settings.sample_rate_hz,
                "speakingRate": settings.speaking_rate,
                "pitch": settings.pitch,
            },
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleSpeechClient {
    async fn synthesize(&self, unit: &SpeakableUnit) -> ResponderResult<AudioClip> {
        let settings = self.settings();
        let url = format!("{}/v1/text:synthesize", settings.base_url.trim_end_matches('/'));

        debug!(unit_index = unit.index, chars = unit.text.len(), "Requesting speech synthesis");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &settings.api_key)
            .json(&Self::body(&settings, unit))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Speech service returned an error");
            return Err(ResponderError::UpstreamError(format!(
                "speech service returned {}",
                status
            )));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        let audio = if is_json {
            let payload: Value = response.json().await?;
            let encoded = payload["audioContent"].as_str().unwrap_or_default();
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| ResponderError::UpstreamError(format!("invalid audioContent: {}", e)))?
        } else {
            response.bytes().await?.to_vec()
        };

        AudioClip::from_synthesized(audio, settings.sample_rate_hz)
    }

    fn update_settings(&self, config: &SpeechConfig) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.voice_name = config.voice_name.clone();
        settings.language_code = config.language_code.clone();
        settings.speaking_rate = config.speaking_rate;
        settings.pitch = config.pitch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> GoogleSpeechClient {
        let config = SpeechConfig {
            base_url: base_url.to_string(),
            api_key: "speech-key".to_string(),
            ..AppConfig::default().speech
        };
        GoogleSpeechClient::new(config).unwrap()
    }

    fn unit(text: &str, format: InputFormat) -> SpeakableUnit {
        SpeakableUnit {
            index: 0,
            text: text.to_string(),
            format,
        }
    }

    #[tokio::test]
    async fn test_json_audio_content() {
        let server = MockServer::start().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 0, 2, 0]);
        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .and(header("x-goog-api-key", "speech-key"))
            .and(body_partial_json(json!({
                "input": {"text": "Hello. "},
                "voice": {"languageCode": "en-US", "name": "en-US-Wavenet-C"},
                "audioConfig": {"audioEncoding": "LINEAR16", "sampleRateHertz": 48000}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "audioContent": encoded })))
            .expect(1)
            .mount(&server)
            .await;

        let clip = client(&server.uri())
            .synthesize(&unit("Hello. ", InputFormat::Plain))
            .await
            .unwrap();
        assert_eq!(clip.data, vec![1, 0, 2, 0]);
        assert_eq!(clip.channels, 1);
        assert_eq!(clip.sample_rate, 48_000);
    }

    #[tokio::test]
    async fn test_markup_units_are_sent_as_ssml() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text:synthesize"))
            .and(body_partial_json(json!({"input": {"ssml": "<speak>Hi</speak>"}})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![5u8, 0, 6, 0], "audio/l16"))
            .expect(1)
            .mount(&server)
            .await;

        let clip = client(&server.uri())
            .synthesize(&unit("<speak>Hi</speak>", InputFormat::Markup))
            .await
            .unwrap();
        assert_eq!(clip.data, vec![5, 0, 6, 0]);
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .synthesize(&unit("x", InputFormat::Plain))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
    }

    #[tokio::test]
    async fn test_updated_voice_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"voice": {"name": "en-GB-Wavenet-B"}})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8, 0], "application/octet-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let speech = client(&server.uri());
        let mut updated = AppConfig::default().speech;
        updated.voice_name = "en-GB-Wavenet-B".to_string();
        speech.update_settings(&updated);

        assert!(speech.synthesize(&unit("x", InputFormat::Plain)).await.is_ok());
    }
}
