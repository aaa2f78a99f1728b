//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **ResponderError**: failures of the speech pipeline itself (completion stream,
//!   speech synthesis, voice transport, playback). These travel through the core as
//!   `Result` values and are never allowed to take the process down.
//! - **AppError**: what an HTTP client sees. Every `ResponderError` converts into an
//!   `AppError`, which actix turns into a JSON response.
//!
//! ## Error Categories (pipeline):
//! - **UpstreamEmpty / UpstreamError**: completion or synthesis service failures.
//!   Surfaced to the caller, never retried here.
//! - **JoinFailed / ReconnectFailed**: voice transport failures after the bounded
//!   automatic reconnect.
//! - **NotConnected**: playback attempted with no live session. Expected, not an anomaly.
//! - **TruncatedSample**: the audio adapter dropped an incomplete trailing byte. Logged only.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors produced by the event-to-speech pipeline.
///
/// ## Usage Example:
/// ```rust
/// return Err(ResponderError::UpstreamEmpty("no system prompt for profile 'base_plain'".into()));
/// ```
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResponderError {
    /// The completion or speech service produced nothing usable
    #[error("upstream returned no content: {0}")]
    UpstreamEmpty(String),

    /// The completion or speech request failed (transport, HTTP status, stream read)
    #[error("upstream request failed: {0}")]
    UpstreamError(String),

    /// The voice transport handshake failed or timed out
    #[error("failed to join voice channel {channel_id}: {reason}")]
    JoinFailed { channel_id: String, reason: String },

    /// Automatic recovery after a transport error gave up
    #[error("failed to reconnect to voice channel {channel_id} after {attempts} attempt(s): {reason}")]
    ReconnectFailed {
        channel_id: String,
        attempts: u32,
        reason: String,
    },

    /// Playback was requested while no voice session is ready
    #[error("not connected to a voice channel")]
    NotConnected,

    /// The player reported an error for a single clip
    #[error("playback failed: {0}")]
    PlaybackFailed(String),

    /// An incomplete trailing PCM byte was discarded at end of stream
    #[error("discarded {dropped_bytes} trailing byte(s) of an incomplete sample")]
    TruncatedSample { dropped_bytes: usize },

    /// An inbound event failed validation at the ingestion boundary
    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl ResponderError {
    /// Short machine-readable name, used in control-channel messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ResponderError::UpstreamEmpty(_) => "upstream_empty",
            ResponderError::UpstreamError(_) => "upstream_error",
            ResponderError::JoinFailed { .. } => "join_failed",
            ResponderError::ReconnectFailed { .. } => "reconnect_failed",
            ResponderError::NotConnected => "not_connected",
            ResponderError::PlaybackFailed(_) => "playback_failed",
            ResponderError::TruncatedSample { .. } => "truncated_sample",
            ResponderError::InvalidEvent(_) => "invalid_event",
        }
    }
}

impl From<reqwest::Error> for ResponderError {
    fn from(err: reqwest::Error) -> Self {
        ResponderError::UpstreamError(err.to_string())
    }
}

/// Type alias for pipeline results.
pub type ResponderResult<T> = Result<T, ResponderError>;

/// Custom error types for the HTTP surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **Pipeline**: A `ResponderError` bubbling up from the speech pipeline
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] ResponderError),
}

impl AppError {
    fn status_and_type(&self) -> (actix_web::http::StatusCode, &'static str) {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Pipeline(err) => {
                let status = match err {
                    ResponderError::UpstreamEmpty(_) | ResponderError::UpstreamError(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    ResponderError::JoinFailed { .. } | ResponderError::ReconnectFailed { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    ResponderError::NotConnected => StatusCode::CONFLICT,
                    ResponderError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
                    ResponderError::PlaybackFailed(_) | ResponderError::TruncatedSample { .. } => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.kind())
            }
        }
    }
}

/// Converts errors into JSON responses of the form
/// `{"error": {"type": ..., "message": ..., "timestamp": ...}}`.
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.status_and_type().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = self.status_and_type();
        let message = match self {
            AppError::Pipeline(err) => err.to_string(),
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg) => msg.clone(),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>` in HTTP handlers.
pub type AppResult<T> = Result<T, AppError>;
