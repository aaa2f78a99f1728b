use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Public view of the configuration. API keys are reported as present or
/// absent, never echoed.
fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "completion": {
            "base_url": config.completion.base_url,
            "model": config.completion.model,
            "max_tokens": config.completion.max_tokens,
            "persona_name": config.completion.persona_name,
            "api_key_set": !config.completion.api_key.is_empty()
        },
        "speech": {
            "base_url": config.speech.base_url,
            "language_code": config.speech.language_code,
            "voice_name": config.speech.voice_name,
            "audio_encoding": config.speech.audio_encoding,
            "sample_rate_hz": config.speech.sample_rate_hz,
            "speaking_rate": config.speech.speaking_rate,
            "pitch": config.speech.pitch,
            "input_format": config.speech.input_format,
            "api_key_set": !config.speech.api_key.is_empty()
        },
        "voice": {
            "gateway_url": config.voice.gateway_url,
            "guild_id": config.voice.guild_id,
            "channel_id": config.voice.channel_id,
            "self_deaf": config.voice.self_deaf,
            "join_timeout_secs": config.voice.join_timeout_secs,
            "reconnect_attempts": config.voice.reconnect_attempts
        },
        "memory": {
            "max_age_secs": config.memory.max_age_secs,
            "sweep_interval_secs": config.memory.sweep_interval_secs,
            "recent_window": config.memory.recent_window
        },
        "control": {
            "status_interval_secs": config.control.status_interval_secs,
            "heartbeat_interval_secs": config.control.heartbeat_interval_secs,
            "heartbeat_timeout_secs": config.control.heartbeat_timeout_secs
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}
