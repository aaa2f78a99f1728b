use crate::{error::AppError, state::AppState, voice::VoiceTarget};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Optional body for `POST /voice/connect`. Missing fields fall back to the
/// configured guild and channel.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
}

pub async fn voice_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "voice": state.responder.voice().status()
    }))
}

pub async fn connect_voice(
    state: web::Data<AppState>,
    body: Option<web::Json<ConnectRequest>>,
) -> Result<HttpResponse, AppError> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let config = state.get_config();

    let guild_id = request.guild_id.unwrap_or(config.voice.guild_id);
    let channel_id = request.channel_id.unwrap_or(config.voice.channel_id);
    if guild_id.is_empty() || channel_id.is_empty() {
        return Err(AppError::BadRequest(
            "guild_id and channel_id are required (in the body or voice config)".to_string(),
        ));
    }

    let voice = state.responder.voice();
    voice.join(VoiceTarget::new(guild_id, channel_id)).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "voice": voice.status()
    })))
}

pub async fn disconnect_voice(state: web::Data<AppState>) -> HttpResponse {
    let voice = state.responder.voice();
    let was_connected = voice.disconnect().await;

    HttpResponse::Ok().json(json!({
        "status": "success",
        "was_connected": was_connected,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "voice": voice.status()
    }))
}
