//! # Event Ingestion
//!
//! `POST /api/v1/events` accepts one inbound event as tagged JSON:
//!
//! ```json
//! {"type": "bit_donation", "username": "ada", "bits": 500, "message": "hi"}
//! ```
//!
//! The request completes once the response has been generated and, unless
//! `?speak=false` is given, spoken. Events are processed concurrently; audio
//! from concurrent events still plays one clip at a time.

use crate::{error::AppError, events::InboundEvent, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    /// Speak the response (default) or only generate the text
    #[serde(default = "default_speak")]
    pub speak: bool,
}

fn default_speak() -> bool {
    true
}

pub async fn ingest_event(
    state: web::Data<AppState>,
    query: web::Query<EventQuery>,
    body: web::Json<InboundEvent>,
) -> Result<HttpResponse, AppError> {
    let event = body.into_inner();
    info!(event_kind = event.kind(), speak = query.speak, "Event received");

    if !query.speak {
        let text = state.responder.respond_text_only(&event).await?;
        return Ok(HttpResponse::Ok().json(json!({
            "status": "success",
            "event_kind": event.kind(),
            "text": text,
            "spoken": false,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })));
    }

    let summary = state.responder.respond(&event).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "event_kind": event.kind(),
        "text": summary.text,
        "spoken": summary.clips_played > 0,
        "units": summary.units,
        "clips_played": summary.clips_played,
        "skipped_not_connected": summary.skipped_not_connected,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::fake_state;
    use crate::voice::VoiceTarget;
    use actix_web::{http::StatusCode, test, App};

    macro_rules! events_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/events", web::post().to(ingest_event)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_tip_event_is_spoken() {
        let (state, transport) = fake_state(&["Thanks for the bits. ", "Science thanks you."]);
        state.responder.voice().join(VoiceTarget::new("g", "c")).await.unwrap();
        let app = events_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/events")
            .set_json(json!({"type": "bit_donation", "username": "ada", "bits": 500, "message": "hi"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["event_kind"], "bit_donation");
        assert_eq!(body["text"], "Thanks for the bits. Science thanks you.");
        assert_eq!(body["clips_played"], 2);
        assert_eq!(transport.last_link().unwrap().plays().len(), 2);
        assert_eq!(state.responder.memory().len(), 2);
    }

    #[actix_web::test]
    async fn test_text_only_mode() {
        let (state, _) = fake_state(&["Just text."]);
        let app = events_app!(state);

        let req = test::TestRequest::post()
            .uri("/events?speak=false")
            .set_json(json!({"type": "chat_message", "username": "bo", "content": "hello?"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["text"], "Just text.");
        assert_eq!(body["spoken"], false);
    }

    #[actix_web::test]
    async fn test_invalid_event_is_bad_request() {
        let (state, _) = fake_state(&["unused"]);
        let app = events_app!(state);

        let req = test::TestRequest::post()
            .uri("/events")
            .set_json(json!({"type": "chat_message", "username": "", "content": "hello?"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "invalid_event");
    }

    #[actix_web::test]
    async fn test_unknown_event_type_is_rejected() {
        let (state, _) = fake_state(&["unused"]);
        let app = events_app!(state);

        let req = test::TestRequest::post()
            .uri("/events")
            .set_json(json!({"type": "hype_train", "level": 3}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
    }
}
