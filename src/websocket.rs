//! # Control WebSocket
//!
//! Operator channel at `/ws/control`. Every connection is its own actor that
//! mirrors the voice session state and accepts a handful of commands.
//!
//! ## Client → Server:
//! - `{"type":"request_metrics"}`
//! - `{"type":"bot_control","action":"connect"|"disconnect"|"status"}`
//! - `{"type":"transcript","username":"..","content":"..","timestamp":"..."}`
//!   (spoken reply; `timestamp` optional)
//! - `{"type":"ping","timestamp":123}` / `{"type":"pong","timestamp":123}`
//!
//! ## Server → Client:
//! - `metrics_update`, `bot_status`, `response`, `error`, `ping`, `pong`, `shutdown`
//!
//! `bot_status` is pushed on every voice state change and every
//! `control.status_interval_secs`.

use crate::config::ControlConfig;
use crate::events::InboundEvent;
use crate::state::AppState;
use crate::voice::{VoiceEvent, VoiceState, VoiceTarget};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Messages accepted from control clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestMetrics,
    BotControl {
        action: BotAction,
    },
    Transcript {
        username: String,
        content: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotAction {
    Connect,
    Disconnect,
    Status,
}

/// Messages pushed to control clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    MetricsUpdate {
        metrics: serde_json::Value,
    },
    BotStatus {
        connected: bool,
        state: VoiceState,
        channel_id: Option<String>,
    },
    Response {
        text: String,
    },
    Error {
        message: String,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Shutdown,
}

impl ServerMessage {
    fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// One control connection.
pub struct ControlWebSocket {
    state: web::Data<AppState>,
    control: ControlConfig,
    last_heartbeat: Instant,
}

#[derive(Message)]
#[rtype(result = "()")]
struct Push(ServerMessage);

impl ControlWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let control = state.get_config().control;
        Self {
            state,
            control,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: ServerMessage) {
        if let Some(json) = message.to_json() {
            ctx.text(json);
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, message: impl Into<String>) {
        let message = message.into();
        warn!(message = %message, "Control channel error");
        self.send(ctx, ServerMessage::Error { message });
    }

    fn bot_status(&self) -> ServerMessage {
        let status = self.state.responder.voice().status();
        ServerMessage::BotStatus {
            connected: status.connected,
            state: status.state,
            channel_id: status.channel_id,
        }
    }

    fn metrics_update(&self) -> ServerMessage {
        let http = self.state.get_metrics_snapshot();
        ServerMessage::MetricsUpdate {
            metrics: serde_json::json!({
                "uptime_seconds": self.state.get_uptime_seconds(),
                "total_requests": http.request_count,
                "total_errors": http.error_count,
                "control_sessions": http.control_sessions,
                "responder": self.state.responder.metrics(),
                "voice": self.state.responder.voice().status(),
                "conversation": self.state.responder.memory().summary()
            }),
        }
    }

    fn handle_bot_control(&mut self, action: BotAction, ctx: &mut ws::WebsocketContext<Self>) {
        match action {
            BotAction::Status => {
                let status = self.bot_status();
                self.send(ctx, status);
            }
            BotAction::Connect => {
                let voice_config = self.state.get_config().voice;
                if voice_config.guild_id.is_empty() || voice_config.channel_id.is_empty() {
                    self.send_error(ctx, "voice.guild_id and voice.channel_id must be configured");
                    return;
                }

                let state = self.state.clone();
                let addr = ctx.address();
                tokio::spawn(async move {
                    let target = VoiceTarget::new(voice_config.guild_id, voice_config.channel_id);
                    // Success is reported through the state change stream
                    if let Err(e) = state.responder.voice().join(target).await {
                        addr.do_send(Push(ServerMessage::Error { message: e.to_string() }));
                    }
                });
            }
            BotAction::Disconnect => {
                let state = self.state.clone();
                let addr = ctx.address();
                tokio::spawn(async move {
                    if !state.responder.voice().disconnect().await {
                        let status = state.responder.voice().status();
                        addr.do_send(Push(ServerMessage::BotStatus {
                            connected: status.connected,
                            state: status.state,
                            channel_id: status.channel_id,
                        }));
                    }
                });
            }
        }
    }

    fn handle_transcript(
        &mut self,
        username: String,
        content: String,
        timestamp: Option<DateTime<Utc>>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let event = InboundEvent::ChatMessage {
            username,
            content,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        };
        if let Err(e) = event.validate() {
            self.send_error(ctx, e.to_string());
            return;
        }

        let state = self.state.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            let reply = match state.responder.respond(&event).await {
                Ok(summary) => ServerMessage::Response { text: summary.text },
                Err(e) => ServerMessage::Error { message: e.to_string() },
            };
            addr.do_send(Push(reply));
        });
    }

    fn handle_client_message(&mut self, message: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            ClientMessage::RequestMetrics => {
                let metrics = self.metrics_update();
                self.send(ctx, metrics);
            }
            ClientMessage::BotControl { action } => self.handle_bot_control(action, ctx),
            ClientMessage::Transcript {
                username,
                content,
                timestamp,
            } => self.handle_transcript(username, content, timestamp, ctx),
            ClientMessage::Ping { timestamp } => {
                self.last_heartbeat = Instant::now();
                self.send(ctx, ServerMessage::Pong { timestamp });
            }
            ClientMessage::Pong { timestamp } => {
                self.last_heartbeat = Instant::now();
                debug!(rtt_ms = now_millis().saturating_sub(timestamp), "Control heartbeat");
            }
        }
    }
}

impl Actor for ControlWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Control connection started");
        self.state.increment_control_sessions();

        ctx.add_stream(BroadcastStream::new(self.state.responder.voice().subscribe()));
        ctx.add_stream(BroadcastStream::new(self.state.shutdown.subscribe()));

        let heartbeat_timeout = Duration::from_secs(self.control.heartbeat_timeout_secs);
        ctx.run_interval(Duration::from_secs(self.control.heartbeat_interval_secs), move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > heartbeat_timeout {
                warn!("Control heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            act.send(ctx, ServerMessage::Ping { timestamp: now_millis() });
        });

        ctx.run_interval(Duration::from_secs(self.control.status_interval_secs), |act, ctx| {
            let status = act.bot_status();
            act.send(ctx, status);
        });

        let status = self.bot_status();
        self.send(ctx, status);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Control connection stopped");
        self.state.decrement_control_sessions();
    }
}

impl Handler<Push> for ControlWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        self.send(ctx, msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ControlWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.handle_client_message(message, ctx),
                Err(e) => self.send_error(ctx, format!("invalid control message: {}", e)),
            },
            Ok(ws::Message::Ping(bytes)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "binary frames are not supported on the control channel");
            }
            Ok(ws::Message::Close(reason)) => {
                info!(reason = ?reason, "Control client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Control protocol error");
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<VoiceEvent, BroadcastStreamRecvError>> for ControlWebSocket {
    fn handle(&mut self, event: Result<VoiceEvent, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        match event {
            Ok(VoiceEvent::StateChanged { state, channel_id }) => {
                self.send(
                    ctx,
                    ServerMessage::BotStatus {
                        connected: state == VoiceState::Ready,
                        state,
                        channel_id,
                    },
                );
            }
            Ok(event) => {
                if let Some(err) = event.as_error() {
                    self.send(ctx, ServerMessage::Error { message: err.to_string() });
                }
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "Control connection lagged behind voice events");
                let status = self.bot_status();
                self.send(ctx, status);
            }
        }
    }

    // The voice manager outlives every connection; never stop on stream end
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl StreamHandler<Result<(), BroadcastStreamRecvError>> for ControlWebSocket {
    fn handle(&mut self, _signal: Result<(), BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        info!("Server shutting down, closing control connection");
        self.send(ctx, ServerMessage::Shutdown);
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Away,
            description: Some("server shutting down".to_string()),
        }));
        ctx.stop();
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

pub async fn control_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "New control connection request");
    ws::start(ControlWebSocket::new(app_state), &req, stream)
}
