//! # Delta Voice - Main Application Entry Point
//!
//! Live event-to-speech responder. Viewer events (chat messages, bit donations,
//! subscriptions, raids, follower batches) come in over HTTP or the control
//! WebSocket; each one is answered by a streamed completion that is cut into
//! speakable units, synthesized, and played into a voice channel while the
//! rest of the response is still being generated.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **events**: Inbound event types and their prompt data
//! - **completion**: Completion client, SSE parsing, prompt library, segmentation
//! - **speech**: Speech synthesis client and the per-response synthesis dispatcher
//! - **audio**: Synthesized clip decoding and mono to stereo conversion
//! - **voice**: Voice session state machine, playback queue and gateway transport
//! - **memory**: Time-bounded conversational memory
//! - **responder**: The pipeline tying all of the above together
//! - **state / health / middleware / handlers / websocket**: HTTP and control surface
//! - **error**: Domain and HTTP error types

mod audio;
mod completion;
mod config;
mod error;
mod events;
mod handlers;
mod health;
mod memory;
mod middleware;
mod responder;
mod speech;
mod state;
mod voice;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use completion::{AnthropicClient, PromptLibrary};
use config::AppConfig;
use memory::MemoryStore;
use responder::Responder;
use speech::GoogleSpeechClient;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice::{GatewayTransport, VoiceSessionManager, VoiceTarget};

/// Global shutdown signal, set by the signal handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## What this function does:
/// 1. **Loads configuration** and the prompt library
/// 2. **Builds the pipeline**: remote clients, voice session, memory, responder
/// 3. **Starts background tasks**: memory sweep, optional voice auto-connect
/// 4. **Serves HTTP and the control WebSocket** until a shutdown signal arrives
/// 5. **Shuts down gracefully**: tells control clients, leaves the voice channel
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting delta-voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.completion.api_key.is_empty() {
        warn!("No completion API key configured; event responses will fail until one is set");
    }

    let prompts = PromptLibrary::load(config.completion.prompts_path.as_deref())?;
    let completion = Arc::new(AnthropicClient::new(config.completion.clone())?);
    let speech = Arc::new(GoogleSpeechClient::new(config.speech.clone())?);

    let transport = Arc::new(GatewayTransport::new(
        config.voice.gateway_url.clone(),
        config.voice.self_deaf,
    ));
    let voice = VoiceSessionManager::new(
        transport,
        config.voice.join_timeout(),
        config.voice.reconnect_attempts,
    );

    let memory = Arc::new(MemoryStore::new(&config.memory));
    let sweeper = memory::spawn_sweeper(
        memory.clone(),
        Duration::from_secs(config.memory.sweep_interval_secs),
    );

    let responder = Arc::new(Responder::new(
        completion,
        speech,
        voice.clone(),
        memory,
        prompts,
        config.speech.input_format,
        config.completion.persona_name.clone(),
    ));

    let app_state = AppState::new(config.clone(), responder);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    if config.voice.auto_connect {
        auto_connect(voice.clone(), &config);
    }

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/events", web::post().to(handlers::ingest_event))
                    .route("/voice", web::get().to(handlers::voice_status))
                    .route("/voice/connect", web::post().to(handlers::connect_voice))
                    .route("/voice/disconnect", web::post().to(handlers::disconnect_voice)),
            )
            .route("/ws/control", web::get().to(websocket::control_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // No control clients connected is fine
            let _ = app_state.shutdown.send(());
            server_handle.stop(true).await;
        }
    }

    sweeper.abort();
    if let Some(target) = voice.current_target() {
        info!(channel_id = %target.channel_id, "Leaving voice channel");
        voice.disconnect().await;
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "delta_voice=trace")
/// - If not set, defaults to "delta_voice=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "delta_voice=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Join the configured voice channel in the background. A failure is logged
/// and leaves the session disconnected; operators can retry via the API.
fn auto_connect(voice: VoiceSessionManager, config: &AppConfig) {
    let guild_id = config.voice.guild_id.clone();
    let channel_id = config.voice.channel_id.clone();
    if guild_id.is_empty() || channel_id.is_empty() {
        warn!("voice.auto_connect is set but guild_id/channel_id are missing");
        return;
    }

    tokio::spawn(async move {
        if let Err(e) = voice.join(VoiceTarget::new(guild_id, channel_id)).await {
            error!(error = %e, "Automatic voice connect failed");
        }
    });
}

/// Listen for SIGTERM and SIGINT and set the global shutdown flag.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
