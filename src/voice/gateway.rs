//! # Voice Gateway Transport
//!
//! Connects to a voice gateway bridge over WebSocket. The bridge owns the actual
//! voice platform connection; this side only speaks a small JSON protocol and
//! streams PCM as binary frames.
//!
//! ## Protocol:
//! ```text
//! → {"op":"join","guild_id":"..","channel_id":"..","self_deaf":false}
//! ← {"op":"ready"}
//! → {"op":"play","format":"s16le","sample_rate":48000,"channels":2}
//! → <binary frame: 20ms of PCM> ...
//! → {"op":"end"}
//! ← {"op":"idle"} | {"op":"player_error","message":".."}
//! → {"op":"leave"}
//! ```
//! `{"op":"error","message":".."}` from the bridge, a socket error, or a close
//! frame is reported as a transport event and ends the connection.

use crate::audio::AudioClip;
use crate::error::{ResponderError, ResponderResult};
use crate::voice::transport::{TransportEvent, VoiceConnection, VoiceLink, VoiceTarget, VoiceTransport};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;
type PendingPlayback = Arc<StdMutex<Option<oneshot::Sender<Result<(), String>>>>>;

/// Milliseconds of audio per binary frame.
const FRAME_MS: u32 = 20;

pub struct GatewayTransport {
    url: String,
    self_deaf: bool,
}

impl GatewayTransport {
    pub fn new(url: impl Into<String>, self_deaf: bool) -> Self {
        Self {
            url: url.into(),
            self_deaf,
        }
    }
}

fn op_of(text: &str) -> Option<(String, Value)> {
    let payload: Value = serde_json::from_str(text).ok()?;
    let op = payload["op"].as_str()?.to_string();
    Some((op, payload))
}

fn message_of(payload: &Value) -> String {
    payload["message"].as_str().unwrap_or("unknown error").to_string()
}

#[async_trait]
impl VoiceTransport for GatewayTransport {
    async fn connect(&self, target: &VoiceTarget) -> ResponderResult<VoiceConnection> {
        let upstream = |e: String| ResponderError::UpstreamError(e);

        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| upstream(format!("voice gateway unreachable: {}", e)))?;
        let (mut write, mut read) = socket.split();

        let join = json!({
            "op": "join",
            "guild_id": target.guild_id,
            "channel_id": target.channel_id,
            "self_deaf": self.self_deaf,
        });
        write
            .send(Message::Text(join.to_string()))
            .await
            .map_err(|e| upstream(format!("failed to send join: {}", e)))?;

        // Handshake: wait for the bridge to confirm the channel
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match op_of(&text) {
                    Some((op, _)) if op == "ready" => break,
                    Some((op, payload)) if op == "error" => {
                        return Err(upstream(message_of(&payload)));
                    }
                    _ => debug!(message = %text, "Ignoring gateway message during handshake"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(upstream("voice gateway closed during handshake".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(upstream(format!("voice gateway error: {}", e))),
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: PendingPlayback = Arc::new(StdMutex::new(None));
        let reader = tokio::spawn(read_loop(read, pending.clone(), events_tx));

        let link = GatewayLink {
            writer: Mutex::new(write),
            pending,
            reader,
            closed: AtomicBool::new(false),
        };
        Ok(VoiceConnection {
            link: Arc::new(link),
            events: events_rx,
        })
    }
}

/// Route incoming gateway messages: playback results to the waiting clip,
/// failures to the session's event channel.
async fn read_loop(
    mut read: SplitStream<Socket>,
    pending: PendingPlayback,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let settle = |result: Result<(), String>| {
        if let Some(tx) = pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(result);
        }
    };

    let event = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match op_of(&text) {
                Some((op, _)) if op == "idle" => settle(Ok(())),
                Some((op, payload)) if op == "player_error" => settle(Err(message_of(&payload))),
                Some((op, payload)) if op == "error" => break TransportEvent::Error(message_of(&payload)),
                _ => debug!(message = %text, "Ignoring gateway message"),
            },
            Some(Ok(Message::Close(_))) | None => break TransportEvent::Closed,
            Some(Ok(_)) => {}
            Some(Err(e)) => break TransportEvent::Error(e.to_string()),
        }
    };

    warn!(event = ?event, "Voice gateway connection ended");
    settle(Err("voice connection lost during playback".to_string()));
    let _ = events.send(event);
}

struct GatewayLink {
    writer: Mutex<Writer>,
    pending: PendingPlayback,
    reader: JoinHandle<()>,
    closed: AtomicBool,
}

impl GatewayLink {
    /// Fail the clip in flight, if any. The reader that would have settled it
    /// is gone once the link is closed.
    fn settle_closed(&self) {
        if let Some(tx) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(Err("voice connection closed".to_string()));
        }
    }

    async fn stream_clip(&self, clip: &AudioClip) -> Result<(), String> {
        let mut writer = self.writer.lock().await;
        let header = json!({
            "op": "play",
            "format": "s16le",
            "sample_rate": clip.sample_rate,
            "channels": clip.channels,
        });
        writer
            .send(Message::Text(header.to_string()))
            .await
            .map_err(|e| e.to_string())?;

        let frame_bytes = (clip.sample_rate / (1000 / FRAME_MS)) as usize * clip.channels as usize * 2;
        for frame in clip.data.chunks(frame_bytes.max(2)) {
            writer
                .send(Message::Binary(frame.to_vec()))
                .await
                .map_err(|e| e.to_string())?;
        }

        writer
            .send(Message::Text(json!({"op": "end"}).to_string()))
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl VoiceLink for GatewayLink {
    async fn play(&self, clip: &AudioClip) -> ResponderResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ResponderError::PlaybackFailed("voice connection closed".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        // close() may have run between the check and storing the sender
        if self.closed.load(Ordering::SeqCst) {
            self.settle_closed();
        }

        self.stream_clip(clip)
            .await
            .map_err(|e| ResponderError::PlaybackFailed(format!("failed to stream audio: {}", e)))?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ResponderError::PlaybackFailed(message)),
            Err(_) => Err(ResponderError::PlaybackFailed(
                "voice connection closed during playback".to_string(),
            )),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reader.abort();
        self.settle_closed();

        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Text(json!({"op": "leave"}).to_string())).await;
        let _ = writer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Minimal bridge: confirms joins, answers each finished clip with `reply`,
    /// and reports the number of binary frames it received per clip.
    async fn spawn_bridge(reply: Option<Value>) -> (String, mpsc::UnboundedReceiver<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut frames = 0;
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Text(text) => match op_of(&text).map(|(op, _)| op).as_deref() {
                        Some("join") => ws.send(Message::Text(r#"{"op":"ready"}"#.into())).await.unwrap(),
                        Some("play") => frames = 0,
                        Some("end") => {
                            frames_tx.send(frames).unwrap();
                            if let Some(reply) = &reply {
                                ws.send(Message::Text(reply.to_string())).await.unwrap();
                            }
                        }
                        _ => {}
                    },
                    Message::Binary(_) => frames += 1,
                    _ => {}
                }
            }
        });

        (format!("ws://{}", addr), frames_rx)
    }

    fn stereo_clip(ms: u32) -> AudioClip {
        AudioClip {
            data: vec![0; (48 * ms * 4) as usize],
            channels: 2,
            sample_rate: 48_000,
        }
    }

    #[tokio::test]
    async fn test_join_and_play_over_gateway() {
        let (url, mut frames) = spawn_bridge(Some(json!({"op": "idle"}))).await;
        let transport = GatewayTransport::new(url, false);

        let connection = transport.connect(&VoiceTarget::new("g", "c")).await.unwrap();
        connection.link.play(&stereo_clip(100)).await.unwrap();

        // 100ms of audio in 20ms frames
        assert_eq!(frames.recv().await, Some(5));
        connection.link.close().await;
        assert!(connection.link.play(&stereo_clip(20)).await.is_err());
    }

    #[tokio::test]
    async fn test_player_error_fails_the_clip() {
        let (url, _frames) = spawn_bridge(Some(json!({"op": "player_error", "message": "decoder died"}))).await;
        let transport = GatewayTransport::new(url, false);

        let connection = transport.connect(&VoiceTarget::new("g", "c")).await.unwrap();
        let err = connection.link.play(&stereo_clip(40)).await.unwrap_err();
        assert_eq!(err, ResponderError::PlaybackFailed("decoder died".to_string()));
    }

    #[tokio::test]
    async fn test_gateway_error_is_reported_as_transport_event() {
        let (url, _frames) = spawn_bridge(Some(json!({"op": "error", "message": "bridge crashed"}))).await;
        let transport = GatewayTransport::new(url, true);

        let VoiceConnection { link, mut events } =
            transport.connect(&VoiceTarget::new("g", "c")).await.unwrap();

        // The clip in flight fails and the session is told why
        assert!(link.play(&stereo_clip(20)).await.is_err());
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Error("bridge crashed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_fails_clip_in_flight() {
        // The bridge never reports the player going idle
        let (url, mut frames) = spawn_bridge(None).await;
        let transport = GatewayTransport::new(url, false);

        let connection = transport.connect(&VoiceTarget::new("g", "c")).await.unwrap();
        let link = connection.link.clone();
        let playing = tokio::spawn(async move { link.play(&stereo_clip(40)).await });

        // Wait until the whole clip reached the bridge
        assert_eq!(frames.recv().await, Some(2));
        connection.link.close().await;

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), playing)
            .await
            .expect("play did not resolve after close")
            .unwrap();
        assert_eq!(
            result,
            Err(ResponderError::PlaybackFailed("voice connection closed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_gateway() {
        let transport = GatewayTransport::new("ws://127.0.0.1:1", false);
        let err = transport.connect(&VoiceTarget::new("g", "c")).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
    }
}
