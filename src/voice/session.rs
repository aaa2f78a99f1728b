//! # Voice Session Manager
//!
//! Owns the single outbound voice session and the single playback slot.
//!
//! ## State machine:
//! ```text
//! Disconnected ──join──▶ Connecting ──handshake ok──▶ Ready
//!      ▲                     │                          │
//!      │◀── timeout/failure ─┘                  transport error
//!      │                                                ▼
//!      │◀── attempts exhausted ── Reconnecting ◀────── Error
//!      │                               │
//!      │                               └── rejoin ok ──▶ Ready
//!      └──────────── disconnect (from any state) ──────────────
//! ```
//!
//! ## Playback:
//! Clips are queued to one worker task, so at most one clip plays at any instant
//! and clips play in the order they were queued. Callers suspend on a oneshot
//! reply until their clip finishes; nobody polls a busy flag.
//!
//! ## Epochs:
//! Every installed connection gets a fresh epoch. A transport error only
//! triggers recovery if its epoch is still current, so errors from a connection
//! that was already replaced or disconnected are ignored.

use crate::audio::AudioClip;
use crate::error::{ResponderError, ResponderResult};
use crate::voice::transport::{TransportEvent, VoiceConnection, VoiceLink, VoiceTarget, VoiceTransport};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    Disconnected,
    Connecting,
    Ready,
    Error,
    Reconnecting,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Disconnected => "disconnected",
            VoiceState::Connecting => "connecting",
            VoiceState::Ready => "ready",
            VoiceState::Error => "error",
            VoiceState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast to every subscriber as the session changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VoiceEvent {
    StateChanged {
        state: VoiceState,
        channel_id: Option<String>,
    },
    /// Automatic recovery gave up. Sent once per failed recovery.
    ReconnectFailed {
        channel_id: String,
        attempts: u32,
        reason: String,
    },
}

impl VoiceEvent {
    pub fn as_error(&self) -> Option<ResponderError> {
        match self {
            VoiceEvent::ReconnectFailed {
                channel_id,
                attempts,
                reason,
            } => Some(ResponderError::ReconnectFailed {
                channel_id: channel_id.clone(),
                attempts: *attempts,
                reason: reason.clone(),
            }),
            VoiceEvent::StateChanged { .. } => None,
        }
    }
}

/// Serializable snapshot for health checks and the control channel.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceStatus {
    pub state: VoiceState,
    pub connected: bool,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub busy: bool,
    pub pending_playback: usize,
    pub clips_played: u64,
}

/// Completion handle for one queued clip.
pub struct PlaybackTicket {
    rx: oneshot::Receiver<ResponderResult<()>>,
}

impl PlaybackTicket {
    /// Wait until the clip has played (or failed).
    pub async fn wait(self) -> ResponderResult<()> {
        self.rx.await.unwrap_or(Err(ResponderError::NotConnected))
    }
}

struct PlaybackJob {
    clip: AudioClip,
    reply: oneshot::Sender<ResponderResult<()>>,
}

struct VoiceSession {
    target: VoiceTarget,
    link: Arc<dyn VoiceLink>,
    monitor: JoinHandle<()>,
}

impl VoiceSession {
    async fn teardown(self) {
        self.monitor.abort();
        self.link.close().await;
    }
}

struct Snapshot {
    state: VoiceState,
    target: Option<VoiceTarget>,
}

struct Inner {
    transport: Arc<dyn VoiceTransport>,
    join_timeout: Duration,
    reconnect_attempts: u32,
    session: Mutex<Option<VoiceSession>>,
    snapshot: RwLock<Snapshot>,
    epoch: AtomicU64,
    busy: AtomicBool,
    pending: AtomicUsize,
    clips_played: AtomicU64,
    events: broadcast::Sender<VoiceEvent>,
    playback: mpsc::UnboundedSender<PlaybackJob>,
}

/// Shared handle to the voice session. Cheap to clone.
#[derive(Clone)]
pub struct VoiceSessionManager {
    inner: Arc<Inner>,
}

impl VoiceSessionManager {
    /// Create a manager and start its playback worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: Arc<dyn VoiceTransport>, join_timeout: Duration, reconnect_attempts: u32) -> Self {
        let (events, _) = broadcast::channel(64);
        let (playback, jobs) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            transport,
            join_timeout,
            reconnect_attempts,
            session: Mutex::new(None),
            snapshot: RwLock::new(Snapshot {
                state: VoiceState::Disconnected,
                target: None,
            }),
            epoch: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            clips_played: AtomicU64::new(0),
            events,
            playback,
        });

        tokio::spawn(playback_worker(Arc::downgrade(&inner), jobs));
        Self { inner }
    }

    /// Join `target`. A no-op if already ready on the same channel; any other
    /// live session is torn down first.
    pub async fn join(&self, target: VoiceTarget) -> ResponderResult<()> {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;

        if let Some(current) = session.as_ref() {
            if current.target == target && inner.state() == VoiceState::Ready {
                debug!(channel_id = %target.channel_id, "Already connected to voice channel");
                return Ok(());
            }
        }

        if let Some(previous) = session.take() {
            info!(channel_id = %previous.target.channel_id, "Leaving previous voice channel");
            previous.teardown().await;
        }

        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        inner.set_state(VoiceState::Connecting, Some(target.clone()));
        info!(guild_id = %target.guild_id, channel_id = %target.channel_id, "Joining voice channel");

        match inner.connect_once(&target).await {
            Ok(connection) => {
                *session = Some(inner.install(target.clone(), connection, epoch));
                inner.set_state(VoiceState::Ready, Some(target));
                Ok(())
            }
            Err(reason) => {
                error!(channel_id = %target.channel_id, reason = %reason, "Failed to join voice channel");
                inner.set_state(VoiceState::Disconnected, None);
                Err(ResponderError::JoinFailed {
                    channel_id: target.channel_id,
                    reason,
                })
            }
        }
    }

    /// Tear down the session from any state. Returns whether there was anything
    /// to tear down: a live session or a recovery in progress.
    pub async fn disconnect(&self) -> bool {
        // Invalidate any recovery in flight before waiting for the lock
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        let mut session = self.inner.session.lock().await;
        let existed = match session.take() {
            Some(previous) => {
                info!(channel_id = %previous.target.channel_id, "Disconnecting from voice channel");
                previous.teardown().await;
                true
            }
            None => self.inner.state() != VoiceState::Disconnected,
        };
        self.inner.set_state(VoiceState::Disconnected, None);
        existed
    }

    /// Queue a clip for playback without waiting for it to play.
    ///
    /// Fails immediately with `NotConnected` unless the session is ready.
    pub fn enqueue_clip(&self, clip: AudioClip) -> ResponderResult<PlaybackTicket> {
        if self.inner.state() != VoiceState::Ready {
            return Err(ResponderError::NotConnected);
        }

        let (reply, rx) = oneshot::channel();
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if self.inner.playback.send(PlaybackJob { clip, reply }).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ResponderError::NotConnected);
        }
        Ok(PlaybackTicket { rx })
    }

    /// Play a clip, waiting for its turn and for playback to finish.
    pub async fn play_clip(&self, clip: AudioClip) -> ResponderResult<()> {
        self.enqueue_clip(clip)?.wait().await
    }

    pub fn state(&self) -> VoiceState {
        self.inner.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == VoiceState::Ready
    }

    pub fn current_target(&self) -> Option<VoiceTarget> {
        self.inner.read_snapshot(|s| s.target.clone())
    }

    pub fn status(&self) -> VoiceStatus {
        let (state, target) = self.inner.read_snapshot(|s| (s.state, s.target.clone()));
        VoiceStatus {
            state,
            connected: state == VoiceState::Ready,
            guild_id: target.as_ref().map(|t| t.guild_id.clone()),
            channel_id: target.map(|t| t.channel_id),
            busy: self.inner.busy.load(Ordering::SeqCst),
            pending_playback: self.inner.pending.load(Ordering::SeqCst),
            clips_played: self.inner.clips_played.load(Ordering::SeqCst),
        }
    }

    /// Receive state changes and reconnect failures from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn read_snapshot<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        f(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn state(&self) -> VoiceState {
        self.read_snapshot(|s| s.state)
    }

    fn set_state(&self, state: VoiceState, target: Option<VoiceTarget>) {
        let changed = {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            let changed = snapshot.state != state || snapshot.target != target;
            snapshot.state = state;
            snapshot.target = target.clone();
            changed
        };

        if changed {
            let channel_id = target.map(|t| t.channel_id);
            debug!(state = %state, channel_id = ?channel_id, "Voice state changed");
            // No subscribers is fine
            let _ = self.events.send(VoiceEvent::StateChanged { state, channel_id });
        }
    }

    /// One connection attempt bounded by the join timeout.
    async fn connect_once(&self, target: &VoiceTarget) -> Result<VoiceConnection, String> {
        match tokio::time::timeout(self.join_timeout, self.transport.connect(target)).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "handshake timed out after {}ms",
                self.join_timeout.as_millis()
            )),
        }
    }

    fn install(self: &Arc<Self>, target: VoiceTarget, connection: VoiceConnection, epoch: u64) -> VoiceSession {
        let monitor = spawn_monitor(Arc::downgrade(self), epoch, connection.events);
        VoiceSession {
            target,
            link: connection.link,
            monitor,
        }
    }

    /// Handle a transport error on the connection installed at `epoch`.
    ///
    /// The session lock is only held to check the epoch and change state, never
    /// across a connection attempt, so `disconnect` and `join` are not delayed
    /// by a recovery in progress.
    async fn recover(self: Arc<Self>, epoch: u64, reason: String) {
        let target = {
            let mut session = self.session.lock().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!(epoch, "Ignoring transport error from a replaced connection");
                return;
            }

            // The monitor calling us is the failed session's own task, so it is
            // detached rather than aborted.
            let target = match session.take() {
                Some(failed) => {
                    failed.link.close().await;
                    failed.target
                }
                None => return,
            };
            warn!(channel_id = %target.channel_id, reason = %reason, "Voice transport error");
            self.set_state(VoiceState::Error, Some(target.clone()));
            target
        };

        let mut last_reason = reason;
        for attempt in 1..=self.reconnect_attempts {
            {
                let _session = self.session.lock().await;
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                self.set_state(VoiceState::Reconnecting, Some(target.clone()));
            }
            info!(
                attempt,
                max_attempts = self.reconnect_attempts,
                channel_id = %target.channel_id,
                "Reconnecting to voice channel"
            );

            match self.connect_once(&target).await {
                Ok(connection) => {
                    let mut session = self.session.lock().await;
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        debug!(attempt, "Discarding connection from a superseded recovery");
                        connection.link.close().await;
                        return;
                    }
                    let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                    *session = Some(self.install(target.clone(), connection, next));
                    self.set_state(VoiceState::Ready, Some(target));
                    info!(attempt, "Voice connection recovered");
                    return;
                }
                Err(e) => {
                    warn!(attempt, reason = %e, "Reconnect attempt failed");
                    last_reason = e;
                }
            }
        }

        let _session = self.session.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        error!(
            channel_id = %target.channel_id,
            attempts = self.reconnect_attempts,
            reason = %last_reason,
            "Giving up on voice channel"
        );
        self.set_state(VoiceState::Disconnected, None);
        let _ = self.events.send(VoiceEvent::ReconnectFailed {
            channel_id: target.channel_id,
            attempts: self.reconnect_attempts,
            reason: last_reason,
        });
    }

    async fn play_now(&self, clip: AudioClip) -> ResponderResult<()> {
        if self.state() != VoiceState::Ready {
            return Err(ResponderError::NotConnected);
        }
        let link = {
            let session = self.session.lock().await;
            session.as_ref().map(|s| s.link.clone())
        }
        .ok_or(ResponderError::NotConnected)?;

        let (clip, warning) = clip.into_stereo();
        if let Some(warning) = warning {
            warn!(error = %warning, "Audio adapter dropped a partial sample");
        }
        if clip.is_empty() {
            debug!("Skipping empty clip");
            return Ok(());
        }

        self.busy.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let result = link.play(&clip).await;
        self.busy.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => {
                self.clips_played.fetch_add(1, Ordering::SeqCst);
                debug!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    clip_ms = clip.duration_ms(),
                    "Clip finished"
                );
            }
            Err(e) => warn!(error = %e, "Clip playback failed"),
        }
        result
    }
}

/// Watch a connection's events and start recovery on the first failure.
fn spawn_monitor(
    inner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) -> JoinHandle<()> {
    let task: BoxFuture<'static, ()> = async move {
        let reason = match events.recv().await {
            Some(TransportEvent::Error(reason)) => reason,
            Some(TransportEvent::Closed) | None => "voice connection closed".to_string(),
        };
        if let Some(inner) = inner.upgrade() {
            inner.recover(epoch, reason).await;
        }
    }
    .boxed();
    tokio::spawn(task)
}

/// The single consumer of the playback queue.
async fn playback_worker(inner: Weak<Inner>, mut jobs: mpsc::UnboundedReceiver<PlaybackJob>) {
    while let Some(job) = jobs.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let result = inner.play_now(job.clip).await;
        inner.pending.fetch_sub(1, Ordering::SeqCst);
        // The caller may have stopped waiting
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::testing::FakeTransport;

    fn manager(transport: &Arc<FakeTransport>, attempts: u32) -> VoiceSessionManager {
        VoiceSessionManager::new(transport.clone(), Duration::from_millis(200), attempts)
    }

    fn clip(samples: usize) -> AudioClip {
        AudioClip {
            data: vec![1; samples * 2],
            channels: 1,
            sample_rate: 48_000,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<VoiceEvent>) -> VoiceEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for voice event")
            .expect("event channel closed")
    }

    fn state_of(event: &VoiceEvent) -> Option<VoiceState> {
        match event {
            VoiceEvent::StateChanged { state, .. } => Some(*state),
            VoiceEvent::ReconnectFailed { .. } => None,
        }
    }

    #[tokio::test]
    async fn test_join_and_play() {
        let transport = FakeTransport::new(Duration::from_millis(5));
        let voice = manager(&transport, 2);

        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();
        assert_eq!(voice.state(), VoiceState::Ready);
        assert_eq!(voice.status().channel_id.as_deref(), Some("c1"));

        voice.play_clip(clip(4)).await.unwrap();
        let link = transport.last_link().unwrap();
        let plays = link.plays();
        assert_eq!(plays.len(), 1);
        // Mono input arrives at the link as stereo
        assert_eq!(plays[0].channels, 2);
        assert_eq!(plays[0].bytes, 16);
        assert_eq!(voice.status().clips_played, 1);
        assert!(!voice.status().busy);
    }

    #[tokio::test]
    async fn test_join_same_channel_is_noop() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = manager(&transport, 2);

        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_switching_channel_replaces_session() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = manager(&transport, 2);

        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();
        let first = transport.last_link().unwrap();
        voice.join(VoiceTarget::new("g", "c2")).await.unwrap();

        assert_eq!(transport.connect_count(), 2);
        assert!(first.is_closed());
        assert_eq!(transport.last_link().unwrap().target, VoiceTarget::new("g", "c2"));
        assert_eq!(voice.current_target(), Some(VoiceTarget::new("g", "c2")));
    }

    #[tokio::test]
    async fn test_play_without_session_fails_fast() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = manager(&transport, 2);

        assert_eq!(voice.play_clip(clip(2)).await, Err(ResponderError::NotConnected));
        assert_eq!(voice.status().pending_playback, 0);
    }

    #[tokio::test]
    async fn test_join_failure_and_timeout() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = manager(&transport, 2);

        transport.fail_next(1);
        let err = voice.join(VoiceTarget::new("g", "c1")).await.unwrap_err();
        assert!(matches!(err, ResponderError::JoinFailed { ref channel_id, .. } if channel_id == "c1"));
        assert_eq!(voice.state(), VoiceState::Disconnected);

        transport.hang_connects(true);
        let err = voice.join(VoiceTarget::new("g", "c1")).await.unwrap_err();
        match err {
            ResponderError::JoinFailed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(voice.state(), VoiceState::Disconnected);
        assert_eq!(voice.current_target(), None);
    }

    #[tokio::test]
    async fn test_concurrent_playback_never_overlaps() {
        let transport = FakeTransport::new(Duration::from_millis(30));
        let voice = manager(&transport, 2);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();

        let a = voice.clone();
        let b = voice.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.play_clip(clip(8)).await }),
            tokio::spawn(async move { b.play_clip(clip(8)).await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let mut plays = transport.last_link().unwrap().plays();
        assert_eq!(plays.len(), 2);
        plays.sort_by_key(|p| p.start);
        assert!(plays[0].end <= plays[1].start, "playback intervals overlap");
    }

    #[tokio::test]
    async fn test_queued_clips_play_in_order() {
        let transport = FakeTransport::new(Duration::from_millis(5));
        let voice = manager(&transport, 2);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();

        let tickets: Vec<_> = (1..=4)
            .map(|n| voice.enqueue_clip(clip(n)).unwrap())
            .collect();
        for ticket in tickets {
            ticket.wait().await.unwrap();
        }

        let sizes: Vec<_> = transport.last_link().unwrap().plays().iter().map(|p| p.bytes).collect();
        assert_eq!(sizes, vec![4, 8, 12, 16]);
    }

    #[tokio::test]
    async fn test_transport_error_reconnects_same_channel() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = manager(&transport, 2);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();

        let mut events = voice.subscribe();
        transport.inject_error("socket reset");

        let mut seen = Vec::new();
        while seen.last() != Some(&VoiceState::Ready) {
            if let Some(state) = state_of(&next_event(&mut events).await) {
                seen.push(state);
            }
        }
        assert_eq!(
            seen,
            vec![VoiceState::Error, VoiceState::Reconnecting, VoiceState::Ready]
        );
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(voice.current_target(), Some(VoiceTarget::new("g", "c1")));

        // The recovered session plays on the new link
        voice.play_clip(clip(2)).await.unwrap();
        assert_eq!(transport.last_link().unwrap().plays().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_reports_once() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = manager(&transport, 2);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();

        let mut events = voice.subscribe();
        transport.fail_next(2);
        transport.inject_error("socket reset");

        let mut failures = 0;
        loop {
            let event = next_event(&mut events).await;
            if let Some(err) = event.as_error() {
                assert!(matches!(err, ResponderError::ReconnectFailed { attempts: 2, .. }));
                failures += 1;
            }
            if voice.state() == VoiceState::Disconnected && failures > 0 {
                break;
            }
        }

        // Nothing else arrives afterwards
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(event) = events.try_recv() {
            assert!(event.as_error().is_none(), "duplicate reconnect failure");
        }
        assert_eq!(failures, 1);
        assert_eq!(transport.connect_count(), 3);
        assert_eq!(voice.current_target(), None);
        assert_eq!(voice.play_clip(clip(1)).await, Err(ResponderError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_ignores_late_transport_errors() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = manager(&transport, 2);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();

        assert!(voice.disconnect().await);
        assert!(transport.last_link().unwrap().is_closed());
        transport.inject_error("late error");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(voice.state(), VoiceState::Disconnected);
        assert_eq!(transport.connect_count(), 1);
        assert!(!voice.disconnect().await);
    }

    #[tokio::test]
    async fn test_disconnect_during_playback_frees_the_queue() {
        let transport = FakeTransport::new(Duration::from_millis(5));
        let voice = manager(&transport, 2);

        transport.stall_playback(true);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();
        let stuck = voice.enqueue_clip(clip(4)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(voice.status().busy);

        assert!(voice.disconnect().await);
        let result = tokio::time::timeout(Duration::from_secs(2), stuck.wait())
            .await
            .expect("clip in flight never settled");
        assert!(matches!(result, Err(ResponderError::PlaybackFailed(_))));
        assert!(!voice.status().busy);

        // The playback worker is free again for the next session
        transport.stall_playback(false);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), voice.play_clip(clip(2)))
            .await
            .expect("playback wedged after rejoin")
            .unwrap();
        assert_eq!(transport.last_link().unwrap().plays().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_reconnect_is_immediate() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = VoiceSessionManager::new(transport.clone(), Duration::from_secs(10), 3);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();

        let mut events = voice.subscribe();
        transport.hang_connects(true);
        transport.inject_error("socket reset");
        while state_of(&next_event(&mut events).await) != Some(VoiceState::Reconnecting) {}

        let existed = tokio::time::timeout(Duration::from_millis(500), voice.disconnect())
            .await
            .expect("disconnect waited for the reconnect attempt");
        assert!(existed);
        assert_eq!(voice.state(), VoiceState::Disconnected);
        assert_eq!(voice.current_target(), None);
    }

    #[tokio::test]
    async fn test_join_during_reconnect_wins() {
        let transport = FakeTransport::new(Duration::ZERO);
        let voice = VoiceSessionManager::new(transport.clone(), Duration::from_millis(300), 1);
        voice.join(VoiceTarget::new("g", "c1")).await.unwrap();

        let mut events = voice.subscribe();
        transport.hang_connects(true);
        transport.inject_error("socket reset");
        while state_of(&next_event(&mut events).await) != Some(VoiceState::Reconnecting) {}

        transport.hang_connects(false);
        tokio::time::timeout(Duration::from_millis(250), voice.join(VoiceTarget::new("g", "c2")))
            .await
            .expect("join waited for the reconnect attempt")
            .unwrap();

        // The abandoned recovery times out later without touching the new session
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(voice.state(), VoiceState::Ready);
        assert_eq!(voice.current_target(), Some(VoiceTarget::new("g", "c2")));
        while let Ok(event) = events.try_recv() {
            assert!(event.as_error().is_none(), "superseded recovery reported a failure");
        }
    }
}
