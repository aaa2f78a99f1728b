//! In-memory voice transport for tests.

use crate::audio::AudioClip;
use crate::error::{ResponderError, ResponderResult};
use crate::voice::transport::{TransportEvent, VoiceConnection, VoiceLink, VoiceTarget, VoiceTransport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone)]
pub struct PlayRecord {
    pub start: Instant,
    pub end: Instant,
    pub bytes: usize,
    pub channels: u16,
}

pub struct FakeLink {
    pub target: VoiceTarget,
    delay: Duration,
    /// Clips never finish on their own; they fail once the link is closed
    stall: bool,
    plays: Mutex<Vec<PlayRecord>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl FakeLink {
    pub fn plays(&self) -> Vec<PlayRecord> {
        self.plays.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceLink for FakeLink {
    async fn play(&self, clip: &AudioClip) -> ResponderResult<()> {
        if self.is_closed() {
            return Err(ResponderError::PlaybackFailed("link closed".into()));
        }
        if self.stall {
            let mut closed = self.closed_tx.subscribe();
            let _ = closed.wait_for(|closed| *closed).await;
            return Err(ResponderError::PlaybackFailed("link closed".into()));
        }
        let start = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.plays.lock().unwrap().push(PlayRecord {
            start,
            end: Instant::now(),
            bytes: clip.data.len(),
            channels: clip.channels,
        });
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
    }
}

/// Transport whose connections live in memory and can be failed on demand.
pub struct FakeTransport {
    play_delay: Duration,
    connects: AtomicUsize,
    fail_remaining: AtomicUsize,
    hang: AtomicBool,
    stall: AtomicBool,
    links: Mutex<Vec<Arc<FakeLink>>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeTransport {
    pub fn new(play_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            play_delay,
            connects: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            links: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
        })
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Make connection attempts never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Links created from now on never finish a clip until closed.
    pub fn stall_playback(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_link(&self) -> Option<Arc<FakeLink>> {
        self.links.lock().unwrap().last().cloned()
    }

    /// Signal a transport error on the most recent connection.
    pub fn inject_error(&self, reason: &str) {
        if let Some(sender) = self.senders.lock().unwrap().last() {
            let _ = sender.send(TransportEvent::Error(reason.to_string()));
        }
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(&self, target: &VoiceTarget) -> ResponderResult<VoiceConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ResponderError::UpstreamError("connection refused".into()));
        }

        let link = Arc::new(FakeLink {
            target: target.clone(),
            delay: self.play_delay,
            stall: self.stall.load(Ordering::SeqCst),
            plays: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closed_tx: watch::channel(false).0,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        self.links.lock().unwrap().push(link.clone());
        self.senders.lock().unwrap().push(tx);

        Ok(VoiceConnection { link, events: rx })
    }
}
