//! Voice transport seam.
//!
//! A transport turns a `VoiceTarget` into a live `VoiceConnection`: a link that
//! can play one clip at a time, plus a channel of asynchronous events such as
//! dropped sockets. The session manager owns everything above this line.

use crate::audio::AudioClip;
use crate::error::ResponderResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity of a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceTarget {
    pub guild_id: String,
    pub channel_id: String,
}

impl VoiceTarget {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for VoiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// Asynchronous signals from a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport failed; the connection is no longer usable
    Error(String),
    /// The remote side closed the connection
    Closed,
}

/// Playback half of a live connection.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Play one stereo 16-bit clip and resolve when the player goes idle.
    async fn play(&self, clip: &AudioClip) -> ResponderResult<()>;

    /// Leave the channel and release the connection.
    async fn close(&self);
}

/// A freshly established connection.
pub struct VoiceConnection {
    pub link: Arc<dyn VoiceLink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for VoiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceConnection").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Join the target channel and complete the handshake.
    async fn connect(&self, target: &VoiceTarget) -> ResponderResult<VoiceConnection>;
}
