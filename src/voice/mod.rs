//! # Voice Module
//!
//! Outbound voice: one live session at a time, one clip playing at a time.
//!
//! ## Key Components:
//! - **transport**: Trait seam for whatever actually carries audio to the channel
//! - **gateway**: WebSocket voice gateway implementation of that seam
//! - **session**: Lifecycle state machine, automatic reconnect and the single
//!   playback queue

pub mod gateway;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use gateway::GatewayTransport;
pub use session::{VoiceEvent, VoiceSessionManager, VoiceState};
pub use transport::VoiceTarget;
