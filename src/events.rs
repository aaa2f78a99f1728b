//! # Inbound Events
//!
//! Everything the responder reacts to arrives as one `InboundEvent`. The chat
//! platform integration lives outside this service and posts events as tagged
//! JSON:
//!
//! ```json
//! {"type": "bit_donation", "username": "ada", "bits": 500, "message": "hi"}
//! ```
//!
//! Each kind maps to exactly one context template (or none for plain chat), and
//! knows which of its fields fill that template's placeholders.

use crate::error::{ResponderError, ResponderResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed set of events the responder can speak about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A direct chat message or operator transcript
    ChatMessage {
        username: String,
        content: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// A viewer paid bits to ask something
    BitDonation {
        username: String,
        bits: u64,
        message: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// A subscription or resubscription
    Subscription {
        username: String,
        months: u32,
        #[serde(default)]
        message: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Subscriptions gifted to other viewers
    GiftedSubs {
        username: String,
        count: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Another channel raided this one
    Raid {
        username: String,
        viewers: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// New followers accumulated over a period
    FollowerBatch {
        count: u32,
        minutes: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl InboundEvent {
    /// Short name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ChatMessage { .. } => "chat_message",
            InboundEvent::BitDonation { .. } => "bit_donation",
            InboundEvent::Subscription { .. } => "subscription",
            InboundEvent::GiftedSubs { .. } => "gifted_subs",
            InboundEvent::Raid { .. } => "raid",
            InboundEvent::FollowerBatch { .. } => "follower_batch",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InboundEvent::ChatMessage { timestamp, .. }
            | InboundEvent::BitDonation { timestamp, .. }
            | InboundEvent::Subscription { timestamp, .. }
            | InboundEvent::GiftedSubs { timestamp, .. }
            | InboundEvent::Raid { timestamp, .. }
            | InboundEvent::FollowerBatch { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the context template for this event, if any.
    pub fn template_name(&self) -> Option<&'static str> {
        match self {
            InboundEvent::ChatMessage { .. } => None,
            InboundEvent::BitDonation { .. } => Some("bit_donation"),
            InboundEvent::Subscription { .. } => Some("subscriber_announcement"),
            InboundEvent::GiftedSubs { .. } => Some("gifted_subs"),
            InboundEvent::Raid { .. } => Some("raid_announcement"),
            InboundEvent::FollowerBatch { .. } => Some("follower_announcement"),
        }
    }

    /// Placeholder values for the context template.
    pub fn template_data(&self) -> Vec<(&'static str, String)> {
        match self {
            InboundEvent::ChatMessage { .. } => Vec::new(),
            InboundEvent::BitDonation { username, bits, message, .. } => vec![
                ("username", username.clone()),
                ("bits", bits.to_string()),
                ("message", message.clone()),
            ],
            InboundEvent::Subscription { username, months, message, .. } => vec![
                ("username", username.clone()),
                ("months", months.to_string()),
                ("message", message.clone().unwrap_or_default()),
            ],
            InboundEvent::GiftedSubs { username, count, .. } => vec![
                ("username", username.clone()),
                ("count", count.to_string()),
            ],
            InboundEvent::Raid { username, viewers, .. } => vec![
                ("username", username.clone()),
                ("count", viewers.to_string()),
            ],
            InboundEvent::FollowerBatch { count, minutes, .. } => vec![
                ("count", count.to_string()),
                ("time", format!("{} minutes", minutes)),
            ],
        }
    }

    /// Text sent as the final user turn. Only chat carries free text of its own;
    /// other events are fully described by their context message.
    pub fn inbound_text(&self) -> Option<&str> {
        match self {
            InboundEvent::ChatMessage { content, .. } => Some(content.as_str()),
            _ => None,
        }
    }

    /// Who the event is attributed to in memory.
    pub fn speaker(&self) -> &str {
        match self {
            InboundEvent::ChatMessage { username, .. }
            | InboundEvent::BitDonation { username, .. }
            | InboundEvent::Subscription { username, .. }
            | InboundEvent::GiftedSubs { username, .. }
            | InboundEvent::Raid { username, .. } => username,
            InboundEvent::FollowerBatch { .. } => "followers",
        }
    }

    /// The user-side text remembered for this event.
    pub fn memory_text(&self) -> String {
        match self {
            InboundEvent::ChatMessage { content, .. } => content.clone(),
            InboundEvent::BitDonation { message, .. } => message.clone(),
            InboundEvent::Subscription { months, message, .. } => match message {
                Some(text) if !text.trim().is_empty() => text.clone(),
                _ => format!("Subscribed for {} months", months),
            },
            InboundEvent::GiftedSubs { count, .. } => format!("Gifted {} subscriptions", count),
            InboundEvent::Raid { viewers, .. } => format!("Raided with {} viewers", viewers),
            InboundEvent::FollowerBatch { count, minutes, .. } => {
                format!("{} new followers in {} minutes", count, minutes)
            }
        }
    }

    /// Reject events that cannot produce a meaningful request.
    pub fn validate(&self) -> ResponderResult<()> {
        match self {
            InboundEvent::FollowerBatch { count, .. } => {
                if *count == 0 {
                    return Err(ResponderError::InvalidEvent(
                        "follower batch must contain at least one follower".to_string(),
                    ));
                }
            }
            _ => {
                if self.speaker().trim().is_empty() {
                    return Err(ResponderError::InvalidEvent(format!(
                        "{} requires a username",
                        self.kind()
                    )));
                }
            }
        }

        if let InboundEvent::ChatMessage { content, .. } = self {
            if content.trim().is_empty() {
                return Err(ResponderError::InvalidEvent(
                    "chat message content is empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}
