//! # Conversational Memory
//!
//! A bounded, time-decayed log of prior exchanges. Recent entries are replayed
//! to the completion service as role/content pairs so the persona stays
//! consistent across events.
//!
//! ## Retention rules:
//! - **Max age**: entries older than `memory.max_age_secs` are never returned and
//!   are physically removed by the periodic sweep
//! - **Recent window**: a read returns at most `memory.recent_window` entries,
//!   the newest ones, in insertion order
//!
//! ## Thread Safety:
//! The store is shared as `Arc<MemoryStore>`. Appends and reads take a short
//! `RwLock`; nothing is held across an `.await`.

use crate::config::MemoryConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Who produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One remembered message. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub speaker: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(role: Role, speaker: impl Into<String>, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            speaker: speaker.into(),
            content: content.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_age_secs: u64,
    /// `None` when the age does not fit a chrono duration; nothing expires then
    max_age: Option<ChronoDuration>,
    recent_window: usize,
}

impl Limits {
    /// Oldest timestamp still kept at `now`, or `None` to keep everything.
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.max_age.and_then(|age| now.checked_sub_signed(age))
    }

    fn keeps(self, now: DateTime<Utc>) -> impl Fn(&ConversationEntry) -> bool {
        let cutoff = self.cutoff(now);
        move |e| cutoff.map_or(true, |c| e.timestamp >= c)
    }
}

/// Insertion-ordered conversation log with age and window limits.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<Vec<ConversationEntry>>,
    limits: RwLock<Limits>,
}

/// Summary used by the health and metrics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub entries: usize,
    pub max_age_secs: u64,
    pub recent_window: usize,
    pub oldest: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            limits: RwLock::new(Self::limits_from(config)),
        }
    }

    fn limits_from(config: &MemoryConfig) -> Limits {
        Limits {
            max_age_secs: config.max_age_secs,
            max_age: i64::try_from(config.max_age_secs)
                .ok()
                .and_then(ChronoDuration::try_seconds),
            recent_window: config.recent_window,
        }
    }

    fn limits(&self) -> Limits {
        *self.limits.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply new age and window limits (runtime config update).
    pub fn set_limits(&self, config: &MemoryConfig) {
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = Self::limits_from(config);
    }

    /// Append an entry. Expired entries are pruned on the way in.
    pub fn append(&self, entry: ConversationEntry) {
        let keep = self.limits().keeps(Utc::now());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry);
        entries.retain(|e| keep(e));
    }

    /// The most recent non-expired entries as seen at `now`, oldest first.
    pub fn recent_at(&self, now: DateTime<Utc>) -> Vec<ConversationEntry> {
        let limits = self.limits();
        let keep = limits.keeps(now);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let live: Vec<&ConversationEntry> = entries.iter().filter(|e| keep(*e)).collect();
        let skip = live.len().saturating_sub(limits.recent_window);
        live.into_iter().skip(skip).cloned().collect()
    }

    pub fn recent(&self) -> Vec<ConversationEntry> {
        self.recent_at(Utc::now())
    }

    /// Drop every entry older than the max age as seen at `now`.
    /// Returns the number of entries removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let keep = self.limits().keeps(now);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| keep(e));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> MemorySummary {
        let limits = self.limits();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        MemorySummary {
            entries: entries.len(),
            max_age_secs: limits.max_age_secs,
            recent_window: limits.recent_window,
            oldest: entries.first().map(|e| e.timestamp),
        }
    }
}

/// Spawn the periodic sweep. The task lives until the returned handle is aborted.
pub fn spawn_sweeper(store: Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.sweep_at(Utc::now());
            if removed > 0 {
                debug!(removed, remaining = store.len(), "Swept expired conversation entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_age_secs: u64, recent_window: usize) -> MemoryConfig {
        MemoryConfig {
            max_age_secs,
            sweep_interval_secs: 3600,
            recent_window,
        }
    }

    fn entry(content: &str, timestamp: DateTime<Utc>) -> ConversationEntry {
        ConversationEntry::new(Role::User, "ada", content, timestamp)
    }

    #[test]
    fn test_recent_filters_expired_entries() {
        let store = MemoryStore::new(&config(60, 20));
        let now = Utc::now();
        store.append(entry("fresh", now - ChronoDuration::seconds(10)));
        store.append(entry("also fresh", now));

        let later = now + ChronoDuration::seconds(55);
        let recent = store.recent_at(later);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "also fresh");

        for e in &recent {
            assert!(later - e.timestamp <= ChronoDuration::seconds(60));
        }
    }

    #[test]
    fn test_recent_caps_to_window_keeping_newest() {
        let store = MemoryStore::new(&config(3600, 3));
        let now = Utc::now();
        for i in 0..10 {
            store.append(entry(&format!("m{}", i), now + ChronoDuration::milliseconds(i)));
        }

        let recent = store.recent_at(now);
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = MemoryStore::new(&config(60, 20));
        let now = Utc::now();
        store.append(entry("a", now));
        store.append(entry("b", now + ChronoDuration::seconds(30)));

        assert_eq!(store.sweep_at(now + ChronoDuration::seconds(75)), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.sweep_at(now + ChronoDuration::seconds(75)), 0);
    }

    #[test]
    fn test_append_prunes_stale_entries() {
        let store = MemoryStore::new(&config(60, 20));
        store.append(entry("ancient", Utc::now() - ChronoDuration::hours(2)));
        store.append(entry("now", Utc::now()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_limits() {
        let store = MemoryStore::new(&config(3600, 20));
        let now = Utc::now();
        for i in 0..5 {
            store.append(entry(&i.to_string(), now));
        }
        store.set_limits(&config(3600, 2));
        assert_eq!(store.recent_at(now).len(), 2);
        assert_eq!(store.summary().recent_window, 2);
    }

    #[test]
    fn test_huge_max_age_keeps_everything() {
        let now = Utc::now();
        for max_age_secs in [10_000_000_000_000, u64::MAX] {
            let store = MemoryStore::new(&config(max_age_secs, 20));
            store.append(entry("old", now - ChronoDuration::days(365)));
            store.append(entry("new", now));

            assert_eq!(store.recent().len(), 2);
            assert_eq!(store.sweep_at(now), 0);
            assert_eq!(store.summary().max_age_secs, max_age_secs);
        }
    }

    #[tokio::test]
    async fn test_sweeper_runs_in_background() {
        let store = Arc::new(MemoryStore::new(&config(1, 20)));
        store.append(entry("short lived", Utc::now()));

        let handle = spawn_sweeper(store.clone(), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
