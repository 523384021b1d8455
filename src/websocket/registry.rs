//! Desired-subscription registry
//!
//! The registry is the single source of truth for what should be subscribed.
//! Callers mutate the desired set (`add`/`remove`); only the session loop
//! mutates acknowledgement state. Every reconnect replays [`snapshot`].
//!
//! [`snapshot`]: SubscriptionRegistry::snapshot

use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::subscription::SubscriptionKey;

/// Status of a desired subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Requested, not yet confirmed on the current connection
    Pending,
    /// Confirmed by the server on the current connection
    Active,
    /// Rejected by the server
    Failed,
}

/// One desired subscription and its acknowledgement state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub key: SubscriptionKey,
    /// Reset to false on every reconnect
    pub acknowledged: bool,
    /// Most recent server rejection, cleared on re-subscribe
    pub last_error: Option<String>,
}

impl SubscriptionEntry {
    fn new(key: SubscriptionKey) -> Self {
        Self {
            key,
            acknowledged: false,
            last_error: None,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        if self.acknowledged {
            SubscriptionStatus::Active
        } else if self.last_error.is_some() {
            SubscriptionStatus::Failed
        } else {
            SubscriptionStatus::Pending
        }
    }
}

/// Shared, insertion-ordered set of desired subscriptions
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<RwLock<IndexMap<SubscriptionKey, SubscriptionEntry>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key desired
    ///
    /// Returns `true` when a subscribe request is needed: the key was not
    /// tracked, or its last request was rejected (the error is cleared).
    /// Adding a key that is already pending or active is a no-op.
    pub async fn add(&self, key: SubscriptionKey) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&key) {
            Some(entry) if entry.last_error.is_some() => {
                entry.last_error = None;
                true
            }
            Some(_) => false,
            None => {
                entries.insert(key.clone(), SubscriptionEntry::new(key));
                true
            }
        }
    }

    /// Stop desiring a key. Returns `true` if it was tracked.
    pub async fn remove(&self, key: &SubscriptionKey) -> bool {
        let mut entries = self.entries.write().await;
        entries.shift_remove(key).is_some()
    }

    /// Record a server acknowledgement
    ///
    /// Returns `false` and changes nothing when the key is no longer desired,
    /// so a stale ack cannot bring an unsubscribed key back.
    pub async fn mark_acknowledged(&self, key: &SubscriptionKey) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.acknowledged = true;
                entry.last_error = None;
                true
            }
            None => false,
        }
    }

    /// Record a server rejection. No-op (returns `false`) for unknown keys.
    pub async fn mark_failed(&self, key: &SubscriptionKey, error: impl Into<String>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.acknowledged = false;
                entry.last_error = Some(error.into());
                true
            }
            None => false,
        }
    }

    /// Clear acknowledgement state ahead of a replay on a new connection
    pub async fn reset_acknowledgements(&self) {
        let mut entries = self.entries.write().await;
        for entry in entries.values_mut() {
            entry.acknowledged = false;
        }
    }

    /// All desired keys, in the order they were first added
    pub async fn snapshot(&self) -> Vec<SubscriptionKey> {
        let entries = self.entries.read().await;
        entries.keys().cloned().collect()
    }

    /// Get a copy of the entry for a key
    pub async fn entry(&self, key: &SubscriptionKey) -> Option<SubscriptionEntry> {
        let entries = self.entries.read().await;
        entries.get(key).cloned()
    }

    /// Check if a key is desired
    pub async fn contains(&self, key: &SubscriptionKey) -> bool {
        let entries = self.entries.read().await;
        entries.contains_key(key)
    }

    /// Check if a key is desired and acknowledged on the current connection
    pub async fn is_acknowledged(&self, key: &SubscriptionKey) -> bool {
        let entries = self.entries.read().await;
        entries.get(key).is_some_and(|entry| entry.acknowledged)
    }

    /// Number of desired keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of acknowledged keys
    pub async fn active_count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|entry| entry.acknowledged).count()
    }

    /// Drop every entry (session teardown)
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
