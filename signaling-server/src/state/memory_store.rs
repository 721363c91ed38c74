use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::presence::{cancellable, PresenceError, PresenceKeys, PresenceSnapshot, PresenceTracker, Result};

/// In-process keyspace of string sets, shareable between trackers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryKeyspace>>,
}

#[derive(Default)]
struct MemoryKeyspace {
    sets: HashMap<String, HashSet<String>>,
    unavailable: bool,
}

impl MemoryKeyspace {
    fn check(&self) -> Result<()> {
        if self.unavailable {
            return Err(PresenceError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }

    fn sadd(&mut self, key: &str, member: &str) {
        self.sets.entry(key.to_string()).or_default().insert(member.to_string());
    }

    // Empty sets are dropped, the way Redis deletes a key when its last member goes.
    fn srem(&mut self, key: &str, member: &str) {
        if let Some(set) = self.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                self.sets.remove(key);
            }
        }
    }

    fn smembers(&self, key: &str) -> HashSet<String> {
        self.sets.get(key).cloned().unwrap_or_default()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: while unavailable every operation fails without
    /// touching state.
    pub async fn set_available(&self, available: bool) {
        self.inner.lock().await.unavailable = !available;
    }

    /// Number of non-empty keys held, across all namespaces.
    pub async fn key_count(&self) -> usize {
        self.inner.lock().await.sets.len()
    }
}

/// [`PresenceTracker`] over a [`MemoryStore`]. Each operation holds the
/// keyspace lock once, so grouped operations are atomic and `state` is in
/// fact a consistent snapshot here.
#[derive(Clone)]
pub struct MemoryPresence {
    store: MemoryStore,
    keys: PresenceKeys,
}

impl MemoryPresence {
    pub fn new(prefix: &str) -> Self {
        Self::with_store(MemoryStore::new(), prefix)
    }

    pub fn with_store(store: MemoryStore, prefix: &str) -> Self {
        Self {
            store,
            keys: PresenceKeys::new(prefix),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn keys(&self) -> &PresenceKeys {
        &self.keys
    }
}

#[async_trait]
impl PresenceTracker for MemoryPresence {
    async fn reset(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            let mut ks = self.store.inner.lock().await;
            ks.check()?;
            ks.sets.remove(&self.keys.peers);
            ks.sets.remove(&self.keys.broadcasting);
            debug!("memory presence reset ({})", self.keys.peers);
            Ok(())
        })
        .await
    }

    async fn add_peer(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        cancellable(cancel, async {
            let mut ks = self.store.inner.lock().await;
            ks.check()?;
            ks.sadd(&self.keys.peers, id);
            Ok(())
        })
        .await
    }

    async fn remove_peer(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        cancellable(cancel, async {
            let mut ks = self.store.inner.lock().await;
            ks.check()?;
            ks.srem(&self.keys.peers, id);
            ks.srem(&self.keys.broadcasting, id);
            Ok(())
        })
        .await
    }

    async fn set_broadcast(&self, cancel: &CancellationToken, id: &str, enabled: bool) -> Result<()> {
        cancellable(cancel, async {
            let mut ks = self.store.inner.lock().await;
            ks.check()?;
            if enabled {
                ks.sadd(&self.keys.broadcasting, id);
            } else {
                ks.srem(&self.keys.broadcasting, id);
            }
            Ok(())
        })
        .await
    }

    async fn state(&self, cancel: &CancellationToken) -> Result<PresenceSnapshot> {
        cancellable(cancel, async {
            let ks = self.store.inner.lock().await;
            ks.check()?;
            Ok(PresenceSnapshot {
                peers: ks.smembers(&self.keys.peers),
                broadcasting: ks.smembers(&self.keys.broadcasting),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn repeated_add_peer_is_idempotent() {
        let tracker = MemoryPresence::new("");
        let cancel = CancellationToken::new();
        for _ in 0..5 {
            tracker.add_peer(&cancel, "A").await.unwrap();
        }
        let snap = tracker.state(&cancel).await.unwrap();
        assert_eq!(snap.peers, set(&["A"]));
        assert!(snap.broadcasting.is_empty());
    }

    #[tokio::test]
    async fn remove_peer_clears_both_sets() {
        let tracker = MemoryPresence::new("");
        let cancel = CancellationToken::new();
        tracker.add_peer(&cancel, "A").await.unwrap();
        tracker.set_broadcast(&cancel, "A", true).await.unwrap();
        tracker.remove_peer(&cancel, "A").await.unwrap();
        assert!(tracker.state(&cancel).await.unwrap().is_empty());
        assert_eq!(tracker.store().key_count().await, 0);
    }

    #[tokio::test]
    async fn set_broadcast_does_not_require_membership() {
        let tracker = MemoryPresence::new("");
        let cancel = CancellationToken::new();
        tracker.set_broadcast(&cancel, "ghost", true).await.unwrap();
        let snap = tracker.state(&cancel).await.unwrap();
        assert!(snap.peers.is_empty());
        assert_eq!(snap.broadcasting, set(&["ghost"]));
    }

    #[tokio::test]
    async fn unavailable_store_fails_without_mutation() {
        let tracker = MemoryPresence::new("");
        let cancel = CancellationToken::new();
        tracker.add_peer(&cancel, "A").await.unwrap();
        tracker.set_broadcast(&cancel, "A", true).await.unwrap();

        tracker.store().set_available(false).await;
        assert!(matches!(tracker.reset(&cancel).await, Err(PresenceError::StoreUnavailable(_))));
        assert!(matches!(tracker.add_peer(&cancel, "B").await, Err(PresenceError::StoreUnavailable(_))));
        assert!(matches!(tracker.remove_peer(&cancel, "A").await, Err(PresenceError::StoreUnavailable(_))));
        assert!(matches!(
            tracker.set_broadcast(&cancel, "A", false).await,
            Err(PresenceError::StoreUnavailable(_))
        ));
        assert!(matches!(tracker.state(&cancel).await, Err(PresenceError::StoreUnavailable(_))));

        tracker.store().set_available(true).await;
        let snap = tracker.state(&cancel).await.unwrap();
        assert_eq!(snap.peers, set(&["A"]));
        assert_eq!(snap.broadcasting, set(&["A"]));
    }

    #[tokio::test]
    async fn cancelled_call_leaves_state_untouched() {
        let tracker = MemoryPresence::new("");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(tracker.add_peer(&cancel, "A").await, Err(PresenceError::Cancelled)));
        let fresh = CancellationToken::new();
        assert!(tracker.state(&fresh).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prefixes_isolate_deployments_on_one_store() {
        let store = MemoryStore::new();
        let blue = MemoryPresence::with_store(store.clone(), "blue:");
        let green = MemoryPresence::with_store(store.clone(), "green");
        let cancel = CancellationToken::new();

        blue.add_peer(&cancel, "A").await.unwrap();
        green.add_peer(&cancel, "B").await.unwrap();
        green.reset(&cancel).await.unwrap();

        assert_eq!(blue.state(&cancel).await.unwrap().peers, set(&["A"]));
        assert!(green.state(&cancel).await.unwrap().is_empty());
        assert_eq!(blue.keys().peers, "blue:peers");
    }
}
