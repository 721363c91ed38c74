//! Presence and broadcast tracking.
//!
//! Two process-wide sets live in a shared key-value store: the peers that are
//! connected and the subset of them that are broadcasting media. Trackers are
//! a typed facade over the store. They hold no cache, so every call is a round
//! trip and several server instances can coordinate through the same keys.

use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::PeerId;

/// Namespace used when the configured prefix is empty.
pub const DEFAULT_PRESENCE_PREFIX: &str = "webrtc";

#[derive(Debug, Error)]
pub enum PresenceError {
    /// Connection failure, timeout, protocol error or an error reply.
    #[error("presence store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("presence operation cancelled")]
    Cancelled,
}

impl PresenceError {
    pub fn unavailable<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        PresenceError::StoreUnavailable(err.into())
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for PresenceError {
    fn from(err: redis::RedisError) -> Self {
        PresenceError::StoreUnavailable(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PresenceError>;

/// Store keys for one deployment namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceKeys {
    pub peers: String,
    pub broadcasting: String,
}

impl PresenceKeys {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim();
        let p = trimmed.strip_suffix(':').unwrap_or(trimmed);
        let p = if p.is_empty() { DEFAULT_PRESENCE_PREFIX } else { p };
        Self {
            peers: format!("{}:peers", p),
            broadcasting: format!("{}:broadcasting", p),
        }
    }
}

impl Default for PresenceKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_PREFIX)
    }
}

/// Both sets as read by [`PresenceTracker::state`].
///
/// The two reads are grouped but not transactional, so a concurrent
/// `remove_peer` may be visible in one set and not yet in the other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub peers: HashSet<PeerId>,
    pub broadcasting: HashSet<PeerId>,
}

impl PresenceSnapshot {
    pub fn sorted_peers(&self) -> Vec<PeerId> {
        sorted(&self.peers)
    }

    pub fn sorted_broadcasting(&self) -> Vec<PeerId> {
        sorted(&self.broadcasting)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.broadcasting.is_empty()
    }
}

fn sorted(set: &HashSet<PeerId>) -> Vec<PeerId> {
    let mut out: Vec<PeerId> = set.iter().cloned().collect();
    out.sort();
    out
}

/// Presence tracking contract shared by every backend.
///
/// All operations are idempotent. None of them retries; a caller that gets
/// an error decides whether to try again. `cancel` aborts the in-flight
/// request and yields [`PresenceError::Cancelled`].
#[async_trait]
pub trait PresenceTracker: Send + Sync {
    /// Delete both sets in one request. A no-op when they do not exist.
    async fn reset(&self, cancel: &CancellationToken) -> Result<()>;

    async fn add_peer(&self, cancel: &CancellationToken, id: &str) -> Result<()>;

    /// Remove `id` from peers and broadcasting as one transactional group.
    async fn remove_peer(&self, cancel: &CancellationToken, id: &str) -> Result<()>;

    /// Add or remove `id` from broadcasting. Peer membership is not checked.
    async fn set_broadcast(&self, cancel: &CancellationToken, id: &str, enabled: bool) -> Result<()>;

    async fn state(&self, cancel: &CancellationToken) -> Result<PresenceSnapshot>;
}

/// Race a store request against `cancel`. The request future is dropped when
/// the token fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, request: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(PresenceError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PresenceError::Cancelled),
        res = request => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prefix_falls_back_to_default() {
        assert_eq!(PresenceKeys::new("").peers, "webrtc:peers");
        assert_eq!(PresenceKeys::new("   ").broadcasting, "webrtc:broadcasting");
        assert_eq!(PresenceKeys::new(":").peers, "webrtc:peers");
    }

    #[test]
    fn prefix_trailing_colon_is_stripped() {
        let keys = PresenceKeys::new(" staging: ");
        assert_eq!(keys.peers, "staging:peers");
        assert_eq!(keys.broadcasting, "staging:broadcasting");
        assert_eq!(PresenceKeys::new("a:b").peers, "a:b:peers");
    }

    #[test]
    fn snapshot_sorted_views() {
        let snap = PresenceSnapshot {
            peers: ["b", "a", "c"].iter().map(|s| s.to_string()).collect(),
            broadcasting: ["c"].iter().map(|s| s.to_string()).collect(),
        };
        assert_eq!(snap.sorted_peers(), vec!["a", "b", "c"]);
        assert_eq!(snap.sorted_broadcasting(), vec!["c"]);
        assert!(!snap.is_empty());
        assert!(PresenceSnapshot::default().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let res = cancellable(&token, async { Ok::<_, PresenceError>(1) }).await;
        assert!(matches!(res, Err(PresenceError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_request() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let res = cancellable(&token, std::future::pending::<Result<()>>()).await;
        assert!(matches!(res, Err(PresenceError::Cancelled)));
    }
}
