use std::collections::HashSet;

use async_trait::async_trait;
use log::debug;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;

use super::presence::{cancellable, PresenceKeys, PresenceSnapshot, PresenceTracker, Result};

/// [`PresenceTracker`] backed by two Redis sets.
///
/// `ConnectionManager` is a multiplexed handle that reconnects on its own;
/// cloning it per call is cheap and lets operations run concurrently.
#[derive(Clone)]
pub struct RedisPresence {
    conn: ConnectionManager,
    keys: PresenceKeys,
}

impl RedisPresence {
    pub fn new(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            keys: PresenceKeys::new(prefix),
        }
    }

    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix))
    }

    pub fn keys(&self) -> &PresenceKeys {
        &self.keys
    }
}

#[async_trait]
impl PresenceTracker for RedisPresence {
    async fn reset(&self, cancel: &CancellationToken) -> Result<()> {
        let mut conn = self.conn.clone();
        cancellable(cancel, async move {
            conn.del::<_, ()>(vec![self.keys.peers.as_str(), self.keys.broadcasting.as_str()])
                .await?;
            debug!("redis presence reset ({}, {})", self.keys.peers, self.keys.broadcasting);
            Ok(())
        })
        .await
    }

    async fn add_peer(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        cancellable(cancel, async move {
            conn.sadd::<_, _, ()>(&self.keys.peers, id).await?;
            Ok(())
        })
        .await
    }

    async fn remove_peer(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        cancellable(cancel, async move {
            // MULTI/EXEC: no client sees the id gone from one set but not the other.
            redis::pipe()
                .atomic()
                .srem(&self.keys.peers, id)
                .ignore()
                .srem(&self.keys.broadcasting, id)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn set_broadcast(&self, cancel: &CancellationToken, id: &str, enabled: bool) -> Result<()> {
        let mut conn = self.conn.clone();
        cancellable(cancel, async move {
            if enabled {
                conn.sadd::<_, _, ()>(&self.keys.broadcasting, id).await?;
            } else {
                conn.srem::<_, _, ()>(&self.keys.broadcasting, id).await?;
            }
            Ok(())
        })
        .await
    }

    async fn state(&self, cancel: &CancellationToken) -> Result<PresenceSnapshot> {
        let mut conn = self.conn.clone();
        cancellable(cancel, async move {
            // Plain pipeline, one round trip; not a transactional read.
            let (peers, broadcasting): (HashSet<String>, HashSet<String>) = redis::pipe()
                .smembers(&self.keys.peers)
                .smembers(&self.keys.broadcasting)
                .query_async(&mut conn)
                .await?;
            Ok(PresenceSnapshot { peers, broadcasting })
        })
        .await
    }
}
