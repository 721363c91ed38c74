use std::sync::Arc;

use log::info;

use super::memory_store::MemoryPresence;
use super::presence::{PresenceError, PresenceTracker};
use crate::config::ServerConfig;

/// Backend kind picked at startup, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Redis,
    Memory,
}

/// Build the presence tracker for `config`.
///
/// Without a Redis URL presence stays in process memory. A configured Redis
/// that cannot be reached is an error: falling back to local state would
/// split presence from the other instances sharing the store.
pub async fn connect_presence(
    config: &ServerConfig,
) -> Result<(Arc<dyn PresenceTracker>, BackendKind), PresenceError> {
    #[cfg(feature = "redis-backend")]
    {
        if let Some(url) = config.redis_url.as_deref() {
            let tracker = super::redis_store::RedisPresence::connect(url, &config.presence_prefix).await?;
            info!(
                "Redis presence enabled (keys {}, {}).",
                tracker.keys().peers,
                tracker.keys().broadcasting
            );
            return Ok((Arc::new(tracker), BackendKind::Redis));
        }
    }

    #[cfg(not(feature = "redis-backend"))]
    {
        if config.redis_url.is_some() {
            return Err(PresenceError::unavailable(
                "SIGNALING_REDIS_URL set but built without redis-backend",
            ));
        }
    }

    info!("Redis presence disabled (SIGNALING_REDIS_URL not set); presence is local to this instance.");
    Ok((Arc::new(MemoryPresence::new(&config.presence_prefix)), BackendKind::Memory))
}
