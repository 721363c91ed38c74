pub mod backends;
pub mod memory_store;
pub mod presence;
#[cfg(feature = "redis-backend")]
pub mod redis_store;
pub mod signaling;

pub use backends::{connect_presence, BackendKind};
pub use memory_store::{MemoryPresence, MemoryStore};
pub use presence::{PresenceError, PresenceKeys, PresenceSnapshot, PresenceTracker};
#[cfg(feature = "redis-backend")]
pub use redis_store::RedisPresence;
pub use signaling::SignalingState;

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::protocol::IceConfig;

/// Shared server state handed to every connection.
#[derive(Clone)]
pub struct AppState {
    pub presence: Arc<dyn PresenceTracker>,
    pub signaling: Arc<Mutex<SignalingState>>,
    /// Cancelled on shutdown; connections derive child tokens from it.
    pub shutdown: CancellationToken,
    /// Connection tasks, drained before the process exits.
    pub tasks: TaskTracker,
    pub ice: IceConfig,
}

impl AppState {
    pub fn new(presence: Arc<dyn PresenceTracker>) -> Self {
        Self {
            presence,
            signaling: Arc::new(Mutex::new(SignalingState::new())),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            ice: IceConfig::default(),
        }
    }

    pub fn with_ice(mut self, ice: IceConfig) -> Self {
        self.ice = ice;
        self
    }
}
