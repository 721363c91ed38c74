//! WebRTC signaling server with shared peer presence.
//!
//! Which peers are connected and which are broadcasting lives in a shared
//! key-value store behind [`state::PresenceTracker`], so several server
//! instances can serve the same deployment.

pub mod config;
pub mod protocol;
pub mod server;
pub mod state;

use tokio::sync::mpsc;

pub type PeerId = String;
pub type WebSocketSender = mpsc::UnboundedSender<hyper_tungstenite::tungstenite::Message>;
