use std::collections::HashMap;

use hyper_tungstenite::tungstenite::Message;
use log::warn;

use crate::protocol::ServerMessage;
use crate::{PeerId, WebSocketSender};

/// Sockets held by this server instance (peer_id -> sender).
///
/// Presence is shared through the tracker; relays only reach peers whose
/// socket lives here.
pub struct SignalingState {
    pub peer_senders: HashMap<PeerId, WebSocketSender>,
}

impl SignalingState {
    pub fn new() -> Self {
        Self {
            peer_senders: HashMap::new(),
        }
    }

    pub fn register(&mut self, peer_id: PeerId, sender: WebSocketSender) {
        self.peer_senders.insert(peer_id, sender);
    }

    pub fn unregister(&mut self, peer_id: &str) {
        self.peer_senders.remove(peer_id);
    }

    /// Returns false when `peer_id` has no socket on this instance.
    pub fn send_to(&self, peer_id: &str, msg: &ServerMessage) -> bool {
        let Some(sender) = self.peer_senders.get(peer_id) else {
            return false;
        };
        match serde_json::to_string(msg) {
            Ok(json) => sender.send(Message::Text(json)).is_ok(),
            Err(e) => {
                warn!("Failed to encode message for {}: {}", peer_id, e);
                false
            }
        }
    }

    pub fn broadcast(&self, msg: &ServerMessage) {
        self.broadcast_except(msg, None);
    }

    pub fn broadcast_except(&self, msg: &ServerMessage, skip: Option<&str>) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        for (peer_id, sender) in self.peer_senders.iter() {
            if Some(peer_id.as_str()) == skip {
                continue;
            }
            let _ = sender.send(Message::Text(json.clone()));
        }
    }
}

impl Default for SignalingState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn text(msg: Message) -> serde_json::Value {
        match msg {
            Message::Text(s) => serde_json::from_str(&s).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn send_to_unknown_peer_reports_miss() {
        let state = SignalingState::new();
        assert!(!state.send_to("nobody", &ServerMessage::error("x")));
    }

    #[test]
    fn broadcast_except_skips_origin() {
        let mut state = SignalingState::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        state.register("a".into(), tx_a);
        state.register("b".into(), tx_b);

        state.broadcast_except(&ServerMessage::error("hello"), Some("a"));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(text(rx_b.try_recv().unwrap())["message"], "hello");

        state.unregister("b");
        state.broadcast(&ServerMessage::error("again"));
        assert_eq!(text(rx_a.try_recv().unwrap())["message"], "again");
        assert!(rx_b.try_recv().is_err());
    }
}
