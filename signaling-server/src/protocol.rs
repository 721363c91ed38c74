use serde::{Deserialize, Serialize};

use crate::state::presence::PresenceSnapshot;
use crate::PeerId;

/// One entry of the browser's `RTCIceServer` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

/// ICE settings handed to clients in `welcome`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceConfig {
    pub servers: Vec<IceServer>,
    /// Free-form label, e.g. "stun" or "turn"
    pub mode: Option<String>,
}

// ============================================
// WebSocket Signaling Messages
// ============================================

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Start or stop sending media
    Broadcast { enabled: bool },
    /// SDP offer for another peer
    Offer { to: PeerId, sdp: String },
    /// SDP answer for another peer
    Answer { to: PeerId, sdp: String },
    /// ICE candidate for another peer
    Candidate { to: PeerId, candidate: String },
    /// Ask for a fresh presence snapshot
    State,
}

/// Messages sent by the server. Presence events carry the current snapshot
/// so clients can replace their peer lists wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome {
        id: PeerId,
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
        #[serde(rename = "iceServers", default, skip_serializing_if = "Vec::is_empty")]
        ice_servers: Vec<IceServer>,
        #[serde(rename = "iceMode", default, skip_serializing_if = "Option::is_none")]
        ice_mode: Option<String>,
    },
    State {
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
    },
    BroadcastState {
        id: PeerId,
        enabled: bool,
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
    },
    /// Snapshot fields are omitted when presence could not be read, so
    /// clients keep their current lists instead of clearing them.
    PeerLeft {
        id: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peers: Option<Vec<PeerId>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        broadcasting: Option<Vec<PeerId>>,
    },
    Offer { from: PeerId, sdp: String },
    Answer { from: PeerId, sdp: String },
    Candidate { from: PeerId, candidate: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn welcome(id: &str, snap: &PresenceSnapshot, ice: &IceConfig) -> Self {
        ServerMessage::Welcome {
            id: id.to_string(),
            peers: snap.sorted_peers(),
            broadcasting: snap.sorted_broadcasting(),
            ice_servers: ice.servers.clone(),
            ice_mode: ice.mode.clone(),
        }
    }

    pub fn state(snap: &PresenceSnapshot) -> Self {
        ServerMessage::State {
            peers: snap.sorted_peers(),
            broadcasting: snap.sorted_broadcasting(),
        }
    }

    pub fn broadcast_state(id: &str, enabled: bool, snap: &PresenceSnapshot) -> Self {
        ServerMessage::BroadcastState {
            id: id.to_string(),
            enabled,
            peers: snap.sorted_peers(),
            broadcasting: snap.sorted_broadcasting(),
        }
    }

    pub fn peer_left(id: &str, snap: &PresenceSnapshot) -> Self {
        ServerMessage::PeerLeft {
            id: id.to_string(),
            peers: Some(snap.sorted_peers()),
            broadcasting: Some(snap.sorted_broadcasting()),
        }
    }

    pub fn peer_left_without_snapshot(id: &str) -> Self {
        ServerMessage::PeerLeft {
            id: id.to_string(),
            peers: None,
            broadcasting: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }
}

/// Body of `GET /api/presence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub peers: Vec<PeerId>,
    pub broadcasting: Vec<PeerId>,
}

impl From<&PresenceSnapshot> for PresenceResponse {
    fn from(snap: &PresenceSnapshot) -> Self {
        Self {
            peers: snap.sorted_peers(),
            broadcasting: snap.sorted_broadcasting(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_client_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"broadcast","enabled":true}"#).unwrap();
        assert_eq!(msg, ClientMessage::Broadcast { enabled: true });

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"candidate","to":"b","candidate":"c1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Candidate {
                to: "b".into(),
                candidate: "c1".into()
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"state"}"#).unwrap();
        assert_eq!(msg, ClientMessage::State);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"register"}"#).is_err());
    }

    #[test]
    fn presence_events_carry_sorted_snapshot() {
        let snap = PresenceSnapshot {
            peers: ["B", "A"].iter().map(|s| s.to_string()).collect(),
            broadcasting: ["A"].iter().map(|s| s.to_string()).collect(),
        };
        let value = serde_json::to_value(ServerMessage::broadcast_state("A", true, &snap)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "broadcast-state",
                "id": "A",
                "enabled": true,
                "peers": ["A", "B"],
                "broadcasting": ["A"]
            })
        );

        let value = serde_json::to_value(ServerMessage::peer_left("C", &snap)).unwrap();
        assert_eq!(value["type"], "peer-left");
        assert_eq!(value["peers"], json!(["A", "B"]));
    }

    #[test]
    fn peer_left_without_snapshot_omits_lists() {
        let value = serde_json::to_value(ServerMessage::peer_left_without_snapshot("A")).unwrap();
        assert_eq!(value, json!({"type": "peer-left", "id": "A"}));
    }

    #[test]
    fn welcome_carries_ice_settings() {
        let ice = IceConfig {
            servers: vec![
                IceServer {
                    urls: IceUrls::One("stun:stun.example.org:3478".into()),
                    username: None,
                    credential: None,
                },
                IceServer {
                    urls: IceUrls::Many(vec!["turn:turn.example.org:3478?transport=udp".into()]),
                    username: Some("u".into()),
                    credential: Some("p".into()),
                },
            ],
            mode: Some("turn".into()),
        };
        let value = serde_json::to_value(ServerMessage::welcome("A", &PresenceSnapshot::default(), &ice)).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["iceMode"], "turn");
        assert_eq!(value["iceServers"][0], json!({"urls": "stun:stun.example.org:3478"}));
        assert_eq!(
            value["iceServers"][1],
            json!({"urls": ["turn:turn.example.org:3478?transport=udp"], "username": "u", "credential": "p"})
        );

        let bare = serde_json::to_value(ServerMessage::welcome("A", &PresenceSnapshot::default(), &IceConfig::default()))
            .unwrap();
        assert!(bare.get("iceServers").is_none());
        assert!(bare.get("iceMode").is_none());
    }

    #[test]
    fn relayed_signal_names_sender() {
        let value = serde_json::to_value(ServerMessage::Offer {
            from: "a".into(),
            sdp: "v=0".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "offer", "from": "a", "sdp": "v=0"}));
    }
}
