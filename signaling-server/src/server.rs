use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hyper::{Body, Method, Request, Response, StatusCode};
use hyper_tungstenite::tungstenite::Message;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ClientMessage, PresenceResponse, ServerMessage};
use crate::state::presence::PresenceError;
use crate::state::AppState;
use crate::{PeerId, WebSocketSender};

/// Upper bound for presence cleanup once a connection is gone.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// WebSocket Connection Handler
// ============================================

pub async fn handle_connection(
    ws: hyper_tungstenite::WebSocketStream<hyper::upgrade::Upgraded>,
    addr: SocketAddr,
    state: AppState,
) {
    info!("WebSocket connection established from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let peer_id: PeerId = uuid::Uuid::new_v4().to_string();
    let cancel = state.shutdown.child_token();

    // Create channel for sending messages to this WebSocket
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    if let Err(e) = join_peer(&state, &cancel, &peer_id, &tx).await {
        warn!("Presence registration failed for {}: {}", addr, e);
        send_direct(&tx, &ServerMessage::error(format!("presence unavailable: {}", e)));
        let _ = tx.send(Message::Close(None));
        let _ = send_task.await;
        return;
    }
    info!("Registered peer {} from {}", peer_id, addr);

    // Handle incoming messages
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutting down connection for peer {}", peer_id);
                break;
            }
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if let Err(e) = handle_message(msg, &peer_id, &state, &cancel, &tx).await {
                                    warn!("Error handling message from {}: {}", peer_id, e);
                                    send_direct(&tx, &ServerMessage::error(e));
                                }
                            }
                            Err(e) => {
                                warn!("Failed to parse message: {}", e);
                                send_direct(&tx, &ServerMessage::error(format!("Invalid message format: {}", e)));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} closed connection", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => {
                break;
            }
        }
    }

    // Clean up when connection closes
    leave_peer(&state, &peer_id).await;
    cancel.cancel();
    send_task.abort();
}

async fn join_peer(
    state: &AppState,
    cancel: &CancellationToken,
    peer_id: &str,
    tx: &WebSocketSender,
) -> Result<(), PresenceError> {
    state.presence.add_peer(cancel, peer_id).await?;
    let snap = match state.presence.state(cancel).await {
        Ok(snap) => snap,
        Err(e) => {
            // Do not leave a peer behind that never got its welcome.
            if let Err(undo) = state.presence.remove_peer(cancel, peer_id).await {
                warn!("Failed to roll back presence for {}: {}", peer_id, undo);
            }
            return Err(e);
        }
    };

    let signaling = {
        let mut signaling = state.signaling.lock().await;
        signaling.register(peer_id.to_string(), tx.clone());
        signaling
    };
    signaling.send_to(peer_id, &ServerMessage::welcome(peer_id, &snap, &state.ice));
    signaling.broadcast_except(&ServerMessage::state(&snap), Some(peer_id));
    Ok(())
}

async fn leave_peer(state: &AppState, peer_id: &str) {
    state.signaling.lock().await.unregister(peer_id);

    // Runs after the connection token, and on shutdown the process token, have fired.
    let cleanup = CancellationToken::new();
    match tokio::time::timeout(CLEANUP_TIMEOUT, state.presence.remove_peer(&cleanup, peer_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to remove peer {} from presence: {}", peer_id, e),
        Err(_) => warn!("Timed out removing peer {} from presence", peer_id),
    }
    let msg = match tokio::time::timeout(CLEANUP_TIMEOUT, state.presence.state(&cleanup)).await {
        Ok(Ok(snap)) => ServerMessage::peer_left(peer_id, &snap),
        Ok(Err(e)) => {
            warn!("Failed to read presence after {} left: {}", peer_id, e);
            ServerMessage::peer_left_without_snapshot(peer_id)
        }
        Err(_) => {
            warn!("Timed out reading presence after {} left", peer_id);
            ServerMessage::peer_left_without_snapshot(peer_id)
        }
    };
    state.signaling.lock().await.broadcast(&msg);
    info!("Peer {} left", peer_id);
}

pub async fn handle_message(
    msg: ClientMessage,
    peer_id: &str,
    state: &AppState,
    cancel: &CancellationToken,
    sender: &WebSocketSender,
) -> Result<(), String> {
    match msg {
        ClientMessage::Broadcast { enabled } => {
            state
                .presence
                .set_broadcast(cancel, peer_id, enabled)
                .await
                .map_err(|e| e.to_string())?;
            let snap = state.presence.state(cancel).await.map_err(|e| e.to_string())?;
            info!("Peer {} broadcasting: {}", peer_id, enabled);
            state
                .signaling
                .lock()
                .await
                .broadcast(&ServerMessage::broadcast_state(peer_id, enabled, &snap));
        }
        ClientMessage::State => {
            let snap = state.presence.state(cancel).await.map_err(|e| e.to_string())?;
            send_direct(sender, &ServerMessage::state(&snap));
        }
        ClientMessage::Offer { to, sdp } => {
            info!("Forwarding offer from {} to {}", peer_id, to);
            relay(state, &to, ServerMessage::Offer { from: peer_id.to_string(), sdp }).await?;
        }
        ClientMessage::Answer { to, sdp } => {
            info!("Forwarding answer from {} to {}", peer_id, to);
            relay(state, &to, ServerMessage::Answer { from: peer_id.to_string(), sdp }).await?;
        }
        ClientMessage::Candidate { to, candidate } => {
            info!("Forwarding ICE candidate from {} to {}", peer_id, to);
            relay(
                state,
                &to,
                ServerMessage::Candidate {
                    from: peer_id.to_string(),
                    candidate,
                },
            )
            .await?;
        }
    }
    Ok(())
}

async fn relay(state: &AppState, to: &str, msg: ServerMessage) -> Result<(), String> {
    if state.signaling.lock().await.send_to(to, &msg) {
        Ok(())
    } else {
        warn!("Target peer {} not found", to);
        Err(format!("Target peer {} not found", to))
    }
}

fn send_direct(tx: &WebSocketSender, msg: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = tx.send(Message::Text(json));
    }
}

// ============================================
// HTTP Request Handler
// ============================================

fn with_cors(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    with_cors(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

pub async fn handle_request(
    mut req: Request<Body>,
    addr: SocketAddr,
    state: AppState,
) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    // CORS preflight
    if method == Method::OPTIONS {
        return Ok(with_cors(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Max-Age", "86400")
            .body(Body::empty())
            .unwrap());
    }

    if path == "/health" {
        return Ok(with_cors(Response::builder())
            .status(StatusCode::OK)
            .body(Body::from("ok"))
            .unwrap());
    }

    if path == "/api/presence" {
        if method != Method::GET {
            return Ok(with_cors(Response::builder())
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .body(Body::empty())
                .unwrap());
        }
        return Ok(match state.presence.state(&state.shutdown).await {
            Ok(snap) => {
                let body = serde_json::to_string(&PresenceResponse::from(&snap)).unwrap_or_default();
                json_response(StatusCode::OK, body)
            }
            Err(e) => {
                warn!("Presence snapshot failed: {}", e);
                let body = serde_json::json!({ "error": e.to_string() }).to_string();
                json_response(StatusCode::SERVICE_UNAVAILABLE, body)
            }
        });
    }

    // WebSocket upgrade
    if hyper_tungstenite::is_upgrade_request(&req) {
        match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                let tasks = state.tasks.clone();
                tasks.spawn(async move {
                    match websocket.await {
                        Ok(ws) => handle_connection(ws, addr, state).await,
                        Err(e) => warn!("WebSocket handshake with {} failed: {}", addr, e),
                    }
                });
                return Ok(response);
            }
            Err(e) => {
                error!("WebSocket upgrade error: {}", e);
                return Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::from("Invalid WebSocket upgrade request"))
                    .unwrap());
            }
        }
    }

    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from(
            "Not found. Use /health, /api/presence, or upgrade to WebSocket.",
        ))
        .unwrap())
}
