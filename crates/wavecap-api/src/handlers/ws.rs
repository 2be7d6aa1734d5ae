//! WebSocket session transport
//!
//! One select loop per connection: inbound frames feed the session state
//! machine, the outbox drains to the socket, and the shutdown watch tears
//! everything down. On exit the session is unregistered and offered to the
//! reconnection manager.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use std::net::SocketAddr;
use std::sync::Arc;
use wavecap_stream::OutboundMessage;

/// Upgrade handler for `/ws`
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket, addr))
}

fn encode(frame: &OutboundMessage) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode outbound frame");
            None
        }
    }
}

async fn handle_socket(state: Arc<AppState>, mut socket: WebSocket, addr: SocketAddr) {
    let (session, mut receivers) = state.registry.open(addr.ip());
    tracing::info!(session_id = session.id(), %addr, "websocket connected");

    // Scanner clients wait for this prompt before presenting credentials
    if state.config.auth.user_auth_required {
        session.try_send(OutboundMessage::Pin);
    }

    loop {
        tokio::select! {
            changed = receivers.shutdown.changed() => {
                if changed.is_err() || *receivers.shutdown.borrow() {
                    // Flush whatever is already queued (e.g. the terminal
                    // error frame), then close the transport
                    while let Ok(frame) = receivers.outbox.try_recv() {
                        if let Some(text) = encode(&frame) {
                            if socket.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            outbound = receivers.outbox.recv() => {
                match outbound {
                    Some(frame) => {
                        if let Some(text) = encode(&frame) {
                            if socket.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.session_context.handle_frame(&session, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = session.id(), error = %e, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.registry.unregister(session.id());
    state.reconnection.on_disconnect(&session);
    tracing::info!(
        session_id = session.id(),
        dropped = session.dropped_count(),
        "websocket disconnected"
    );
}
