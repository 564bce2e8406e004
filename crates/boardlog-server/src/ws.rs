//! WebSocket relay.
//!
//! ## Protocol
//!
//! ```json
//! { "type": "join", "sessionId": "room-1", "userId": "alice" }
//! { "type": "draw_action", "sessionId": "room-1", "action": { "actionKind": "path", ... } }
//! { "type": "clear_session", "sessionId": "room-1", "userId": "alice" }
//! { "type": "leave" }
//! ```
//!
//! The sender of an action gets `appended` with its sequence; everyone else
//! in the session gets `action_received` (or `cleared`). A sender's `appended`
//! always arrives before any broadcast with a higher sequence. When the session
//! is ended over REST, each member gets `session_ended`.

use crate::state::{AppState, Broadcast};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use boardlog_core::action::{Action, now_millis};
use boardlog_core::sync::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The session a connection has joined.
struct Membership {
    session_id: String,
    user_id: String,
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

fn error(message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4().to_string();
    info!("New connection: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;
    let mut session_rx: Option<broadcast::Receiver<Broadcast>> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                };

                let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Invalid message from {}: {}", conn_id, e);
                        if !send(&mut sender, &error(format!("Invalid message: {}", e))).await {
                            break;
                        }
                        continue;
                    }
                };

                let reply = match client_msg {
                    ClientMessage::Join { session_id, user_id } => {
                        if let Some(old) = membership.take() {
                            state.leave(&old.session_id, &conn_id);
                        }
                        session_rx = None;
                        if session_id.is_empty() || user_id.is_empty() {
                            error("Join requires a session id and a user id")
                        } else {
                            match state.join(&session_id, &conn_id, &user_id).await {
                                Ok((rx, participants)) => {
                                    session_rx = Some(rx);
                                    membership = Some(Membership {
                                        session_id: session_id.clone(),
                                        user_id,
                                    });
                                    ServerMessage::Joined { session_id, participants }
                                }
                                Err(e) => {
                                    warn!("Join of {} failed: {}", session_id, e);
                                    error(e.to_string())
                                }
                            }
                        }
                    }
                    ClientMessage::Leave => {
                        if let Some(old) = membership.take() {
                            state.leave(&old.session_id, &conn_id);
                        }
                        session_rx = None;
                        continue;
                    }
                    ClientMessage::DrawAction { session_id, action } => {
                        append(&state, &conn_id, membership.as_ref(), &session_id, action).await
                    }
                    ClientMessage::ClearSession { session_id, .. } => {
                        let clear = Action::clear().at(now_millis());
                        append(&state, &conn_id, membership.as_ref(), &session_id, clear).await
                    }
                };
                if !send(&mut sender, &reply).await {
                    break;
                }
            }

            // Handle broadcast messages from the session
            msg = async {
                match &mut session_rx {
                    Some(rx) => Some(rx.recv().await),
                    None => std::future::pending::<Option<Result<Broadcast, RecvError>>>().await,
                }
            } => {
                match msg {
                    Some(Ok((from, server_msg))) => {
                        // Don't echo back to sender
                        if from != conn_id && !send(&mut sender, &server_msg).await {
                            break;
                        }
                    }
                    Some(Err(RecvError::Lagged(skipped))) => {
                        // The client can no longer trust its view; make it catch up again.
                        warn!("Connection {} lagged by {} messages, closing", conn_id, skipped);
                        let _ = send(&mut sender, &error("Fell behind the session; reconnect to catch up")).await;
                        break;
                    }
                    Some(Err(RecvError::Closed)) => {
                        session_rx = None;
                        if let Some(old) = membership.take() {
                            info!("Session {} ended under {}", old.session_id, conn_id);
                            let ended = ServerMessage::SessionEnded { session_id: old.session_id };
                            if !send(&mut sender, &ended).await {
                                break;
                            }
                        }
                    }
                    None => {}
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(old) = membership {
        state.leave(&old.session_id, &conn_id);
    }
    info!("Connection closed: {}", conn_id);
}

/// Append on behalf of a joined connection and build the sender's reply.
async fn append(
    state: &AppState,
    conn_id: &str,
    membership: Option<&Membership>,
    session_id: &str,
    mut action: Action,
) -> ServerMessage {
    let Some(member) = membership else {
        return error("Join a session before drawing");
    };
    if member.session_id != session_id {
        return error(format!("Not joined to session {}", session_id));
    }
    action.author_id = member.user_id.clone();
    if action.created_at == 0 {
        action.created_at = now_millis();
    }

    match state.append(session_id, conn_id, action).await {
        Ok(sequence) => ServerMessage::Appended { sequence },
        Err(e) => {
            debug!("Rejected action from {}: {}", conn_id, e);
            error(e.to_string())
        }
    }
}
