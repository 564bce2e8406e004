//! Realtime synchronization contract.
//!
//! Messages are JSON objects tagged by `type`:
//! ```json
//! { "type": "join", "sessionId": "room-1", "userId": "alice" }
//! { "type": "draw_action", "sessionId": "room-1", "action": { "actionKind": "path", ... } }
//! { "type": "action_received", "sequence": 12, "action": { ... } }
//! ```
//!
//! A channel delivers at most once: nothing is retried inside the channel.
//! Every participant observes actions in the order the server log accepted them.

mod throttle;

#[cfg(not(target_arch = "wasm32"))]
mod native;

pub use throttle::{DEFAULT_THROTTLE_INTERVAL, Throttle};

#[cfg(not(target_arch = "wasm32"))]
pub use native::NativeChannel;

use crate::action::{Action, LoggedAction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join a session's room.
    Join { session_id: String, user_id: String },
    /// Leave the current session.
    Leave,
    /// Append an action to the session log and broadcast it.
    DrawAction { session_id: String, action: Action },
    /// Append a `clear` to the session log and broadcast it.
    ClearSession { session_id: String, user_id: String },
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Confirm a join with the current participant set.
    Joined {
        session_id: String,
        participants: Vec<String>,
    },
    /// A participant joined the session.
    UserJoined { user_id: String },
    /// A participant left or disconnected.
    UserLeft { user_id: String },
    /// Another participant's action, with its log sequence.
    ActionReceived { sequence: u64, action: Action },
    /// Another participant cleared the board.
    Cleared {
        sequence: u64,
        user_id: String,
        #[serde(default)]
        created_at: u64,
    },
    /// The sender's own action was appended with this sequence.
    Appended { sequence: u64 },
    /// The session was ended; the connection is no longer a member.
    SessionEnded { session_id: String },
    /// Error message
    Error { message: String },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events surfaced by a channel, drained with [`SyncChannel::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Transport is up.
    Connected,
    /// Transport dropped or was closed.
    Disconnected,
    /// The server confirmed a join.
    Joined {
        session_id: String,
        participants: Vec<String>,
    },
    /// A remote action arrived.
    ActionReceived(LoggedAction),
    /// A remote clear arrived.
    Cleared {
        sequence: u64,
        user_id: String,
        created_at: u64,
    },
    /// The server appended one of our actions.
    Appended { sequence: u64 },
    /// The session this channel joined was ended.
    SessionEnded { session_id: String },
    ParticipantJoined { user_id: String },
    ParticipantLeft { user_id: String },
    Error { message: String },
}

impl From<ServerMessage> for ChannelEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Joined {
                session_id,
                participants,
            } => ChannelEvent::Joined {
                session_id,
                participants,
            },
            ServerMessage::UserJoined { user_id } => ChannelEvent::ParticipantJoined { user_id },
            ServerMessage::UserLeft { user_id } => ChannelEvent::ParticipantLeft { user_id },
            ServerMessage::ActionReceived { sequence, action } => {
                ChannelEvent::ActionReceived(LoggedAction::new(sequence, action))
            }
            ServerMessage::Cleared {
                sequence,
                user_id,
                created_at,
            } => ChannelEvent::Cleared {
                sequence,
                user_id,
                created_at,
            },
            ServerMessage::Appended { sequence } => ChannelEvent::Appended { sequence },
            ServerMessage::SessionEnded { session_id } => ChannelEvent::SessionEnded { session_id },
            ServerMessage::Error { message } => ChannelEvent::Error { message },
        }
    }
}

/// Decode a server frame. Malformed frames are logged and dropped.
pub fn decode_server_message(text: &str) -> Option<ChannelEvent> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => Some(msg.into()),
        Err(e) => {
            log::warn!("Skipping malformed server message: {}", e);
            None
        }
    }
}

/// Synchronization errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Catch-up fetch failed: {0}")]
    Fetch(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A bidirectional realtime transport.
///
/// Implementations queue incoming traffic as [`ChannelEvent`]s; the owner
/// drains them from its event loop.
pub trait SyncChannel {
    /// Start connecting. Completion is reported as [`ChannelEvent::Connected`].
    fn connect(&mut self) -> Result<(), SyncError>;

    /// Send one message. No retry is attempted on failure.
    fn send(&mut self, message: &ClientMessage) -> Result<(), SyncError>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<ChannelEvent>;

    /// Close the transport.
    fn disconnect(&mut self);

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
