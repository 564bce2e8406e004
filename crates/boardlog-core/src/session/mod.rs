//! Session lifecycle and late-join catch-up.
//!
//! ```text
//! Disconnected → Connecting → CatchingUp → Live → Disconnected
//! ```
//!
//! A join opens the channel, waits for the server's confirmation, then
//! fetches the whole log and hands it back for a full replay. Live traffic
//! that arrives before the replay finishes is buffered, never rendered.
//! Reconnecting runs the same path from scratch.

#[cfg(not(target_arch = "wasm32"))]
mod http;

#[cfg(not(target_arch = "wasm32"))]
pub use http::HttpLogSource;

use crate::action::{Action, LoggedAction};
use crate::log::{ActionLog, MemoryActionLog};
use crate::sync::{ChannelEvent, ClientMessage, SyncChannel, SyncError};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

/// Maximum number of committed actions held while the transport is down.
pub const DEFAULT_OUTBOX_LIMIT: usize = 256;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session id must not be empty")]
    EmptySessionId,
    #[error("User id must not be empty")]
    EmptyUserId,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Where catch-up reads the full ordered log from.
pub trait LogSource {
    fn fetch_all(&mut self, session_id: &str) -> Result<Vec<LoggedAction>, SyncError>;
}

impl LogSource for MemoryActionLog {
    fn fetch_all(&mut self, _session_id: &str) -> Result<Vec<LoggedAction>, SyncError> {
        self.all().map_err(|e| SyncError::Fetch(e.to_string()))
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    CatchingUp,
    Live,
}

/// What happened to a committed action handed to [`SessionManager::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Sent to the server.
    Sent,
    /// Held in the outbox until the next successful catch-up.
    Queued,
    /// No session; the action stays on the local board only.
    LocalOnly,
}

/// Work for the owner of the surface, produced by [`SessionManager::pump`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Reset the surface and replay these actions, in sequence order.
    Replay(Vec<LoggedAction>),
    /// Place one remote action at its sequence.
    Apply(LoggedAction),
    /// The oldest unacknowledged local action was appended with this sequence.
    Acknowledged(u64),
    /// Locally authored actions re-sent after catch-up; apply and record them.
    Resubmitted(Vec<Action>),
    StateChanged(SessionState),
    /// The server ended the session; the board is a local scratchpad again.
    Ended(String),
    ParticipantJoined(String),
    ParticipantLeft(String),
    /// Non-blocking notice for the user.
    Notice(String),
}

/// Owns session identity, the join/leave lifecycle and catch-up.
pub struct SessionManager<C: SyncChannel, L: LogSource> {
    channel: C,
    source: L,
    state: SessionState,
    session_id: Option<String>,
    user_id: Option<String>,
    participants: BTreeSet<String>,
    /// Highest remote sequence applied to the surface.
    last_applied: u64,
    /// Highest sequence the server acknowledged for our own actions.
    last_acked: u64,
    /// Live actions that arrived before the replay finished.
    buffered: Vec<LoggedAction>,
    outbox: VecDeque<Action>,
    outbox_limit: usize,
}

impl<C: SyncChannel, L: LogSource> SessionManager<C, L> {
    pub fn new(channel: C, source: L) -> Self {
        Self::with_outbox_limit(channel, source, DEFAULT_OUTBOX_LIMIT)
    }

    pub fn with_outbox_limit(channel: C, source: L, outbox_limit: usize) -> Self {
        Self {
            channel,
            source,
            state: SessionState::Disconnected,
            session_id: None,
            user_id: None,
            participants: BTreeSet::new(),
            last_applied: 0,
            last_acked: 0,
            buffered: Vec::new(),
            outbox: VecDeque::new(),
            outbox_limit: outbox_limit.max(1),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(String::as_str)
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn last_acked(&self) -> u64 {
        self.last_acked
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Whether local input may be committed right now.
    ///
    /// Input waits while a join or catch-up is in flight.
    pub fn accepts_input(&self) -> bool {
        !matches!(self.state, SessionState::Connecting | SessionState::CatchingUp)
    }

    /// Join `session_id` as `user_id`, leaving any current session first.
    pub fn join(&mut self, session_id: &str, user_id: &str) -> Result<(), SessionError> {
        if session_id.is_empty() {
            return Err(SessionError::EmptySessionId);
        }
        if user_id.is_empty() {
            return Err(SessionError::EmptyUserId);
        }
        if self.session_id.is_some() {
            self.leave();
        }
        self.session_id = Some(session_id.to_string());
        self.user_id = Some(user_id.to_string());
        self.open()
    }

    /// Re-run the full join and catch-up for the current session.
    pub fn reconnect(&mut self) -> Result<(), SessionError> {
        if self.session_id.is_none() {
            log::warn!("Reconnect requested without a session; ignoring");
            return Ok(());
        }
        self.channel.disconnect();
        self.open()
    }

    fn open(&mut self) -> Result<(), SessionError> {
        let (Some(session_id), Some(user_id)) = (self.session_id.clone(), self.user_id.clone())
        else {
            return Ok(());
        };

        self.buffered.clear();
        self.participants.clear();
        self.state = SessionState::Connecting;

        let result = self.connect_and_join(session_id.clone(), user_id);
        if let Err(e) = result {
            log::warn!("Failed to join session {}: {}", session_id, e);
            self.state = SessionState::Disconnected;
            return Err(e.into());
        }
        log::info!("Joining session {}", session_id);
        Ok(())
    }

    fn connect_and_join(&mut self, session_id: String, user_id: String) -> Result<(), SyncError> {
        if !self.channel.is_connected() {
            self.channel.connect()?;
        }
        self.channel.send(&ClientMessage::Join {
            session_id,
            user_id,
        })
    }

    /// Stop listening. The shared log is untouched; pending actions are dropped.
    pub fn leave(&mut self) {
        if self.session_id.is_none() {
            return;
        }
        if self.channel.is_connected() {
            let _ = self.channel.send(&ClientMessage::Leave);
        }
        if let Some(session_id) = self.close() {
            log::info!("Left session {}", session_id);
        }
    }

    /// Drop the session identity and everything tied to it.
    fn close(&mut self) -> Option<String> {
        let session_id = self.session_id.take()?;
        self.channel.disconnect();
        if !self.outbox.is_empty() {
            log::warn!(
                "Leaving session {} with {} unsent actions",
                session_id,
                self.outbox.len()
            );
        }
        self.user_id = None;
        self.outbox.clear();
        self.buffered.clear();
        self.participants.clear();
        self.last_applied = 0;
        self.last_acked = 0;
        self.state = SessionState::Disconnected;
        Some(session_id)
    }

    /// Hand a committed action to the shared log.
    ///
    /// Sending is fire-and-forget. A failed send, or a send attempted while
    /// the session is not live, parks the action in the outbox.
    pub fn submit(&mut self, action: Action) -> Submission {
        let Some(session_id) = self.session_id.clone() else {
            log::warn!("No active session; keeping {} action local", action.kind());
            return Submission::LocalOnly;
        };
        if self.state != SessionState::Live {
            self.enqueue(action);
            return Submission::Queued;
        }
        match self.channel.send(&to_message(&session_id, self.user_id.as_deref(), &action)) {
            Ok(()) => Submission::Sent,
            Err(e) => {
                log::warn!("Send failed, queueing {} action: {}", action.kind(), e);
                self.enqueue(action);
                Submission::Queued
            }
        }
    }

    fn enqueue(&mut self, action: Action) {
        if self.outbox.len() >= self.outbox_limit {
            if let Some(dropped) = self.outbox.pop_front() {
                log::warn!("Outbox full; dropping oldest {} action", dropped.kind());
            }
        }
        self.outbox.push_back(action);
    }

    /// Drain channel events and turn them into surface work.
    pub fn pump(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        for event in self.channel.poll_events() {
            self.handle_event(event, &mut updates);
        }
        updates
    }

    fn handle_event(&mut self, event: ChannelEvent, updates: &mut Vec<SessionUpdate>) {
        match event {
            ChannelEvent::Connected => log::debug!("Channel connected"),
            ChannelEvent::Joined {
                session_id,
                participants,
            } => {
                if self.state != SessionState::Connecting
                    || self.session_id.as_deref() != Some(session_id.as_str())
                {
                    log::warn!("Ignoring unexpected join confirmation for {}", session_id);
                    return;
                }
                self.participants = participants.into_iter().collect();
                self.set_state(SessionState::CatchingUp, updates);
                self.catch_up(updates);
            }
            ChannelEvent::ActionReceived(logged) => self.receive(logged, updates),
            ChannelEvent::Cleared {
                sequence,
                user_id,
                created_at,
            } => {
                let action = Action::clear().by(user_id).at(created_at);
                self.receive(LoggedAction::new(sequence, action), updates);
            }
            ChannelEvent::Appended { sequence } => {
                self.last_acked = self.last_acked.max(sequence);
                if self.state == SessionState::Live {
                    updates.push(SessionUpdate::Acknowledged(sequence));
                }
            }
            ChannelEvent::SessionEnded { session_id } => {
                if self.session_id.as_deref() != Some(session_id.as_str()) {
                    log::debug!("Ignoring end of session {}", session_id);
                    return;
                }
                log::warn!("Session {} was ended by the server", session_id);
                let previous = self.state;
                self.close();
                if previous != SessionState::Disconnected {
                    updates.push(SessionUpdate::StateChanged(SessionState::Disconnected));
                }
                updates.push(SessionUpdate::Ended(session_id));
            }
            ChannelEvent::ParticipantJoined { user_id } => {
                if self.participants.insert(user_id.clone()) {
                    updates.push(SessionUpdate::ParticipantJoined(user_id));
                }
            }
            ChannelEvent::ParticipantLeft { user_id } => {
                if self.participants.remove(&user_id) {
                    updates.push(SessionUpdate::ParticipantLeft(user_id));
                }
            }
            ChannelEvent::Disconnected => {
                if self.session_id.is_some() && self.state != SessionState::Disconnected {
                    log::warn!("Connection lost; reconnect to catch up");
                    self.buffered.clear();
                    self.set_state(SessionState::Disconnected, updates);
                    updates.push(SessionUpdate::Notice("Disconnected, reconnecting".to_string()));
                }
            }
            ChannelEvent::Error { message } => {
                log::warn!("Server error: {}", message);
                updates.push(SessionUpdate::Notice(message));
            }
        }
    }

    fn receive(&mut self, logged: LoggedAction, updates: &mut Vec<SessionUpdate>) {
        if let Err(e) = logged.action.validate() {
            log::warn!("Skipping malformed action #{}: {}", logged.sequence, e);
            return;
        }
        match self.state {
            SessionState::Live => {
                if logged.sequence <= self.last_applied {
                    log::debug!("Dropping duplicate action #{}", logged.sequence);
                    return;
                }
                self.last_applied = logged.sequence;
                updates.push(SessionUpdate::Apply(logged));
            }
            SessionState::Connecting | SessionState::CatchingUp => self.buffered.push(logged),
            SessionState::Disconnected => {}
        }
    }

    /// Retry a failed catch-up.
    pub fn retry_catch_up(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        if self.state == SessionState::CatchingUp {
            self.catch_up(&mut updates);
        }
        updates
    }

    fn catch_up(&mut self, updates: &mut Vec<SessionUpdate>) {
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        let entries = match self.source.fetch_all(&session_id) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Catch-up for {} failed: {}", session_id, e);
                updates.push(SessionUpdate::Notice(format!("Catch-up failed: {}", e)));
                return;
            }
        };

        self.last_applied = entries.last().map(|entry| entry.sequence).unwrap_or(0);
        log::info!(
            "Catching up session {}: replaying {} actions",
            session_id,
            entries.len()
        );
        updates.push(SessionUpdate::Replay(
            entries
                .into_iter()
                .filter(|entry| entry.action.validate().is_ok())
                .collect(),
        ));

        let mut buffered = std::mem::take(&mut self.buffered);
        buffered.sort_by_key(|entry| entry.sequence);
        self.set_state(SessionState::Live, updates);
        for entry in buffered {
            self.receive(entry, updates);
        }

        self.flush_outbox(&session_id, updates);
    }

    fn flush_outbox(&mut self, session_id: &str, updates: &mut Vec<SessionUpdate>) {
        let mut sent = Vec::new();
        while let Some(action) = self.outbox.pop_front() {
            let message = to_message(session_id, self.user_id.as_deref(), &action);
            if let Err(e) = self.channel.send(&message) {
                log::warn!("Outbox flush stopped: {}", e);
                self.outbox.push_front(action);
                break;
            }
            sent.push(action);
        }
        if !sent.is_empty() {
            log::info!("Re-sent {} queued actions", sent.len());
            updates.push(SessionUpdate::Resubmitted(sent));
        }
    }

    fn set_state(&mut self, state: SessionState, updates: &mut Vec<SessionUpdate>) {
        if self.state != state {
            log::debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            updates.push(SessionUpdate::StateChanged(state));
        }
    }
}

fn to_message(session_id: &str, user_id: Option<&str>, action: &Action) -> ClientMessage {
    if action.is_clear() {
        ClientMessage::ClearSession {
            session_id: session_id.to_string(),
            user_id: user_id.unwrap_or(&action.author_id).to_string(),
        }
    } else {
        ClientMessage::DrawAction {
            session_id: session_id.to_string(),
            action: action.clone(),
        }
    }
}
