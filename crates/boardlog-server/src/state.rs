//! Shared server state: one authoritative action log per session.

use crate::config::ServerConfig;
use boardlog_core::action::{Action, LoggedAction, now_millis};
use boardlog_core::log::{ActionLog, FileActionLog, LogError, MemoryActionLog, visible_since_last_clear};
use boardlog_core::sync::ServerMessage;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// A message fanned out to a session, tagged with the originating connection.
pub type Broadcast = (String, ServerMessage);

type BoxedLog = Box<dyn ActionLog + Send + Sync>;

/// A session log, locked for the whole append-and-broadcast step.
type SharedLog = Arc<Mutex<BoxedLog>>;

fn lock(log: &SharedLog) -> MutexGuard<'_, BoxedLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("Template name is required")]
    MissingTemplateName,
    #[error("Session {0} has nothing to save")]
    NothingToSave(String),
    #[error("Log worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// A named snapshot of a session's visible actions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_public: bool,
    pub created_at: u64,
    pub actions: Vec<Action>,
}

/// Session state
struct Session {
    log: SharedLog,
    /// Connection id to user id.
    participants: HashMap<String, String>,
    tx: broadcast::Sender<Broadcast>,
}

impl Session {
    fn new(log: BoxedLog, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            log: Arc::new(Mutex::new(log)),
            participants: HashMap::new(),
            tx,
        }
    }

    fn participant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.participants.values().cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn broadcast(&self, from: &str, msg: ServerMessage) {
        // No subscribers is fine.
        let _ = self.tx.send((from.to_string(), msg));
    }
}

/// Shared application state
pub struct AppState {
    config: ServerConfig,
    sessions: DashMap<String, Session>,
    templates: DashMap<String, Vec<Template>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            templates: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn open_log(&self, session_id: &str) -> Result<BoxedLog, StateError> {
        match &self.config.data_dir {
            Some(dir) => {
                let dir = dir.clone();
                let id = session_id.to_string();
                let log = tokio::task::spawn_blocking(move || FileActionLog::open(&dir, &id)).await??;
                Ok(Box::new(log))
            }
            None => Ok(Box::new(MemoryActionLog::new())),
        }
    }

    /// Get or create a session.
    ///
    /// A durable log is opened before the map entry is locked.
    async fn session(&self, session_id: &str) -> Result<RefMut<'_, String, Session>, StateError> {
        let mut fresh = None;
        loop {
            if fresh.is_none() && !self.sessions.contains_key(session_id) {
                fresh = Some(self.open_log(session_id).await?);
            }
            match self.sessions.entry(session_id.to_string()) {
                Entry::Occupied(entry) => return Ok(entry.into_ref()),
                Entry::Vacant(entry) => {
                    if let Some(log) = fresh.take() {
                        debug!("Opened session {} ({} actions)", session_id, log.len());
                        return Ok(entry.insert(Session::new(log, self.config.channel_capacity)));
                    }
                }
            }
        }
    }

    /// Run `work` against a session log, on the blocking pool when the log is on disk.
    async fn with_log<T, F>(&self, log: SharedLog, work: F) -> Result<T, StateError>
    where
        T: Send + 'static,
        F: FnOnce(&mut BoxedLog) -> Result<T, StateError> + Send + 'static,
    {
        if self.config.data_dir.is_none() {
            let mut guard = lock(&log);
            return work(&mut guard);
        }
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&log);
            work(&mut guard)
        })
        .await?
    }

    /// Add a connection to a session.
    ///
    /// Returns the broadcast receiver and the participant list after joining.
    pub async fn join(
        &self,
        session_id: &str,
        conn_id: &str,
        user_id: &str,
    ) -> Result<(broadcast::Receiver<Broadcast>, Vec<String>), StateError> {
        let mut session = self.session(session_id).await?;
        if !session.participants.values().any(|u| u == user_id) {
            session.broadcast(
                conn_id,
                ServerMessage::UserJoined {
                    user_id: user_id.to_string(),
                },
            );
        }
        // Subscribe after the notice so a joiner never hears about itself.
        let rx = session.tx.subscribe();
        session
            .participants
            .insert(conn_id.to_string(), user_id.to_string());
        info!("User {} joined session {}", user_id, session_id);
        Ok((rx, session.participant_ids()))
    }

    /// Remove a connection from a session. The session itself stays open.
    pub fn leave(&self, session_id: &str, conn_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            if let Some(user_id) = session.participants.remove(conn_id) {
                if !session.participants.values().any(|u| *u == user_id) {
                    session.broadcast(conn_id, ServerMessage::UserLeft { user_id: user_id.clone() });
                }
                info!("User {} left session {}", user_id, session_id);
            }
        }
    }

    /// End a session. Subscribers see their stream close; a durable log
    /// stays on disk.
    pub fn end_session(&self, session_id: &str) -> bool {
        let ended = self.sessions.remove(session_id).is_some();
        if ended {
            info!("Ended session {}", session_id);
        }
        ended
    }

    /// Append to the session log and fan out, both under the log lock.
    ///
    /// Broadcast order therefore matches sequence order. Disk writes run on
    /// the blocking pool and never hold the session map.
    pub async fn append(&self, session_id: &str, from: &str, action: Action) -> Result<u64, StateError> {
        let (log, tx) = {
            let session = self.session(session_id).await?;
            (session.log.clone(), session.tx.clone())
        };
        let from = from.to_string();
        let sequence = self
            .with_log(log, move |log| {
                let sequence = log.append(action.clone())?;
                let msg = if action.is_clear() {
                    ServerMessage::Cleared {
                        sequence,
                        user_id: action.author_id,
                        created_at: action.created_at,
                    }
                } else {
                    ServerMessage::ActionReceived { sequence, action }
                };
                // No subscribers is fine.
                let _ = tx.send((from, msg));
                Ok(sequence)
            })
            .await?;
        debug!("Session {} appended #{}", session_id, sequence);
        Ok(sequence)
    }

    /// The full ordered log of a session.
    ///
    /// Reading an unknown session never creates a log for it.
    pub async fn actions(&self, session_id: &str) -> Result<Vec<LoggedAction>, StateError> {
        let log = self.sessions.get(session_id).map(|session| session.log.clone());
        match (log, &self.config.data_dir) {
            (Some(log), _) => self.with_log(log, |log| Ok(log.all()?)).await,
            (None, Some(dir)) => {
                let dir = dir.clone();
                let id = session_id.to_string();
                Ok(tokio::task::spawn_blocking(move || FileActionLog::read_existing(&dir, &id)).await??)
            }
            (None, None) => Ok(Vec::new()),
        }
    }

    pub fn participants(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|session| session.participant_ids())
            .unwrap_or_default()
    }

    /// Snapshot what is currently visible in a session as a named template.
    pub async fn save_template(
        &self,
        session_id: &str,
        name: &str,
        description: Option<String>,
        is_public: bool,
    ) -> Result<Template, StateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StateError::MissingTemplateName);
        }
        let entries = self.actions(session_id).await?;
        let visible = visible_since_last_clear(&entries);
        if visible.is_empty() {
            return Err(StateError::NothingToSave(session_id.to_string()));
        }

        let template = Template {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            is_public,
            created_at: now_millis(),
            actions: visible.iter().map(|entry| entry.action.clone()).collect(),
        };
        self.templates
            .entry(session_id.to_string())
            .or_default()
            .push(template.clone());
        info!("Saved template '{}' from session {}", template.name, session_id);
        Ok(template)
    }

    pub fn templates(&self, session_id: &str) -> Vec<Template> {
        self.templates
            .get(session_id)
            .map(|templates| templates.clone())
            .unwrap_or_default()
    }
}
