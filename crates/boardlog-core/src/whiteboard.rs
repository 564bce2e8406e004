//! One participant's whiteboard: surface, history, input and session wired together.

use crate::action::Action;
use crate::config::WhiteboardConfig;
use crate::history::HistoryController;
use crate::input::{InputController, InputOutcome, Key, Tool};
use crate::session::{LogSource, SessionError, SessionManager, SessionUpdate, Submission};
use crate::surface::DrawingSurface;
use crate::sync::SyncChannel;
use kurbo::Point;
use std::time::Instant;

/// A whiteboard client.
///
/// Finalized local actions are applied to the surface, handed to the session
/// and recorded for undo. Remote actions and acknowledgements go through the
/// history so the surface follows the shared log order.
pub struct Whiteboard<S: DrawingSurface, C: SyncChannel, L: LogSource> {
    surface: S,
    history: HistoryController,
    input: InputController,
    session: SessionManager<C, L>,
    overlay: Option<Action>,
}

impl<S: DrawingSurface, C: SyncChannel, L: LogSource> Whiteboard<S, C, L> {
    pub fn new(surface: S, channel: C, source: L, config: &WhiteboardConfig) -> Self {
        Self {
            surface,
            history: HistoryController::new(config.history_limit),
            input: InputController::new(config.throttle_interval()),
            session: SessionManager::with_outbox_limit(channel, source, config.outbox_limit),
            overlay: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn history(&self) -> &HistoryController {
        &self.history
    }

    pub fn input(&self) -> &InputController {
        &self.input
    }

    /// Style and author settings live on the input controller.
    pub fn input_mut(&mut self) -> &mut InputController {
        &mut self.input
    }

    pub fn session(&self) -> &SessionManager<C, L> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<C, L> {
        &mut self.session
    }

    /// Ephemeral overlay for the gesture in progress.
    pub fn preview(&self) -> Option<&Action> {
        self.overlay.as_ref()
    }

    pub fn accepts_input(&self) -> bool {
        self.session.accepts_input()
    }

    /// Join a session. Input is held off until catch-up completes.
    pub fn join(&mut self, session_id: &str, user_id: &str) -> Result<(), SessionError> {
        self.input.cancel();
        self.overlay = None;
        self.input.author_id = user_id.to_string();
        self.session.join(session_id, user_id)
    }

    pub fn leave(&mut self) {
        self.session.leave();
    }

    pub fn reconnect(&mut self) -> Result<(), SessionError> {
        self.session.reconnect()
    }

    /// Commit a finalized local action.
    ///
    /// Returns `None` when the action is invalid or input is on hold.
    pub fn commit(&mut self, mut action: Action) -> Option<Submission> {
        if !self.accepts_input() {
            log::debug!("Input on hold during catch-up; dropping {} action", action.kind());
            return None;
        }
        if let Err(e) = action.validate() {
            log::warn!("Refusing to commit invalid action: {}", e);
            return None;
        }
        if action.author_id.is_empty() {
            action.author_id = self.input.author_id.clone();
        }

        self.surface.apply(&action);
        let submission = self.session.submit(action.clone());
        if submission == Submission::Sent {
            self.history.record_sent(action);
        } else {
            self.history.record(action);
        }
        Some(submission)
    }

    /// Clear the board for everyone.
    pub fn clear(&mut self) -> Option<Submission> {
        self.commit(Action::clear())
    }

    pub fn undo(&mut self) -> bool {
        self.accepts_input() && self.history.undo(&mut self.surface)
    }

    pub fn redo(&mut self) -> bool {
        self.accepts_input() && self.history.redo(&mut self.surface)
    }

    /// Drain channel traffic into the surface.
    ///
    /// Every update is returned so the caller can surface notices and
    /// presence changes.
    pub fn pump(&mut self) -> Vec<SessionUpdate> {
        let updates = self.session.pump();
        self.apply_updates(&updates);
        updates
    }

    pub fn retry_catch_up(&mut self) -> Vec<SessionUpdate> {
        let updates = self.session.retry_catch_up();
        self.apply_updates(&updates);
        updates
    }

    fn apply_updates(&mut self, updates: &[SessionUpdate]) {
        for update in updates {
            match update {
                SessionUpdate::Replay(entries) => {
                    self.history.rebase(entries.iter().cloned());
                    self.history.redraw(&mut self.surface);
                }
                SessionUpdate::Apply(logged) => {
                    self.history.apply_remote(logged.clone(), &mut self.surface);
                }
                SessionUpdate::Acknowledged(sequence) => {
                    self.history.acknowledge(*sequence, &mut self.surface);
                }
                SessionUpdate::Resubmitted(actions) => {
                    for action in actions {
                        self.surface.apply(action);
                        self.history.record_sent(action.clone());
                    }
                }
                SessionUpdate::StateChanged(_)
                | SessionUpdate::Ended(_)
                | SessionUpdate::ParticipantJoined(_)
                | SessionUpdate::ParticipantLeft(_)
                | SessionUpdate::Notice(_) => {}
            }
        }
    }

    pub fn set_tool(&mut self, tool: Tool) -> InputOutcome {
        let outcome = self.input.set_tool(tool);
        self.handle(outcome)
    }

    pub fn pointer_down(&mut self, point: Point) -> InputOutcome {
        if !self.accepts_input() {
            return InputOutcome::None;
        }
        let outcome = self.input.pointer_down(point);
        self.handle(outcome)
    }

    pub fn pointer_move(&mut self, point: Point) -> InputOutcome {
        self.pointer_move_at(point, Instant::now())
    }

    pub fn pointer_move_at(&mut self, point: Point, now: Instant) -> InputOutcome {
        let outcome = self.input.pointer_move_at(point, now);
        self.handle(outcome)
    }

    pub fn pointer_up(&mut self, point: Point) -> InputOutcome {
        let outcome = self.input.pointer_up(point);
        self.handle(outcome)
    }

    pub fn key(&mut self, key: Key) -> InputOutcome {
        let outcome = self.input.key(key);
        self.handle(outcome)
    }

    pub fn blur(&mut self) -> InputOutcome {
        let outcome = self.input.blur();
        self.handle(outcome)
    }

    fn handle(&mut self, outcome: InputOutcome) -> InputOutcome {
        match &outcome {
            InputOutcome::Preview(action) => self.overlay = Some(action.clone()),
            InputOutcome::Commit(action) => {
                self.overlay = None;
                self.commit(action.clone());
            }
            InputOutcome::None => {
                if !self.input.is_active() {
                    self.overlay = None;
                }
            }
        }
        outcome
    }
}
