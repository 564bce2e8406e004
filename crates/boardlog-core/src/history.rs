//! Local undo/redo over a participant's own actions.
//!
//! Undo and redo redraw from scratch: the surface is reset and every visible
//! action is applied again in order. Nothing here is broadcast; other
//! participants never see one participant's undo.
//!
//! The controller keeps a timeline of everything applied to the surface since
//! the last catch-up, ordered the way the shared log orders it. Remote actions
//! carry their sequence; local actions get theirs when the server acknowledges
//! them, and until then sit after every sequenced entry. When an arrival lands
//! below something already drawn, the surface is redrawn so every participant
//! ends up with the same picture.
//!
//! Actions authored locally are undoable while they stay inside the window;
//! remote actions, and local actions that fell out of the window, form a fixed
//! backdrop that every redraw keeps.

use crate::action::{Action, LoggedAction};
use crate::surface::DrawingSurface;
use std::collections::{HashSet, VecDeque};

/// Maximum number of undoable local actions to keep.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
struct TimelineEntry {
    id: u64,
    action: Action,
    /// Log sequence, once known.
    sequence: Option<u64>,
    /// Whether the entry is still inside the undo window.
    undoable: bool,
}

/// Undo/redo cursor over the local action subsequence.
#[derive(Debug, Clone)]
pub struct HistoryController {
    timeline: Vec<TimelineEntry>,
    /// Ids of undoable local actions, oldest first.
    local: VecDeque<u64>,
    /// Ids of sent local actions still waiting for their sequence, in send order.
    awaiting: VecDeque<u64>,
    /// Index into `local`; -1 means none of the window is applied.
    cursor: isize,
    limit: usize,
    next_id: u64,
}

impl Default for HistoryController {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryController {
    /// Create a controller keeping at most `limit` undoable actions.
    pub fn new(limit: usize) -> Self {
        Self {
            timeline: Vec::new(),
            local: VecDeque::new(),
            awaiting: VecDeque::new(),
            cursor: -1,
            limit: limit.max(1),
            next_id: 0,
        }
    }

    /// Current cursor, in `[-1, local_len() - 1]`.
    pub fn cursor(&self) -> isize {
        self.cursor
    }

    /// Number of local actions in the undo window.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > -1
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.local.len() as isize - 1
    }

    /// Number of sent local actions the server has not acknowledged yet.
    pub fn unacknowledged(&self) -> usize {
        self.awaiting.len()
    }

    /// Record a locally committed action that stays local for now.
    ///
    /// Anything past the cursor is discarded, the action becomes the new tail
    /// and the oldest entries leave the window once the limit is exceeded.
    pub fn record(&mut self, action: Action) {
        self.push_local(action);
    }

    /// Record a locally committed action that was sent to the server.
    ///
    /// Its place in the timeline is settled by the matching
    /// [`acknowledge`](Self::acknowledge).
    pub fn record_sent(&mut self, action: Action) {
        let id = self.push_local(action);
        self.awaiting.push_back(id);
    }

    fn push_local(&mut self, action: Action) -> u64 {
        self.discard_redo_branch();

        let id = self.allocate_id();
        self.timeline.push(TimelineEntry {
            id,
            action,
            sequence: None,
            undoable: true,
        });
        self.local.push_back(id);

        while self.local.len() > self.limit {
            if let Some(oldest) = self.local.pop_front() {
                if let Some(index) = self.index_of(oldest) {
                    self.timeline[index].undoable = false;
                }
            }
        }
        self.cursor = self.local.len() as isize - 1;
        self.compact();
        id
    }

    /// Place a remote action at its sequence and bring `surface` up to date.
    ///
    /// An action that belongs at the tail is applied on top; one that lands
    /// below something already drawn triggers a redraw.
    pub fn apply_remote<S: DrawingSurface + ?Sized>(&mut self, logged: LoggedAction, surface: &mut S) {
        let at = self.position_for(logged.sequence);
        let hidden = self.hidden();
        let covered = self.timeline[at..]
            .iter()
            .any(|entry| !hidden.contains(&entry.id));

        let id = self.allocate_id();
        self.timeline.insert(
            at,
            TimelineEntry {
                id,
                action: logged.action,
                sequence: Some(logged.sequence),
                undoable: false,
            },
        );

        if covered {
            log::debug!("Action #{} arrived below local work; redrawing", logged.sequence);
            self.redraw(surface);
        } else {
            surface.apply(&self.timeline[at].action);
        }
        self.compact();
    }

    /// Assign `sequence` to the oldest unacknowledged local action.
    ///
    /// Acknowledgements arrive in send order. If the action has to move below
    /// remote work that is already drawn, `surface` is redrawn.
    pub fn acknowledge<S: DrawingSurface + ?Sized>(&mut self, sequence: u64, surface: &mut S) {
        let Some(id) = self.awaiting.pop_front() else {
            log::debug!("Acknowledgement #{} with nothing outstanding", sequence);
            return;
        };
        // Discarded by a new commit after an undo.
        let Some(from) = self.index_of(id) else {
            return;
        };

        let mut entry = self.timeline.remove(from);
        entry.sequence = Some(sequence);
        let to = self.position_for(sequence);
        self.timeline.insert(to, entry);
        if to != from {
            self.redraw(surface);
        }
    }

    /// Replace the timeline with a freshly replayed log.
    ///
    /// Everything replayed becomes backdrop and the undo window is emptied.
    pub fn rebase<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = LoggedAction>,
    {
        let mut timeline = Vec::new();
        for entry in entries {
            let id = self.allocate_id();
            timeline.push(TimelineEntry {
                id,
                action: entry.action,
                sequence: Some(entry.sequence),
                undoable: false,
            });
        }
        self.timeline = timeline;
        self.local.clear();
        self.awaiting.clear();
        self.cursor = -1;
        self.compact();
    }

    /// Step back one local action and redraw. Returns false at the start.
    pub fn undo<S: DrawingSurface + ?Sized>(&mut self, surface: &mut S) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        self.redraw(surface);
        true
    }

    /// Step forward one local action and redraw. Returns false at the tail.
    pub fn redo<S: DrawingSurface + ?Sized>(&mut self, surface: &mut S) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        self.redraw(surface);
        true
    }

    /// Reset `surface` and apply every visible action in timeline order.
    pub fn redraw<S: DrawingSurface + ?Sized>(&self, surface: &mut S) {
        let hidden = self.hidden();
        surface.reset();
        for entry in &self.timeline {
            if !hidden.contains(&entry.id) {
                surface.apply(&entry.action);
            }
        }
    }

    /// Actions currently visible, in application order.
    pub fn visible_actions(&self) -> Vec<&Action> {
        let hidden = self.hidden();
        self.timeline
            .iter()
            .filter(|entry| !hidden.contains(&entry.id))
            .map(|entry| &entry.action)
            .collect()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn index_of(&self, id: u64) -> Option<usize> {
        self.timeline.iter().position(|entry| entry.id == id)
    }

    /// Sequenced entries come first, in sequence order; unsequenced local
    /// entries follow in commit order.
    fn position_for(&self, sequence: u64) -> usize {
        self.timeline
            .iter()
            .position(|entry| entry.sequence.is_none_or(|s| s > sequence))
            .unwrap_or(self.timeline.len())
    }

    fn hidden(&self) -> HashSet<u64> {
        self.local
            .iter()
            .skip((self.cursor + 1) as usize)
            .copied()
            .collect()
    }

    fn discard_redo_branch(&mut self) {
        let keep = (self.cursor + 1) as usize;
        if keep >= self.local.len() {
            return;
        }
        let dropped: HashSet<u64> = self.local.drain(keep..).collect();
        self.timeline.retain(|entry| !dropped.contains(&entry.id));
    }

    /// Drop backdrop entries hidden behind a backdrop `clear`.
    fn compact(&mut self) {
        let horizon = self
            .local
            .front()
            .and_then(|id| self.index_of(*id))
            .unwrap_or(self.timeline.len());
        let last_clear = self.timeline[..horizon]
            .iter()
            .rposition(|entry| entry.action.is_clear());

        if let Some(cut) = last_clear.filter(|cut| *cut > 0) {
            self.timeline.drain(..cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{VectorSurface, replay};
    use kurbo::Point;

    fn stroke(n: f64) -> Action {
        Action::path(vec![Point::new(n, n), Point::new(n + 1.0, n + 1.0)])
    }

    fn commit(history: &mut HistoryController, surface: &mut VectorSurface, action: Action) {
        surface.apply(&action);
        history.record(action);
    }

    fn commit_sent(history: &mut HistoryController, surface: &mut VectorSurface, action: Action) {
        surface.apply(&action);
        history.record_sent(action);
    }

    #[test]
    fn test_cursor_bounds() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        assert_eq!(history.cursor(), -1);
        assert!(!history.undo(&mut surface));
        assert_eq!(history.cursor(), -1);

        commit(&mut history, &mut surface, stroke(0.0));
        commit(&mut history, &mut surface, stroke(1.0));
        assert_eq!(history.cursor(), 1);
        assert!(!history.redo(&mut surface));
        assert_eq!(history.cursor(), 1);
    }

    #[test]
    fn test_undo_then_redo_restores_surface() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        commit(&mut history, &mut surface, stroke(0.0));
        commit(&mut history, &mut surface, stroke(1.0));
        let before = surface.clone();

        assert!(history.undo(&mut surface));
        assert_eq!(surface.primitive_count(), 1);
        assert!(history.redo(&mut surface));
        assert_eq!(surface, before);
    }

    #[test]
    fn test_new_action_discards_redo_branch() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        commit(&mut history, &mut surface, stroke(0.0));
        commit(&mut history, &mut surface, stroke(1.0));
        history.undo(&mut surface);

        commit(&mut history, &mut surface, stroke(2.0));
        assert!(!history.can_redo());
        assert!(!history.redo(&mut surface));
        assert_eq!(history.local_len(), 2);
        assert_eq!(surface.primitive_count(), 2);
    }

    #[test]
    fn test_window_limit_keeps_old_actions_visible() {
        let mut history = HistoryController::new(2);
        let mut surface = VectorSurface::new();
        for i in 0..4 {
            commit(&mut history, &mut surface, stroke(i as f64));
        }
        assert_eq!(history.local_len(), 2);
        assert_eq!(history.cursor(), 1);

        assert!(history.undo(&mut surface));
        assert!(history.undo(&mut surface));
        assert!(!history.undo(&mut surface));
        // The two oldest strokes fell out of the window but stay drawn.
        assert_eq!(surface.primitive_count(), 2);
    }

    #[test]
    fn test_undo_keeps_remote_strokes() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        commit(&mut history, &mut surface, stroke(0.0));

        history.apply_remote(LoggedAction::new(1, stroke(10.0).by("bob")), &mut surface);

        assert!(history.undo(&mut surface));
        assert_eq!(surface.primitive_count(), 1);
        assert!(history.redo(&mut surface));
        assert_eq!(surface.primitive_count(), 2);
    }

    #[test]
    fn test_undo_local_clear_restores_board() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        commit(&mut history, &mut surface, stroke(0.0));
        commit(&mut history, &mut surface, Action::clear());
        assert!(surface.is_blank());

        assert!(history.undo(&mut surface));
        assert_eq!(surface.primitive_count(), 1);
    }

    #[test]
    fn test_rebase_empties_window() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        commit(&mut history, &mut surface, stroke(0.0));

        history.rebase(vec![LoggedAction::new(1, stroke(1.0)), LoggedAction::new(2, stroke(2.0))]);
        assert_eq!(history.cursor(), -1);
        assert!(!history.can_undo());
        history.redraw(&mut surface);
        assert_eq!(surface.primitive_count(), 2);
    }

    #[test]
    fn test_backdrop_before_clear_is_compacted() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        history.apply_remote(LoggedAction::new(1, stroke(0.0)), &mut surface);
        history.apply_remote(LoggedAction::new(2, stroke(1.0)), &mut surface);
        history.apply_remote(LoggedAction::new(3, Action::clear()), &mut surface);
        history.apply_remote(LoggedAction::new(4, stroke(2.0)), &mut surface);

        let visible = history.visible_actions();
        assert_eq!(visible.len(), 2);
        assert!(visible[0].is_clear());
        assert_eq!(surface.primitive_count(), 1);
    }

    #[test]
    fn test_remote_below_unacknowledged_local_redraws_in_log_order() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        let mine = stroke(0.0).by("alice");
        surface.apply(&mine);
        history.record_sent(mine.clone());

        // Sequenced before ours by the server.
        let theirs = stroke(5.0).by("bob");
        history.apply_remote(LoggedAction::new(1, theirs.clone()), &mut surface);
        history.acknowledge(2, &mut surface);

        let mut expected = VectorSurface::new();
        replay(&mut expected, &[theirs, mine]);
        assert_eq!(surface, expected);
        assert_eq!(history.unacknowledged(), 0);
    }

    #[test]
    fn test_late_remote_slots_below_acknowledged_local() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        let mine = stroke(0.0).by("alice");
        surface.apply(&mine);
        history.record_sent(mine.clone());
        history.acknowledge(3, &mut surface);

        let theirs = stroke(5.0).by("bob");
        history.apply_remote(LoggedAction::new(2, theirs.clone()), &mut surface);

        let mut expected = VectorSurface::new();
        replay(&mut expected, &[theirs, mine]);
        assert_eq!(surface, expected);
    }

    #[test]
    fn test_remote_clear_below_local_stroke_keeps_stroke() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        let mine = stroke(0.0).by("alice");
        surface.apply(&mine);
        history.record_sent(mine);

        history.apply_remote(LoggedAction::new(1, Action::clear().by("bob")), &mut surface);
        history.acknowledge(2, &mut surface);
        assert_eq!(surface.primitive_count(), 1);
    }

    #[test]
    fn test_remote_at_tail_applied_on_top() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        let mine = stroke(0.0);
        surface.apply(&mine);
        history.record_sent(mine);
        history.acknowledge(1, &mut surface);

        history.apply_remote(LoggedAction::new(2, stroke(5.0).by("bob")), &mut surface);
        assert_eq!(surface.primitive_count(), 2);
        assert_eq!(history.visible_actions()[1].author_id, "bob");
    }

    #[test]
    fn test_acknowledgement_for_discarded_action_is_skipped() {
        let mut history = HistoryController::default();
        let mut surface = VectorSurface::new();
        commit_sent(&mut history, &mut surface, stroke(0.0));
        history.undo(&mut surface);
        commit_sent(&mut history, &mut surface, stroke(1.0));
        assert_eq!(history.unacknowledged(), 2);

        history.acknowledge(1, &mut surface);
        history.acknowledge(2, &mut surface);
        history.apply_remote(LoggedAction::new(3, stroke(9.0).by("bob")), &mut surface);

        let visible = history.visible_actions();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].payload, stroke(1.0).payload);
        assert_eq!(surface.primitive_count(), 2);
    }
}
