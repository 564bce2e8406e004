//! The append-only action log.
//!
//! A log assigns each appended action the next sequence number, starting at 1.
//! Sequence numbers are strictly increasing and gap-free; nothing is ever
//! edited or removed. A `clear` is an ordinary entry.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryActionLog;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileActionLog;

use crate::action::{Action, ActionError, LoggedAction};
use thiserror::Error;

/// Log errors.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log unavailable: {0}")]
    Unavailable(String),
    #[error("Rejected action: {0}")]
    Invalid(#[from] ActionError),
    #[error("Corrupt log entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// An ordered, append-only sequence of actions for one session.
pub trait ActionLog {
    /// Append an action and return its sequence number.
    fn append(&mut self, action: Action) -> LogResult<u64>;

    /// Actions with `from_seq <= sequence <= to_seq`, in order.
    ///
    /// Bounds are clamped to the log; an inverted range is empty.
    fn range(&self, from_seq: u64, to_seq: u64) -> LogResult<Vec<LoggedAction>>;

    /// Number of appended actions (equal to the last sequence number).
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole log, in order.
    fn all(&self) -> LogResult<Vec<LoggedAction>> {
        self.range(1, self.len())
    }
}

/// Slice `entries` (sequence `i + 1` at index `i`) to an inclusive sequence range.
pub(crate) fn slice_range(entries: &[LoggedAction], from_seq: u64, to_seq: u64) -> Vec<LoggedAction> {
    let from = from_seq.max(1);
    let to = to_seq.min(entries.len() as u64);
    if from > to {
        return Vec::new();
    }
    entries[(from - 1) as usize..to as usize].to_vec()
}

/// The actions still visible after replay: everything after the last `clear`.
pub fn visible_since_last_clear(entries: &[LoggedAction]) -> &[LoggedAction] {
    match entries.iter().rposition(|entry| entry.action.is_clear()) {
        Some(index) => &entries[index + 1..],
        None => entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;

    fn logged(sequence: u64, action: Action) -> LoggedAction {
        LoggedAction::new(sequence, action)
    }

    #[test]
    fn test_visible_since_last_clear() {
        let entries = vec![
            logged(1, Action::text("a", Point::ZERO)),
            logged(2, Action::clear()),
            logged(3, Action::text("b", Point::ZERO)),
            logged(4, Action::text("c", Point::ZERO)),
        ];
        let visible = visible_since_last_clear(&entries);
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].sequence, 3);
    }

    #[test]
    fn test_visible_ends_with_clear() {
        let entries = vec![logged(1, Action::text("a", Point::ZERO)), logged(2, Action::clear())];
        assert!(visible_since_last_clear(&entries).is_empty());
    }

    #[test]
    fn test_slice_range_clamps() {
        let entries: Vec<_> = (1..=3).map(|s| logged(s, Action::clear())).collect();
        assert_eq!(slice_range(&entries, 0, 10).len(), 3);
        assert_eq!(slice_range(&entries, 2, 2)[0].sequence, 2);
        assert!(slice_range(&entries, 3, 2).is_empty());
        assert!(slice_range(&entries, 4, 9).is_empty());
    }
}
