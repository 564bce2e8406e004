//! In-memory action log.

use super::{ActionLog, LogResult, slice_range};
use crate::action::{Action, LoggedAction};

/// In-memory log for tests, local scratchpads and ephemeral server sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryActionLog {
    entries: Vec<LoggedAction>,
}

impl MemoryActionLog {
    /// Create a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the entries without cloning.
    pub fn entries(&self) -> &[LoggedAction] {
        &self.entries
    }
}

impl ActionLog for MemoryActionLog {
    fn append(&mut self, action: Action) -> LogResult<u64> {
        action.validate()?;
        let sequence = self.entries.len() as u64 + 1;
        self.entries.push(LoggedAction::new(sequence, action));
        Ok(sequence)
    }

    fn range(&self, from_seq: u64, to_seq: u64) -> LogResult<Vec<LoggedAction>> {
        Ok(slice_range(&self.entries, from_seq, to_seq))
    }

    fn len(&self) -> u64 {
        self.entries.len() as u64
    }
}
