use std::collections::VecDeque;

use super::sequence::EditSequence;

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Undo,
    Redo,
}

impl HistoryAction {
    pub const fn applied_message(self) -> &'static str {
        match self {
            Self::Undo => "undo applied",
            Self::Redo => "redo applied",
        }
    }

    pub const fn empty_message(self) -> &'static str {
        match self {
            Self::Undo => "undo stack empty",
            Self::Redo => "redo stack empty",
        }
    }
}

/// Immutable snapshot of a sequence taken after a mutation.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    sequence: EditSequence,
}

impl HistoryEntry {
    pub fn sequence(&self) -> &EditSequence {
        &self.sequence
    }
}

/// Linear, bounded snapshot timeline with a cursor on the current state.
///
/// Recording after an undo drops the redo branch. Recording past capacity
/// evicts the oldest snapshot for good.
#[derive(Debug, Clone)]
pub struct EditHistory {
    entries: VecDeque<HistoryEntry>,
    cursor: Option<usize>,
    capacity: usize,
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl EditHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            cursor: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the current snapshot, `None` when nothing was recorded.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn record(&mut self, sequence: &EditSequence) {
        let keep = self.cursor.map_or(0, |cursor| cursor + 1);
        self.entries.truncate(keep);
        self.entries.push_back(HistoryEntry {
            sequence: sequence.clone(),
        });
        let mut cursor = keep;

        if self.entries.len() > self.capacity {
            self.entries.pop_front();
            cursor -= 1;
        }
        self.cursor = Some(cursor);
        tracing::debug!(
            cursor,
            len = self.entries.len(),
            images = sequence.len(),
            "history snapshot recorded"
        );
    }

    pub fn can_undo(&self) -> bool {
        self.cursor.is_some_and(|cursor| cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor
            .is_some_and(|cursor| cursor + 1 < self.entries.len())
    }

    pub fn undo(&mut self) -> Option<EditSequence> {
        self.step(HistoryAction::Undo)
    }

    pub fn redo(&mut self) -> Option<EditSequence> {
        self.step(HistoryAction::Redo)
    }

    fn step(&mut self, action: HistoryAction) -> Option<EditSequence> {
        let target = match (action, self.cursor) {
            (HistoryAction::Undo, Some(cursor)) if cursor > 0 => cursor - 1,
            (HistoryAction::Redo, Some(cursor)) if cursor + 1 < self.entries.len() => cursor + 1,
            _ => {
                tracing::debug!("{}", action.empty_message());
                return None;
            }
        };

        self.cursor = Some(target);
        tracing::debug!(cursor = target, "{}", action.applied_message());
        self.entries
            .get(target)
            .map(|entry| entry.sequence.clone())
    }

    /// Copy of the snapshot at the cursor.
    pub fn current(&self) -> Option<EditSequence> {
        self.cursor
            .and_then(|cursor| self.entries.get(cursor))
            .map(|entry| entry.sequence.clone())
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Drops every snapshot, releasing the rasters only they were holding.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}
