//! # The in-process note FIFO.
//!
//! [`NoteQueue`] is the single queue both halves of the supervisor write
//! into. No priority, no coalescing: notes come back out in the order they
//! went in, and the manager drains the queue to empty after each external
//! event before waiting for the next one.

use std::collections::VecDeque;

use super::Note;

/// FIFO of notes exchanged between the graph engine and the restarter core.
#[derive(Debug, Default)]
pub struct NoteQueue {
    items: VecDeque<Note>,
}

impl NoteQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a note at the tail.
    pub fn push(&mut self, note: Note) {
        self.items.push_back(note);
    }

    /// Removes and returns the head note.
    pub fn pop(&mut self) -> Option<Note> {
        self.items.pop_front()
    }

    /// Number of queued notes.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::{RequestKind, RestartOn, StateChangeKind};
    use crate::path::ServicePath;

    #[test]
    fn drains_in_insertion_order() {
        let mut q = NoteQueue::new();
        let a = ServicePath::instance("a", "i");
        let b = ServicePath::instance("b", "i");

        q.push(Note::state_change(
            StateChangeKind::Offline,
            a.clone(),
            RestartOn::Restart,
        ));
        q.push(Note::request(RequestKind::Start, b.clone(), RestartOn::None));

        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap().path(), &a);
        assert_eq!(q.pop().unwrap().path(), &b);
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }
}
