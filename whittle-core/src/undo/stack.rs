//! Bounded undo/redo history. Two stacks of [`UndoRecord`]s: performing a
//! fresh edit pushes its inverse and invalidates the redo branch, undoing
//! pops one side and pushes the resulting inverse on the other.

use std::collections::VecDeque;

use crate::context::EditingContext;
use crate::undo::{CacheError, UndoRecord};

/// Notified whenever the availability of undo or redo may have changed, so
/// menu items and toolbar buttons can refresh their enabled state.
pub trait HistoryObserver: Send {
    fn history_changed(&mut self, can_undo: bool, can_redo: bool);
}

pub struct UndoStack {
    undo: VecDeque<UndoRecord>,
    redo: Vec<UndoRecord>,
    levels: usize,
    observers: Vec<Box<dyn HistoryObserver>>,
}

impl UndoStack {
    /// A depth below 1 is rounded up: an editor with no undo at all is a
    /// trap for the user.
    #[must_use]
    pub fn new(undo_levels: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            levels: undo_levels.max(1),
            observers: Vec::new(),
        }
    }

    /// Change the history depth. Records beyond the new depth are not
    /// evicted immediately; the trim happens on the next [`UndoStack::push`].
    pub fn set_undo_levels(&mut self, undo_levels: usize) {
        self.levels = undo_levels.max(1);
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
    /// Name of the record an undo would execute, for menu labels.
    #[must_use]
    pub fn undo_name(&self) -> Option<String> {
        self.undo.back().map(UndoRecord::name)
    }
    #[must_use]
    pub fn redo_name(&self) -> Option<String> {
        self.redo.last().map(UndoRecord::name)
    }

    pub fn add_observer(&mut self, observer: Box<dyn HistoryObserver>) {
        self.observers.push(observer);
    }

    /// Record a freshly performed edit: `record` is the script that undoes
    /// it. The oldest entries are evicted down to the configured depth, the
    /// redo branch is invalidated, and heavy payloads are queued for
    /// spilling.
    pub fn push(&mut self, record: UndoRecord) {
        while self.undo.len() >= self.levels {
            self.undo.pop_front();
        }
        self.undo.push_back(record);
        self.redo.clear();
        if let Some(newest) = self.undo.back() {
            newest.cache_to_disk();
        }
        self.notify();
    }

    /// Execute the most recent undo record. Returns `Ok(false)` when there
    /// is nothing to undo. A cache reload failure leaves the scene untouched
    /// and the record on the stack, still eligible for a retry.
    pub fn undo(&mut self, ctx: &mut dyn EditingContext) -> Result<bool, CacheError> {
        let Some(record) = self.undo.pop_back() else {
            return Ok(false);
        };
        match record.execute(ctx) {
            Ok(inverse) => {
                self.redo.push(inverse);
                self.notify();
                Ok(true)
            }
            Err(e) => {
                self.undo.push_back(record);
                Err(e)
            }
        }
    }

    /// Execute the most recent redo record. Same contract as
    /// [`UndoStack::undo`].
    pub fn redo(&mut self, ctx: &mut dyn EditingContext) -> Result<bool, CacheError> {
        let Some(record) = self.redo.pop() else {
            return Ok(false);
        };
        match record.execute(ctx) {
            Ok(inverse) => {
                // Redoing does not grow history: the inverse replaces the
                // record that was popped, so the depth bound is only
                // enforced on fresh pushes.
                self.undo.push_back(inverse);
                self.notify();
                Ok(true)
            }
            Err(e) => {
                self.redo.push(record);
                Err(e)
            }
        }
    }

    fn notify(&mut self) {
        let (can_undo, can_redo) = (!self.undo.is_empty(), !self.redo.is_empty());
        for observer in &mut self.observers {
            observer.history_changed(can_undo, can_redo);
        }
    }
}
