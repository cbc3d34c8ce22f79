//! Local overlay of actions in flight against files.
//!
//! Snapshot records are never edited to show "archiving" and the like;
//! the overlay is consulted when the file view is assembled. Marks are
//! held by a guard and released on drop, so a failed or panicking action
//! cannot leave a file pending forever.

use crate::{
    models::file::{FileId, FileRecord, FileView, PendingAction},
    services::{read_lock, write_lock},
};
use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

/// Marks per file in the order they were taken; the newest is shown.
type Marks = HashMap<FileId, Vec<(u64, PendingAction)>>;

#[derive(Clone, Default)]
pub struct PendingActions {
    marks: Arc<RwLock<Marks>>,
    next_token: Arc<AtomicU64>,
}

impl PendingActions {
    /// Mark `id` until the returned guard is dropped.
    pub fn mark(&self, id: FileId, action: PendingAction) -> PendingGuard {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        write_lock(&self.marks)
            .entry(id)
            .or_default()
            .push((token, action));
        PendingGuard {
            marks: self.marks.clone(),
            id,
            token,
        }
    }

    pub fn get(&self, id: FileId) -> Option<PendingAction> {
        newest(&read_lock(&self.marks), id)
    }

    /// Number of files with at least one mark.
    pub fn len(&self) -> usize {
        read_lock(&self.marks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pair each record with its pending mark.
    pub fn overlay(&self, files: Vec<FileRecord>) -> Vec<FileView> {
        let marks = read_lock(&self.marks);
        files
            .into_iter()
            .map(|record| FileView {
                pending: newest(&marks, record.id),
                record,
            })
            .collect()
    }
}

fn newest(marks: &Marks, id: FileId) -> Option<PendingAction> {
    marks.get(&id).and_then(|held| held.last()).map(|(_, action)| *action)
}

pub struct PendingGuard {
    marks: Arc<RwLock<Marks>>,
    id: FileId,
    token: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut marks = write_lock(&self.marks);
        if let Some(held) = marks.get_mut(&self.id) {
            held.retain(|(token, _)| *token != self.token);
            if held.is_empty() {
                marks.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: FileId) -> FileRecord {
        FileRecord {
            id,
            filename: format!("f{id}"),
            size: 1,
            compressed_size: 1,
            primary_location: None,
            upload_timestamp: None,
        }
    }

    #[test]
    fn guard_releases_mark_on_drop() {
        let pending = PendingActions::default();
        {
            let _guard = pending.mark(7, PendingAction::Archiving);
            let view = pending.overlay(vec![record(7), record(8)]);
            assert_eq!(view[0].pending, Some(PendingAction::Archiving));
            assert_eq!(view[1].pending, None);
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn older_guard_leaves_newer_mark() {
        let pending = PendingActions::default();
        let first = pending.mark(1, PendingAction::Archiving);
        let _second = pending.mark(1, PendingAction::Deleting);
        drop(first);
        assert_eq!(pending.get(1), Some(PendingAction::Deleting));
    }

    #[test]
    fn overlapping_equal_marks_last_until_both_finish() {
        let pending = PendingActions::default();

        let single = pending.mark(4, PendingAction::Archiving);
        let batch = pending.mark(4, PendingAction::Archiving);
        drop(single);
        assert_eq!(pending.get(4), Some(PendingAction::Archiving));
        drop(batch);
        assert_eq!(pending.get(4), None);

        let single = pending.mark(4, PendingAction::Archiving);
        let batch = pending.mark(4, PendingAction::Archiving);
        drop(batch);
        assert_eq!(pending.get(4), Some(PendingAction::Archiving));
        drop(single);
        assert!(pending.is_empty());
    }

    #[test]
    fn newer_guard_dropped_first_reveals_older_mark() {
        let pending = PendingActions::default();
        let _first = pending.mark(1, PendingAction::Archiving);
        let second = pending.mark(1, PendingAction::Deleting);
        drop(second);
        assert_eq!(pending.get(1), Some(PendingAction::Archiving));
        assert_eq!(pending.len(), 1);
    }
}
