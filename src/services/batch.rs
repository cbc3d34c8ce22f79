//! src/services/batch.rs
//!
//! Batch action coordinator. Runs one operation over every selected file,
//! waits for all of them to settle, and reports partial failure without
//! undoing what succeeded.

use crate::{
    errors::{ConsoleError, ConsoleResult, ItemFailure},
    models::file::{FileId, FileRecord, PendingAction},
    services::{read_lock, write_lock},
};
use futures::future::join_all;
use std::{
    collections::BTreeSet,
    future::Future,
    path::PathBuf,
    sync::{Arc, RwLock},
};
use tracing::{debug, info, warn};

/// Files the operator has picked. Not persisted.
#[derive(Clone, Default)]
pub struct Selection {
    ids: Arc<RwLock<BTreeSet<FileId>>>,
}

impl Selection {
    pub fn select(&self, id: FileId) {
        write_lock(&self.ids).insert(id);
    }

    pub fn deselect(&self, id: FileId) {
        write_lock(&self.ids).remove(&id);
    }

    /// Flip membership; returns whether `id` is now selected.
    pub fn toggle(&self, id: FileId) -> bool {
        let mut ids = write_lock(&self.ids);
        if ids.remove(&id) {
            false
        } else {
            ids.insert(id);
            true
        }
    }

    pub fn contains(&self, id: FileId) -> bool {
        read_lock(&self.ids).contains(&id)
    }

    pub fn ids(&self) -> Vec<FileId> {
        read_lock(&self.ids).iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        write_lock(&self.ids).clear();
    }

    /// Drop just these ids, keeping anything selected since.
    pub fn remove_all(&self, ids: &[FileId]) {
        let mut selected = write_lock(&self.ids);
        for id in ids {
            selected.remove(id);
        }
    }

    /// Keep only ids still present in `files`; returns the ones dropped.
    pub fn retain_present(&self, files: &[FileRecord]) -> Vec<FileId> {
        let present: BTreeSet<FileId> = files.iter().map(|f| f.id).collect();
        let mut selected = write_lock(&self.ids);
        let dropped: Vec<FileId> = selected.difference(&present).copied().collect();
        selected.retain(|id| present.contains(id));
        dropped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Delete,
    /// Save each file into this directory under its own name.
    Download { dest_dir: PathBuf },
    Archive,
    Restore,
    Reallocate,
}

impl BatchOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BatchOperation::Delete => "delete",
            BatchOperation::Download { .. } => "download",
            BatchOperation::Archive => "archive",
            BatchOperation::Restore => "restore",
            BatchOperation::Reallocate => "reallocate",
        }
    }

    /// Everything except download needs the session gate open.
    pub fn is_privileged(&self) -> bool {
        !matches!(self, BatchOperation::Download { .. })
    }

    pub fn pending_action(&self) -> PendingAction {
        match self {
            BatchOperation::Delete => PendingAction::Deleting,
            BatchOperation::Download { .. } => PendingAction::Downloading,
            BatchOperation::Archive => PendingAction::Archiving,
            BatchOperation::Restore => PendingAction::Restoring,
            BatchOperation::Reallocate => PendingAction::Reallocating,
        }
    }
}

/// How a settled batch went, item by item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub operation: &'static str,
    pub succeeded: Vec<FileId>,
    /// Selected but gone from the latest snapshot; not attempted.
    pub skipped: Vec<FileId>,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Aggregate error when anything failed.
    pub fn ensure_complete(&self) -> ConsoleResult<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(ConsoleError::PartialBatchFailure {
            operation: self.operation.to_string(),
            attempted: self.attempted(),
            failures: self.failures.clone(),
        })
    }

    /// Operator-facing summary, listing each failed file.
    pub fn failure_message(&self) -> Option<String> {
        if self.is_complete() {
            return None;
        }
        let names: Vec<String> = self
            .failures
            .iter()
            .map(|f| format!("{} ({})", f.filename, f.reason))
            .collect();
        Some(format!(
            "{} failed for {} of {} file(s): {}",
            self.operation,
            self.failures.len(),
            self.attempted(),
            names.join(", ")
        ))
    }
}

/// Resolve `selected` against `snapshot` and run `op` on every hit at once.
///
/// Ids missing from the snapshot are skipped silently. A failing item does
/// not stop its siblings; the call returns only after every item settled.
pub async fn settle_all<F, Fut>(
    operation: &BatchOperation,
    selected: &[FileId],
    snapshot: &[FileRecord],
    op: F,
) -> BatchReport
where
    F: Fn(FileRecord) -> Fut,
    Fut: Future<Output = ConsoleResult<()>>,
{
    let mut targets = Vec::with_capacity(selected.len());
    let mut skipped = Vec::new();
    for id in selected {
        match snapshot.iter().find(|f| f.id == *id) {
            Some(file) => targets.push(file.clone()),
            None => skipped.push(*id),
        }
    }
    if !skipped.is_empty() {
        debug!(?skipped, "selected files no longer in snapshot");
    }

    let outcomes = join_all(targets.into_iter().map(|file| {
        let fut = op(file.clone());
        async move { (file, fut.await) }
    }))
    .await;

    let mut report = BatchReport {
        operation: operation.name(),
        succeeded: Vec::new(),
        skipped,
        failures: Vec::new(),
    };
    for (file, outcome) in outcomes {
        match outcome {
            Ok(()) => report.succeeded.push(file.id),
            Err(err) => {
                warn!(file_id = file.id, filename = %file.filename, "{} failed: {}", operation.name(), err);
                report.failures.push(ItemFailure {
                    file_id: file.id,
                    filename: file.filename,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        operation = operation.name(),
        succeeded = report.succeeded.len(),
        failed = report.failures.len(),
        skipped = report.skipped.len(),
        "batch settled"
    );
    report
}
