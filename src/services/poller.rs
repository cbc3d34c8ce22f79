//! src/services/poller.rs
//!
//! EntityPoller: keeps the files, node health and storage tier snapshots
//! fresh. Each collection is fetched and replaced on its own; one failing
//! never touches the others.
//!
//! Every fetch is tagged with a per-collection sequence number taken before
//! the request goes out. A response is applied only when its number is
//! higher than the last one applied, so a slow early request can never
//! overwrite a later one.

use crate::{
    errors::ConsoleResult,
    models::{
        file::{FileId, FileRecord},
        node::NodeHealth,
        tier::{StorageTierSummary, TierTotals},
    },
    services::{
        backend::BackendClient, batch::Selection, read_lock, session::SessionGate, write_lock,
    },
};
use chrono::{DateTime, Utc};
use std::{
    future::Future,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Files,
    NodeHealth,
    StorageTiers,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 3] = [
        CollectionKind::Files,
        CollectionKind::NodeHealth,
        CollectionKind::StorageTiers,
    ];

    /// Node health and tiers require an open session gate.
    pub fn is_privileged(&self) -> bool {
        !matches!(self, CollectionKind::Files)
    }

    pub fn label(&self) -> &'static str {
        match self {
            CollectionKind::Files => "files",
            CollectionKind::NodeHealth => "node health",
            CollectionKind::StorageTiers => "storage tiers",
        }
    }

    fn index(&self) -> usize {
        match self {
            CollectionKind::Files => 0,
            CollectionKind::NodeHealth => 1,
            CollectionKind::StorageTiers => 2,
        }
    }
}

/// What happened to one refresh of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New snapshot installed, error flag cleared.
    Applied,
    /// Fetch failed; last-known-good kept, error flag set.
    Failed(String),
    /// A later-issued request already landed; this result was dropped.
    Superseded,
    /// Privileged collection while the gate is closed; nothing was sent.
    Skipped,
    /// The poller was torn down before the result arrived.
    Cancelled,
}

/// Last-known-good copy of one backend collection.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    items: Vec<T>,
    error: Option<String>,
    last_applied: u64,
    refreshed_at: Option<DateTime<Utc>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            error: None,
            last_applied: 0,
            refreshed_at: None,
        }
    }
}

impl<T> Collection<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Land the result of request `seq`.
    ///
    /// Results older than the last applied request are dropped whether
    /// they succeeded or failed. Successes replace the whole collection.
    pub fn apply(&mut self, seq: u64, result: Result<Vec<T>, String>) -> RefreshOutcome {
        if seq <= self.last_applied {
            return RefreshOutcome::Superseded;
        }
        self.last_applied = seq;
        match result {
            Ok(items) => {
                self.items = items;
                self.error = None;
                self.refreshed_at = Some(Utc::now());
                RefreshOutcome::Applied
            }
            Err(message) => {
                self.error = Some(message.clone());
                RefreshOutcome::Failed(message)
            }
        }
    }
}

/// The three polled collections. Written only by `EntityPoller`.
#[derive(Default)]
pub struct Snapshots {
    files: RwLock<Collection<FileRecord>>,
    nodes: RwLock<Collection<NodeHealth>>,
    tiers: RwLock<Collection<StorageTierSummary>>,
}

impl Snapshots {
    pub fn files(&self) -> Vec<FileRecord> {
        read_lock(&self.files).items().to_vec()
    }

    pub fn file(&self, id: FileId) -> Option<FileRecord> {
        read_lock(&self.files)
            .items()
            .iter()
            .find(|f| f.id == id)
            .cloned()
    }

    pub fn file_by_name(&self, filename: &str) -> Option<FileRecord> {
        read_lock(&self.files)
            .items()
            .iter()
            .find(|f| f.filename == filename)
            .cloned()
    }

    pub fn nodes(&self) -> Vec<NodeHealth> {
        read_lock(&self.nodes).items().to_vec()
    }

    pub fn tiers(&self) -> Vec<StorageTierSummary> {
        read_lock(&self.tiers).items().to_vec()
    }

    pub fn tier_totals(&self, nominal_capacity: u64) -> TierTotals {
        TierTotals::from_tiers(read_lock(&self.tiers).items(), nominal_capacity)
    }

    /// Collection-scoped error flag shown to the operator.
    pub fn error(&self, kind: CollectionKind) -> Option<String> {
        match kind {
            CollectionKind::Files => read_lock(&self.files).error().map(str::to_string),
            CollectionKind::NodeHealth => read_lock(&self.nodes).error().map(str::to_string),
            CollectionKind::StorageTiers => read_lock(&self.tiers).error().map(str::to_string),
        }
    }

    pub fn last_applied(&self, kind: CollectionKind) -> u64 {
        match kind {
            CollectionKind::Files => read_lock(&self.files).last_applied(),
            CollectionKind::NodeHealth => read_lock(&self.nodes).last_applied(),
            CollectionKind::StorageTiers => read_lock(&self.tiers).last_applied(),
        }
    }

    pub fn refreshed_at(&self, kind: CollectionKind) -> Option<DateTime<Utc>> {
        match kind {
            CollectionKind::Files => read_lock(&self.files).refreshed_at(),
            CollectionKind::NodeHealth => read_lock(&self.nodes).refreshed_at(),
            CollectionKind::StorageTiers => read_lock(&self.tiers).refreshed_at(),
        }
    }
}

struct PollerInner {
    backend: BackendClient,
    gate: SessionGate,
    selection: Selection,
    snapshots: Arc<Snapshots>,
    interval: Duration,
    cancel: CancellationToken,
    issued: [AtomicU64; 3],
}

/// Periodic refresher for the three snapshots. Cheap to clone.
#[derive(Clone)]
pub struct EntityPoller {
    inner: Arc<PollerInner>,
}

impl EntityPoller {
    pub fn new(
        backend: BackendClient,
        gate: SessionGate,
        selection: Selection,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                backend,
                gate,
                selection,
                snapshots: Arc::new(Snapshots::default()),
                interval,
                cancel: CancellationToken::new(),
                issued: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            }),
        }
    }

    pub fn snapshots(&self) -> Arc<Snapshots> {
        self.inner.snapshots.clone()
    }

    /// Start the schedule: one cycle now, then one per interval.
    pub fn spawn(&self) -> JoinHandle<()> {
        let poller = self.clone();
        tokio::spawn(async move { poller.run().await })
    }

    async fn run(&self) {
        let mut tick = tokio::time::interval(self.inner.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.inner.interval, "entity poller started");

        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.poll_all().await;
        }

        info!("entity poller stopped");
    }

    /// Stop the schedule. Results of fetches still in flight are dropped.
    /// Calling this more than once is harmless.
    pub fn cancel(&self) {
        if !self.inner.cancel.is_cancelled() {
            debug!("cancelling entity poller");
        }
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// One full cycle: all three collections, concurrently and independently.
    pub async fn poll_all(&self) -> [RefreshOutcome; 3] {
        let (files, nodes, tiers) = tokio::join!(
            self.refresh(CollectionKind::Files),
            self.refresh(CollectionKind::NodeHealth),
            self.refresh(CollectionKind::StorageTiers),
        );
        [files, nodes, tiers]
    }

    /// Refresh a single collection now, alongside whatever the schedule is
    /// doing. Ordering against concurrent refreshes is by issue order.
    pub async fn refresh(&self, kind: CollectionKind) -> RefreshOutcome {
        if self.is_cancelled() {
            return RefreshOutcome::Cancelled;
        }
        let inner = &self.inner;
        match kind {
            CollectionKind::Files => {
                let outcome = self
                    .fetch_and_apply(kind, &inner.snapshots.files, inner.backend.list_files())
                    .await;
                if outcome == RefreshOutcome::Applied {
                    let files = inner.snapshots.files();
                    let dropped = inner.selection.retain_present(&files);
                    if !dropped.is_empty() {
                        debug!(?dropped, "deselected files missing from refreshed snapshot");
                    }
                }
                outcome
            }
            CollectionKind::NodeHealth => {
                let Some(credential) = inner.gate.credential() else {
                    return RefreshOutcome::Skipped;
                };
                self.fetch_and_apply(
                    kind,
                    &inner.snapshots.nodes,
                    inner.backend.node_health(&credential),
                )
                .await
            }
            CollectionKind::StorageTiers => {
                let Some(credential) = inner.gate.credential() else {
                    return RefreshOutcome::Skipped;
                };
                self.fetch_and_apply(
                    kind,
                    &inner.snapshots.tiers,
                    inner.backend.storage_tiers(&credential),
                )
                .await
            }
        }
    }

    fn issue(&self, kind: CollectionKind) -> u64 {
        self.inner.issued[kind.index()].fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn fetch_and_apply<T, F>(
        &self,
        kind: CollectionKind,
        collection: &RwLock<Collection<T>>,
        fetch: F,
    ) -> RefreshOutcome
    where
        F: Future<Output = ConsoleResult<Vec<T>>>,
    {
        // `fetch` has not been polled yet, so the number is taken before
        // the request leaves.
        let seq = self.issue(kind);
        let result = fetch.await;

        if self.is_cancelled() {
            debug!(collection = kind.label(), seq, "discarding result after cancellation");
            return RefreshOutcome::Cancelled;
        }

        if let Err(err) = &result {
            if err.is_auth() && kind.is_privileged() {
                self.inner.gate.invalidate(&err.to_string()).await;
                // Invalidation waits on the session store.
                if self.is_cancelled() {
                    debug!(collection = kind.label(), seq, "discarding result after cancellation");
                    return RefreshOutcome::Cancelled;
                }
            }
        }

        let outcome = write_lock(collection).apply(seq, result.map_err(|e| e.to_string()));
        match &outcome {
            RefreshOutcome::Applied => debug!(collection = kind.label(), seq, "snapshot refreshed"),
            RefreshOutcome::Failed(message) => {
                warn!(collection = kind.label(), seq, "refresh failed: {}", message)
            }
            RefreshOutcome::Superseded => {
                debug!(collection = kind.label(), seq, "stale response dropped")
            }
            RefreshOutcome::Skipped | RefreshOutcome::Cancelled => {}
        }
        outcome
    }
}
