//! src/services/console.rs
//!
//! Console: wires the gate, the poller and the per-entity state machines
//! into the operations an operator can issue. Every operation catches its
//! failures here and returns them as `ConsoleError`; none of them ends
//! the session.

use crate::{
    config::AppConfig,
    errors::{ConsoleError, ConsoleResult},
    models::{
        admin::{ActionReceipt, DeduplicationStats, ReallocationReport},
        backup::BackupRecord,
        file::{FileId, FileRecord, FileView, PendingAction, UploadReceipt},
        node::NodeHealth,
        tier::{StorageTierSummary, TierTotals},
        verify::VerifyCounts,
        version::VersionSet,
    },
    services::{
        backend::{BackendClient, CredentialCheck},
        batch::{BatchOperation, BatchReport, Selection, settle_all},
        pending::PendingActions,
        poller::{CollectionKind, EntityPoller, RefreshOutcome},
        session::{Credential, CredentialStore, SessionGate},
        uploads::UploadTracker,
        verification::VerificationTracker,
        versions::VersionController,
    },
};
use futures::future::join_all;
use std::{
    future::Future,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Console {
    backend: BackendClient,
    gate: SessionGate,
    selection: Selection,
    poller: EntityPoller,
    pending: PendingActions,
    verifications: VerificationTracker,
    uploads: UploadTracker,
    versions: VersionController,
    nominal_capacity: u64,
    schedule: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Console {
    /// Open the persisted session store named in `config` and build a console.
    pub async fn connect(config: &AppConfig) -> ConsoleResult<Self> {
        let store = CredentialStore::connect(&config.session_db_url).await?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: &AppConfig, store: CredentialStore) -> ConsoleResult<Self> {
        let backend = BackendClient::new(&config.backend_url, config.request_timeout)?;
        let gate = SessionGate::new(store);
        let selection = Selection::default();
        let poller = EntityPoller::new(
            backend.clone(),
            gate.clone(),
            selection.clone(),
            config.poll_interval,
        );
        let versions = VersionController::new(backend.clone(), poller.clone());
        Ok(Self {
            backend,
            gate,
            selection,
            poller,
            pending: PendingActions::default(),
            verifications: VerificationTracker::default(),
            uploads: UploadTracker::default(),
            versions,
            nominal_capacity: config.nominal_capacity_bytes,
            schedule: Arc::new(Mutex::new(None)),
        })
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn poller(&self) -> &EntityPoller {
        &self.poller
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn verifications(&self) -> &VerificationTracker {
        &self.verifications
    }

    pub fn uploads(&self) -> &UploadTracker {
        &self.uploads
    }

    pub fn versions(&self) -> &VersionController {
        &self.versions
    }

    pub fn pending(&self) -> &PendingActions {
        &self.pending
    }

    // --- Session ---

    /// Check `key` with the backend; on acceptance the privileged
    /// collections are fetched straight away.
    pub async fn login(&self, key: &str) -> ConsoleResult<CredentialCheck> {
        let verdict = self.gate.login(&self.backend, Credential::new(key)).await?;
        if verdict == CredentialCheck::Accepted {
            self.refresh_privileged().await;
        }
        Ok(verdict)
    }

    /// Reopen a persisted session if the backend still accepts it.
    pub async fn resume(&self) -> ConsoleResult<bool> {
        let resumed = self.gate.resume(&self.backend).await?;
        if resumed {
            self.refresh_privileged().await;
        }
        Ok(resumed)
    }

    pub async fn logout(&self) -> ConsoleResult<()> {
        self.gate.logout().await
    }

    async fn refresh_privileged(&self) {
        tokio::join!(
            self.poller.refresh(CollectionKind::NodeHealth),
            self.poller.refresh(CollectionKind::StorageTiers),
        );
    }

    // --- Schedule ---

    /// Start periodic refresh. A second call while running does nothing.
    pub fn activate(&self) {
        let mut schedule = self.schedule.lock().unwrap_or_else(PoisonError::into_inner);
        if schedule.is_none() && !self.poller.is_cancelled() {
            *schedule = Some(self.poller.spawn());
        }
    }

    /// Stop periodic refresh and wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.poller.cancel();
        let handle = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!("poller task ended abnormally: {}", e);
            }
        }
    }

    pub async fn refresh(&self, kind: CollectionKind) -> RefreshOutcome {
        self.poller.refresh(kind).await
    }

    // --- Views ---

    pub fn files_view(&self) -> Vec<FileView> {
        self.pending.overlay(self.poller.snapshots().files())
    }

    pub fn nodes(&self) -> Vec<NodeHealth> {
        self.poller.snapshots().nodes()
    }

    pub fn tiers(&self) -> Vec<StorageTierSummary> {
        self.poller.snapshots().tiers()
    }

    pub fn tier_totals(&self) -> TierTotals {
        self.poller.snapshots().tier_totals(self.nominal_capacity)
    }

    pub fn collection_error(&self, kind: CollectionKind) -> Option<String> {
        self.poller.snapshots().error(kind)
    }

    fn resolve(&self, id: FileId) -> ConsoleResult<FileRecord> {
        self.poller
            .snapshots()
            .file(id)
            .ok_or_else(|| ConsoleError::stale_file(id))
    }

    pub fn resolve_name(&self, filename: &str) -> ConsoleResult<FileRecord> {
        self.poller
            .snapshots()
            .file_by_name(filename)
            .ok_or_else(|| ConsoleError::StaleReference {
                kind: "file",
                id: filename.to_string(),
            })
    }

    /// Add a file present in the latest snapshot to the selection.
    pub fn select(&self, id: FileId) -> ConsoleResult<()> {
        self.resolve(id)?;
        self.selection.select(id);
        Ok(())
    }

    // --- Verification ---

    /// Mark `node` as verifying and issue the call in the background.
    ///
    /// The gate check and the running-job conflict check happen before this
    /// returns; in both cases no backend call is made.
    pub fn start_verification(
        &self,
        node: &str,
    ) -> ConsoleResult<JoinHandle<ConsoleResult<VerifyCounts>>> {
        let credential = self.gate.require()?;
        let run_id = self.verifications.begin(node)?;
        let console = self.clone();
        let node = node.to_string();

        Ok(tokio::spawn(async move {
            match console.backend.verify_node(&credential, &node).await {
                Ok(counts) => {
                    console.verifications.succeed(&node, run_id, counts);
                    console.poller.refresh(CollectionKind::NodeHealth).await;
                    Ok(counts)
                }
                Err(e) => {
                    console.verifications.fail(&node, run_id, e.to_string());
                    if e.is_auth() {
                        console.gate.invalidate(&e.to_string()).await;
                    }
                    Err(e)
                }
            }
        }))
    }

    /// Verify `node` and wait for the job to settle.
    pub async fn verify_node(&self, node: &str) -> ConsoleResult<VerifyCounts> {
        let handle = self.start_verification(node)?;
        handle
            .await
            .map_err(|e| ConsoleError::TransportFailure(format!("verification task: {e}")))?
    }

    // --- Batch ---

    /// Run `operation` over the current selection.
    ///
    /// Returns after every item settled, the batch's ids were removed from
    /// the selection, and one files refresh was issued. Item failures are in
    /// the report; see `BatchReport::ensure_complete`.
    pub async fn run_batch(&self, operation: BatchOperation) -> ConsoleResult<BatchReport> {
        let credential = if operation.is_privileged() {
            Some(self.gate.require()?)
        } else {
            None
        };
        let selected = self.selection.ids();
        let snapshot = self.poller.snapshots().files();
        info!(operation = operation.name(), items = selected.len(), "starting batch");

        let report = settle_all(&operation, &selected, &snapshot, |file| {
            self.batch_item(&operation, credential.as_ref(), file)
        })
        .await;

        self.selection.remove_all(&selected);
        self.poller.refresh(CollectionKind::Files).await;
        Ok(report)
    }

    async fn batch_item(
        &self,
        operation: &BatchOperation,
        credential: Option<&Credential>,
        file: FileRecord,
    ) -> ConsoleResult<()> {
        let _pending = self.pending.mark(file.id, operation.pending_action());
        let privileged = || credential.ok_or_else(ConsoleError::not_authenticated);
        match operation {
            BatchOperation::Delete => {
                self.backend.delete_file(privileged()?, file.id).await?;
            }
            BatchOperation::Archive => {
                self.backend.archive_file(privileged()?, file.id).await?;
            }
            BatchOperation::Restore => {
                self.backend.restore_file(privileged()?, file.id).await?;
            }
            BatchOperation::Reallocate => {
                let report = self.backend.reallocate_file(privileged()?, file.id).await?;
                if report.failed() > 0 {
                    warn!(
                        file_id = file.id,
                        reallocated = report.reallocated(),
                        failed = report.failed(),
                        "reallocation left chunks behind"
                    );
                }
            }
            BatchOperation::Download { dest_dir } => {
                let dest = local_destination(dest_dir, &file.filename)?;
                self.backend.download_to(&file.filename, None, &dest).await?;
            }
        }
        Ok(())
    }

    // --- Single-file actions ---

    async fn file_action<T, F, Fut>(
        &self,
        id: FileId,
        action: PendingAction,
        call: F,
    ) -> ConsoleResult<T>
    where
        F: FnOnce(BackendClient, Credential, FileRecord) -> Fut,
        Fut: Future<Output = ConsoleResult<T>>,
    {
        let credential = self.gate.require()?;
        let file = self.resolve(id)?;
        let result = {
            let _pending = self.pending.mark(id, action);
            call(self.backend.clone(), credential, file).await
        };
        match &result {
            Ok(_) => info!(file_id = id, "{} finished", action.label()),
            Err(e) => warn!(file_id = id, "{} failed: {}", action.label(), e),
        }
        self.poller.refresh(CollectionKind::Files).await;
        result
    }

    pub async fn archive_file(&self, id: FileId) -> ConsoleResult<ActionReceipt> {
        self.file_action(id, PendingAction::Archiving, |backend, cred, file| async move {
            backend.archive_file(&cred, file.id).await
        })
        .await
    }

    pub async fn restore_file(&self, id: FileId) -> ConsoleResult<ActionReceipt> {
        self.file_action(id, PendingAction::Restoring, |backend, cred, file| async move {
            backend.restore_file(&cred, file.id).await
        })
        .await
    }

    pub async fn reallocate_file(&self, id: FileId) -> ConsoleResult<ReallocationReport> {
        self.file_action(id, PendingAction::Reallocating, |backend, cred, file| async move {
            backend.reallocate_file(&cred, file.id).await
        })
        .await
    }

    pub async fn delete_file(&self, id: FileId) -> ConsoleResult<ActionReceipt> {
        self.file_action(id, PendingAction::Deleting, |backend, cred, file| async move {
            backend.delete_file(&cred, file.id).await
        })
        .await
    }

    /// Save the current version of file `id` into `dest_dir`.
    pub async fn download_file(&self, id: FileId, dest_dir: &Path) -> ConsoleResult<PathBuf> {
        let file = self.resolve(id)?;
        let dest = local_destination(dest_dir, &file.filename)?;
        let _pending = self.pending.mark(id, PendingAction::Downloading);
        self.backend.download_to(&file.filename, None, &dest).await?;
        Ok(dest)
    }

    // --- Uploads ---

    /// Upload every path concurrently, one session per file name.
    ///
    /// Each entry's outcome is independent of its siblings.
    pub async fn upload_files(
        &self,
        paths: &[PathBuf],
    ) -> Vec<(String, ConsoleResult<UploadReceipt>)> {
        join_all(paths.iter().map(|path| self.upload_one(path))).await
    }

    async fn upload_one(&self, path: &Path) -> (String, ConsoleResult<UploadReceipt>) {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let total = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

        let session_id = match self.uploads.open(&file_name, total) {
            Ok(id) => id,
            Err(e) => return (file_name, Err(e)),
        };

        let tracker = self.uploads.clone();
        let name = file_name.clone();
        let result = self
            .backend
            .upload(path, &file_name, move |sent, total| {
                let fraction = if total == 0 {
                    1.0
                } else {
                    sent as f64 / total as f64
                };
                tracker.record_progress(&name, session_id, fraction);
            })
            .await;

        match &result {
            Ok(_) => {
                self.uploads.record_progress(&file_name, session_id, 1.0);
                self.uploads.succeed(&file_name, session_id);
                self.poller.refresh(CollectionKind::Files).await;
            }
            Err(e) => {
                self.uploads.fail(&file_name, session_id, e.to_string());
            }
        }
        (file_name, result)
    }

    // --- Versions ---

    /// Show the versions of file `id`, always fetched fresh.
    pub async fn select_file(&self, id: FileId) -> ConsoleResult<VersionSet> {
        let file = self.resolve(id)?;
        self.versions.select(&file.filename).await
    }

    // --- On-demand privileged reads ---

    pub async fn deduplication_stats(&self) -> ConsoleResult<DeduplicationStats> {
        let credential = self.gate.require()?;
        self.backend.deduplication_stats(&credential).await
    }

    pub async fn backups(&self) -> ConsoleResult<Vec<BackupRecord>> {
        let credential = self.gate.require()?;
        self.backend.list_backups(&credential).await
    }
}

/// Where a file called `filename` lands inside `dest_dir`.
///
/// Names come from the backend, so only a single plain component is
/// accepted: no roots, no `.`/`..`, no separators of either kind.
pub fn local_destination(dest_dir: &Path, filename: &str) -> ConsoleResult<PathBuf> {
    let unsafe_name = || ConsoleError::UnsafeFileName(filename.to_string());
    if filename.contains(['/', '\\']) || filename.bytes().any(|b| b.is_ascii_control()) {
        return Err(unsafe_name());
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(dest_dir.join(name)),
        _ => Err(unsafe_name()),
    }
}
