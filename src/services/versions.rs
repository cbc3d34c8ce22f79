//! src/services/versions.rs
//!
//! VersionController: version history of the selected file, plus
//! download-by-version and rollback.
//!
//! Nothing here is cached across file switches. After a rollback the list
//! is fetched again rather than flipped locally, and the files snapshot is
//! refreshed because the current file's sizes and location may change.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    models::version::{RollbackReceipt, VersionComparison, VersionSet},
    services::{
        backend::BackendClient,
        poller::{CollectionKind, EntityPoller},
        read_lock, write_lock,
    },
};
use serde::Serialize;
use std::{
    path::Path,
    sync::{Arc, RwLock},
};
use tracing::{debug, info, warn};

/// What the version panel shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VersionView {
    pub filename: Option<String>,
    pub set: Option<VersionSet>,
    pub loading: bool,
    /// Last fetch or rollback failure.
    pub error: Option<String>,
    /// Backend-reported set breaks the current-version rule.
    pub inconsistency: Option<String>,
}

#[derive(Default)]
struct ViewState {
    view: VersionView,
    /// Bumped on every selection change; stale fetches compare against it.
    generation: u64,
}

#[derive(Clone)]
pub struct VersionController {
    backend: BackendClient,
    poller: EntityPoller,
    state: Arc<RwLock<ViewState>>,
}

impl VersionController {
    pub fn new(backend: BackendClient, poller: EntityPoller) -> Self {
        Self {
            backend,
            poller,
            state: Arc::new(RwLock::new(ViewState::default())),
        }
    }

    pub fn view(&self) -> VersionView {
        read_lock(&self.state).view.clone()
    }

    /// Switch to `filename` and fetch its versions.
    pub async fn select(&self, filename: &str) -> ConsoleResult<VersionSet> {
        let generation = {
            let mut state = write_lock(&self.state);
            state.generation += 1;
            state.view = VersionView {
                filename: Some(filename.to_string()),
                loading: true,
                ..VersionView::default()
            };
            state.generation
        };
        self.load(generation, filename).await
    }

    /// Deselect; any fetch still in flight is discarded.
    pub fn clear(&self) {
        let mut state = write_lock(&self.state);
        state.generation += 1;
        state.view = VersionView::default();
    }

    /// Fetch the selected file's versions again.
    pub async fn reload(&self) -> ConsoleResult<VersionSet> {
        let (generation, filename) = self.selected()?;
        self.load(generation, &filename).await
    }

    async fn load(&self, generation: u64, filename: &str) -> ConsoleResult<VersionSet> {
        let result = self.backend.list_versions(filename).await;

        let mut state = write_lock(&self.state);
        if state.generation != generation {
            debug!(filename, "discarding versions fetched for a previous selection");
            return result;
        }
        state.view.loading = false;
        match &result {
            Ok(set) => {
                state.view.inconsistency = match set.validate() {
                    Ok(_) => None,
                    Err(e) => {
                        warn!(filename, "backend version set inconsistent: {}", e);
                        Some(e.to_string())
                    }
                };
                state.view.set = Some(set.clone());
                state.view.error = None;
            }
            Err(e) => {
                state.view.error = Some(e.to_string());
            }
        }
        result
    }

    fn selected(&self) -> ConsoleResult<(u64, String)> {
        let state = read_lock(&self.state);
        match &state.view.filename {
            Some(name) => Ok((state.generation, name.clone())),
            None => Err(ConsoleError::ActionConflict("no file selected".into())),
        }
    }

    /// Roll the selected file back to `version`.
    ///
    /// Only non-current versions present in the displayed set qualify. On
    /// failure the displayed set is left exactly as it was.
    pub async fn rollback(&self, version: u32) -> ConsoleResult<RollbackReceipt> {
        let (generation, filename) = {
            let state = read_lock(&self.state);
            let filename = state
                .view
                .filename
                .clone()
                .ok_or_else(|| ConsoleError::ActionConflict("no file selected".into()))?;
            let target = state
                .view
                .set
                .as_ref()
                .and_then(|set| set.get(version))
                .ok_or_else(|| ConsoleError::StaleReference {
                    kind: "version",
                    id: format!("{filename}@{version}"),
                })?;
            if target.is_current {
                return Err(ConsoleError::ActionConflict(format!(
                    "version {version} of {filename} is already current"
                )));
            }
            (state.generation, filename)
        };

        match self.backend.rollback(&filename, version).await {
            Ok(receipt) => {
                info!(filename, version, "rollback accepted");
                if let Err(e) = self.load(generation, &filename).await {
                    warn!(filename, "could not reload versions after rollback: {}", e);
                }
                self.poller.refresh(CollectionKind::Files).await;
                Ok(receipt)
            }
            Err(e) => {
                warn!(filename, version, "rollback failed: {}", e);
                let mut state = write_lock(&self.state);
                if state.generation == generation {
                    state.view.error = Some(format!("rollback to version {version} failed: {e}"));
                }
                Err(e)
            }
        }
    }

    /// Save `version` of the selected file to `dest`. No local state changes.
    pub async fn download(&self, version: u32, dest: &Path) -> ConsoleResult<u64> {
        let (_, filename) = self.selected()?;
        self.backend.download_to(&filename, Some(version), dest).await
    }

    pub async fn compare(&self, v1: u32, v2: u32) -> ConsoleResult<VersionComparison> {
        let (_, filename) = self.selected()?;
        self.backend.compare_versions(&filename, v1, v2).await
    }
}
