//! Upload sessions, one per file name in a drop.
//!
//! Progress only moves forward. A finished upload leaves the active map; a
//! failed one stays, marked, until dismissed or retried.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    services::{read_lock, write_lock},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    InProgress,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSession {
    pub file_name: String,
    pub session_id: Uuid,
    /// Fraction in `[0, 1]`, never decreasing.
    pub progress: f64,
    pub total_bytes: u64,
    pub outcome: UploadOutcome,
    pub started_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, UploadOutcome::Failed { .. })
    }
}

#[derive(Clone, Default)]
pub struct UploadTracker {
    sessions: Arc<RwLock<BTreeMap<String, UploadSession>>>,
}

impl UploadTracker {
    /// Open a session for `file_name`. A failed session under the same
    /// name is replaced; one still in progress is a conflict.
    pub fn open(&self, file_name: &str, total_bytes: u64) -> ConsoleResult<Uuid> {
        let mut sessions = write_lock(&self.sessions);
        if let Some(existing) = sessions.get(file_name) {
            if !existing.is_failed() {
                return Err(ConsoleError::ActionConflict(format!(
                    "{file_name} is already uploading"
                )));
            }
        }
        let session_id = Uuid::new_v4();
        sessions.insert(
            file_name.to_string(),
            UploadSession {
                file_name: file_name.to_string(),
                session_id,
                progress: 0.0,
                total_bytes,
                outcome: UploadOutcome::InProgress,
                started_at: Utc::now(),
            },
        );
        debug!(file_name, %session_id, total_bytes, "upload session opened");
        Ok(session_id)
    }

    /// Report progress. Returns the fraction now displayed, or `None` when
    /// the session is gone, superseded, or already terminal.
    pub fn record_progress(&self, file_name: &str, session_id: Uuid, fraction: f64) -> Option<f64> {
        let mut sessions = write_lock(&self.sessions);
        let session = sessions.get_mut(file_name)?;
        if session.session_id != session_id || session.is_failed() {
            return None;
        }
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        session.progress = session.progress.max(fraction);
        Some(session.progress)
    }

    /// Terminal success: the session leaves the active map.
    pub fn succeed(&self, file_name: &str, session_id: Uuid) -> bool {
        let mut sessions = write_lock(&self.sessions);
        match sessions.get(file_name) {
            Some(s) if s.session_id == session_id => {
                sessions.remove(file_name);
                info!(file_name, "upload complete");
                true
            }
            _ => false,
        }
    }

    /// Terminal failure: the session stays visible with the reason.
    pub fn fail(&self, file_name: &str, session_id: Uuid, reason: impl Into<String>) -> bool {
        let mut sessions = write_lock(&self.sessions);
        match sessions.get_mut(file_name) {
            Some(s) if s.session_id == session_id => {
                let reason = reason.into();
                warn!(file_name, "upload failed: {}", reason);
                s.outcome = UploadOutcome::Failed { reason };
                true
            }
            _ => false,
        }
    }

    /// Remove a failed session the operator has acknowledged.
    pub fn dismiss(&self, file_name: &str) -> bool {
        let mut sessions = write_lock(&self.sessions);
        if sessions.get(file_name).is_some_and(UploadSession::is_failed) {
            sessions.remove(file_name);
            return true;
        }
        false
    }

    pub fn get(&self, file_name: &str) -> Option<UploadSession> {
        read_lock(&self.sessions).get(file_name).cloned()
    }

    /// Every visible session, in-progress and failed, by name.
    pub fn sessions(&self) -> Vec<UploadSession> {
        read_lock(&self.sessions).values().cloned().collect()
    }

    pub fn failed(&self) -> Vec<UploadSession> {
        read_lock(&self.sessions)
            .values()
            .filter(|s| s.is_failed())
            .cloned()
            .collect()
    }
}
