//! Per-node chunk verification jobs.
//!
//! Each node has at most one job. A job moves
//! `NotStarted -> Running -> {Succeeded, Failed}` and may be started again
//! from either terminal state; starting while `Running` is a local conflict.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    models::verify::VerifyCounts,
    services::{read_lock, write_lock},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerificationState {
    NotStarted,
    Running {
        since: DateTime<Utc>,
    },
    Succeeded {
        counts: VerifyCounts,
        since: DateTime<Utc>,
    },
    /// The verify call itself did not complete.
    Failed {
        reason: String,
        since: DateTime<Utc>,
    },
}

impl VerificationState {
    pub fn is_running(&self) -> bool {
        matches!(self, VerificationState::Running { .. })
    }

    /// Succeeded, but corrupted or missing chunks were found.
    pub fn needs_attention(&self) -> bool {
        match self {
            VerificationState::Succeeded { counts, .. } => counts.needs_attention(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationJob {
    pub node: String,
    /// Identifies one run, so a late result cannot land on a newer run.
    pub run_id: Uuid,
    pub state: VerificationState,
}

#[derive(Clone, Default)]
pub struct VerificationTracker {
    jobs: Arc<RwLock<BTreeMap<String, VerificationJob>>>,
}

impl VerificationTracker {
    pub fn state(&self, node: &str) -> VerificationState {
        read_lock(&self.jobs)
            .get(node)
            .map(|job| job.state.clone())
            .unwrap_or(VerificationState::NotStarted)
    }

    pub fn job(&self, node: &str) -> Option<VerificationJob> {
        read_lock(&self.jobs).get(node).cloned()
    }

    pub fn jobs(&self) -> Vec<VerificationJob> {
        read_lock(&self.jobs).values().cloned().collect()
    }

    pub fn running_count(&self) -> usize {
        read_lock(&self.jobs)
            .values()
            .filter(|job| job.state.is_running())
            .count()
    }

    /// Move `node` to `Running`, stamped now. Rejected while already running.
    pub fn begin(&self, node: &str) -> ConsoleResult<Uuid> {
        let mut jobs = write_lock(&self.jobs);
        if let Some(job) = jobs.get(node) {
            if job.state.is_running() {
                return Err(ConsoleError::ActionConflict(format!(
                    "verification already running on {node}"
                )));
            }
        }
        let run_id = Uuid::new_v4();
        jobs.insert(
            node.to_string(),
            VerificationJob {
                node: node.to_string(),
                run_id,
                state: VerificationState::Running { since: Utc::now() },
            },
        );
        info!(node, %run_id, "verification started");
        Ok(run_id)
    }

    /// Record success for run `run_id`. Returns false if that run is not
    /// the one currently running.
    pub fn succeed(&self, node: &str, run_id: Uuid, counts: VerifyCounts) -> bool {
        let landed = self.finish(
            node,
            run_id,
            VerificationState::Succeeded {
                counts,
                since: Utc::now(),
            },
        );
        if landed {
            if counts.needs_attention() {
                warn!(
                    node,
                    corrupted = counts.corrupted,
                    missing = counts.missing,
                    "verification found damaged chunks"
                );
            } else {
                info!(node, verified = counts.verified, "verification clean");
            }
        }
        landed
    }

    pub fn fail(&self, node: &str, run_id: Uuid, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let landed = self.finish(
            node,
            run_id,
            VerificationState::Failed {
                reason: reason.clone(),
                since: Utc::now(),
            },
        );
        if landed {
            warn!(node, "verification failed: {}", reason);
        }
        landed
    }

    fn finish(&self, node: &str, run_id: Uuid, state: VerificationState) -> bool {
        let mut jobs = write_lock(&self.jobs);
        match jobs.get_mut(node) {
            Some(job) if job.run_id == run_id && job.state.is_running() => {
                job.state = state;
                true
            }
            _ => false,
        }
    }
}
