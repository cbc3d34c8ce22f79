//! Responses of the privileged file and storage actions.

use serde::{Deserialize, Serialize};

/// Generic `{message}` acknowledgement (archive, restore, delete).
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ActionReceipt {
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /admin/files/{id}/reallocate` body.
#[derive(Deserialize, Debug, Clone)]
pub struct ReallocationReport {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reallocated_chunks: Vec<serde_json::Value>,
    #[serde(default)]
    pub failed_chunks: Vec<serde_json::Value>,
}

impl ReallocationReport {
    pub fn reallocated(&self) -> usize {
        self.reallocated_chunks.len()
    }

    pub fn failed(&self) -> usize {
        self.failed_chunks.len()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DeduplicationStats {
    #[serde(default)]
    pub total_references: Option<u64>,
    #[serde(default)]
    pub total_space_saved: Option<u64>,
}
