//! Backup records, listed on demand.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BackupRecord {
    pub id: i64,
    pub timestamp: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: BackupType,
    pub status: BackupStatus,
    pub retention_days: u32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Deserialize, Debug)]
pub struct BackupListing {
    pub backups: Vec<BackupRecord>,
}
