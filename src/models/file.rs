//! File listing entries.

use serde::{Deserialize, Serialize};

pub type FileId = i64;

/// One stored file as reported by the backend listing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileRecord {
    /// Backend-assigned identity.
    pub id: FileId,

    pub filename: String,

    /// Logical (uncompressed) size in bytes.
    pub size: u64,

    /// Size as stored after compression.
    pub compressed_size: u64,

    /// Node tag of the primary copy.
    #[serde(default)]
    pub primary_location: Option<String>,

    #[serde(default)]
    pub upload_timestamp: Option<String>,
}

impl FileRecord {
    /// Stored size relative to logical size; 1.0 when the file is empty.
    pub fn compression_ratio(&self) -> f64 {
        if self.size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.size as f64
    }
}

#[derive(Deserialize, Debug)]
pub struct FileListing {
    pub files: Vec<FileRecord>,
}

/// `POST /upload` body.
#[derive(Deserialize, Debug, Clone)]
pub struct UploadReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub compressed_size: Option<u64>,
}

/// Locally known action currently running against a file.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Archiving,
    Restoring,
    Reallocating,
    Deleting,
    Downloading,
}

impl PendingAction {
    pub fn label(&self) -> &'static str {
        match self {
            PendingAction::Archiving => "archiving",
            PendingAction::Restoring => "restoring",
            PendingAction::Reallocating => "reallocating",
            PendingAction::Deleting => "deleting",
            PendingAction::Downloading => "downloading",
        }
    }
}

/// A snapshot record paired with the local pending overlay, if any.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FileView {
    #[serde(flatten)]
    pub record: FileRecord,
    pub pending: Option<PendingAction>,
}
