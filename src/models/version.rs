//! Version history of one file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileVersion {
    pub version: u32,
    pub timestamp: String,
    pub size: u64,
    pub compressed_size: u64,
    pub hash: String,
    pub is_current: bool,
}

/// `GET /versions/{filename}` body.
#[derive(Deserialize, Debug)]
pub struct VersionListing {
    pub filename: String,
    #[serde(default)]
    pub current_version: Option<u32>,
    pub versions: Vec<FileVersion>,
}

/// Ways a backend-reported version set can break the current-version rule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionSetError {
    #[error("no version is marked current")]
    NoCurrent,
    #[error("{0} versions are marked current")]
    MultipleCurrent(usize),
    #[error("current version {current} is not the latest ({latest})")]
    CurrentNotLatest { current: u32, latest: u32 },
}

/// All versions of one file, keyed by `(filename, version)`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct VersionSet {
    pub filename: String,
    pub versions: Vec<FileVersion>,
}

impl VersionSet {
    /// Builds a set ordered newest first.
    pub fn new(filename: impl Into<String>, mut versions: Vec<FileVersion>) -> Self {
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Self {
            filename: filename.into(),
            versions,
        }
    }

    pub fn get(&self, version: u32) -> Option<&FileVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn current(&self) -> Option<&FileVersion> {
        self.versions.iter().find(|v| v.is_current)
    }

    pub fn latest(&self) -> Option<&FileVersion> {
        self.versions.iter().max_by_key(|v| v.version)
    }

    /// Exactly one entry is current and it carries the highest number.
    pub fn validate(&self) -> Result<&FileVersion, VersionSetError> {
        let current: Vec<&FileVersion> = self.versions.iter().filter(|v| v.is_current).collect();
        let current = match current.as_slice() {
            [] => return Err(VersionSetError::NoCurrent),
            [only] => *only,
            many => return Err(VersionSetError::MultipleCurrent(many.len())),
        };
        match self.latest() {
            Some(latest) if latest.version != current.version => {
                Err(VersionSetError::CurrentNotLatest {
                    current: current.version,
                    latest: latest.version,
                })
            }
            _ => Ok(current),
        }
    }
}

/// `POST /rollback/{filename}/{version}` body.
#[derive(Deserialize, Debug, Clone)]
pub struct RollbackReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub previous_version: Option<u32>,
    #[serde(default)]
    pub current_version: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VersionSide {
    pub number: u32,
    pub timestamp: String,
    pub size: u64,
    pub hash: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VersionDifferences {
    pub size_change: i64,
    pub is_identical: bool,
    pub time_between: f64,
}

/// `GET /diff/{filename}?v1=&v2=` body.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct VersionComparison {
    pub filename: String,
    pub version1: VersionSide,
    pub version2: VersionSide,
    pub differences: VersionDifferences,
}
