//! Error taxonomy shared by every console component.
//!
//! Every failure is caught at the component boundary and turned into an
//! operator-visible message; none of them terminates the session.

use std::io;
use thiserror::Error;

/// One failed item of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub file_id: i64,
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Bad or missing credential. The gate stays (or becomes) closed.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// The backend could not be reached or the exchange broke mid-flight.
    #[error("backend unreachable: {0}")]
    TransportFailure(String),

    #[error("{operation}: {} of {attempted} item(s) failed", .failures.len())]
    PartialBatchFailure {
        operation: String,
        attempted: usize,
        failures: Vec<ItemFailure>,
    },

    /// Rejected locally, no backend call was made.
    #[error("action conflict: {0}")]
    ActionConflict(String),

    #[error("{kind} `{id}` is no longer present")]
    StaleReference { kind: &'static str, id: String },

    /// Non-success status that is not an authentication failure.
    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("malformed backend payload: {0}")]
    Decode(String),

    /// A file name that would resolve outside the chosen directory.
    #[error("unsafe file name `{0}`")]
    UnsafeFileName(String),

    #[error(transparent)]
    Persistence(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

impl ConsoleError {
    pub fn not_authenticated() -> Self {
        Self::AuthenticationRejected("no credential held".into())
    }

    pub fn stale_file(id: i64) -> Self {
        Self::StaleReference {
            kind: "file",
            id: id.to_string(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationRejected(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Self::AuthenticationRejected(message)
            }
            _ => Self::Backend {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, err.to_string());
        }
        Self::TransportFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
