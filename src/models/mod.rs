//! Serde models for the payloads the storage backend returns.
//!
//! All of these are read-only copies of backend-owned state. The console
//! replaces them wholesale on every successful fetch and never edits
//! individual fields.

pub mod admin;
pub mod backup;
pub mod file;
pub mod node;
pub mod tier;
pub mod verify;
pub mod version;
