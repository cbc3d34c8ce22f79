//! Client-side operational state for a multi-node storage backend's admin
//! console: polled snapshots of files, node health and storage tiers, plus
//! the verification, batch, upload and version workflows that run against
//! them.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use config::AppConfig;
pub use errors::{ConsoleError, ConsoleResult};
pub use services::console::Console;
