use anyhow::{Context, Result};
use clap::Args;
use std::{env, fmt::Display, str::FromStr, time::Duration};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_POLL_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SESSION_DB: &str = "sqlite://./data/console_session.db";

/// Placeholder capacity used only for percentage displays: three nodes of
/// 500 MiB each. It is not reported by the backend.
pub const DEFAULT_NOMINAL_CAPACITY: u64 = 3 * 500 * 1024 * 1024;

/// Centralized console configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub backend_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub nominal_capacity_bytes: u64,
    pub session_db_url: String,
    pub admin_key: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("backend_url", &self.backend_url)
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("nominal_capacity_bytes", &self.nominal_capacity_bytes)
            .field("session_db_url", &self.session_db_url)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connection options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Backend base URL (overrides STORAGE_CONSOLE_BACKEND_URL)
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    /// Refresh period in seconds (overrides STORAGE_CONSOLE_POLL_SECS)
    #[arg(long, global = true)]
    pub poll_secs: Option<u64>,

    /// Per-request timeout in seconds (overrides STORAGE_CONSOLE_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Nominal capacity in bytes for usage percentages (overrides STORAGE_CONSOLE_NOMINAL_CAPACITY)
    #[arg(long, global = true)]
    pub nominal_capacity: Option<u64>,

    /// Where the session credential is persisted (overrides STORAGE_CONSOLE_SESSION_DB)
    #[arg(long, global = true)]
    pub session_db: Option<String>,

    /// Admin key to log in with (overrides STORAGE_CONSOLE_ADMIN_KEY)
    #[arg(long, global = true)]
    pub admin_key: Option<String>,
}

impl AppConfig {
    /// Defaults for a given backend, with no environment lookups.
    pub fn for_backend(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            nominal_capacity_bytes: DEFAULT_NOMINAL_CAPACITY,
            session_db_url: DEFAULT_SESSION_DB.into(),
            admin_key: None,
        }
    }

    /// Merge parsed CLI args over environment variables over defaults.
    pub fn from_env_and_args(args: &ConnectionArgs) -> Result<Self> {
        // --- Environment fallback ---
        let env_url =
            env::var("STORAGE_CONSOLE_BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.into());
        let env_poll = env_number("STORAGE_CONSOLE_POLL_SECS", DEFAULT_POLL_SECS)?;
        let env_timeout = env_number("STORAGE_CONSOLE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let env_capacity = env_number("STORAGE_CONSOLE_NOMINAL_CAPACITY", DEFAULT_NOMINAL_CAPACITY)?;
        let env_db =
            env::var("STORAGE_CONSOLE_SESSION_DB").unwrap_or_else(|_| DEFAULT_SESSION_DB.into());
        let env_key = env::var("STORAGE_CONSOLE_ADMIN_KEY").ok();

        // --- Merge ---
        let poll_secs = args.poll_secs.unwrap_or(env_poll);
        if poll_secs == 0 {
            anyhow::bail!("poll interval must be at least one second");
        }

        Ok(Self {
            backend_url: args
                .backend_url
                .clone()
                .unwrap_or(env_url)
                .trim_end_matches('/')
                .to_string(),
            poll_interval: Duration::from_secs(poll_secs),
            request_timeout: Duration::from_secs(args.timeout_secs.unwrap_or(env_timeout)),
            nominal_capacity_bytes: args.nominal_capacity.unwrap_or(env_capacity),
            session_db_url: args.session_db.clone().unwrap_or(env_db),
            admin_key: args.admin_key.clone().or(env_key),
        })
    }
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {}", key)),
    }
}
