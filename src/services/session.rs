//! Session gate and the durable store behind it.
//!
//! The gate is either closed or holds exactly one credential that the
//! backend has accepted. It is an owned value handed to every component
//! that issues privileged calls; there is no process-wide session.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    services::{
        backend::{BackendClient, CredentialCheck},
        read_lock, write_lock,
    },
};
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    fmt,
    path::Path,
    str::FromStr,
    sync::{Arc, RwLock},
};
use tracing::{debug, info, warn};

/// Opaque admin key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Clone, Debug)]
struct Session {
    credential: Credential,
    opened_at: DateTime<Utc>,
}

const CREATE_SESSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS console_session (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    credential TEXT NOT NULL,
    saved_at TEXT NOT NULL
)";

/// Keeps at most one credential in SQLite so a restarted console can
/// resume its session.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<SqlitePool>,
}

impl CredentialStore {
    /// Open (creating if needed) the database at `url` and run the migration.
    pub async fn connect(url: &str) -> ConsoleResult<Self> {
        let path = url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("Created session directory {:?}", parent);
            }
        }

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        let store = Self { db: Arc::new(pool) };
        store.migrate().await?;
        Ok(store)
    }

    /// A private in-memory database, gone when the store is dropped.
    pub async fn in_memory() -> ConsoleResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { db: Arc::new(pool) };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> ConsoleResult<()> {
        debug!("Executing migration SQL: {}", CREATE_SESSION_TABLE);
        sqlx::query(CREATE_SESSION_TABLE).execute(&*self.db).await?;
        Ok(())
    }

    pub async fn save(&self, credential: &Credential) -> ConsoleResult<()> {
        sqlx::query(
            "INSERT INTO console_session (id, credential, saved_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET credential = excluded.credential, saved_at = excluded.saved_at",
        )
        .bind(credential.expose())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn load(&self) -> ConsoleResult<Option<Credential>> {
        let key: Option<String> =
            sqlx::query_scalar("SELECT credential FROM console_session WHERE id = 1")
                .fetch_optional(&*self.db)
                .await?;
        Ok(key.map(Credential::new))
    }

    pub async fn clear(&self) -> ConsoleResult<()> {
        sqlx::query("DELETE FROM console_session")
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

/// Decides whether privileged operations may be attempted.
#[derive(Clone)]
pub struct SessionGate {
    session: Arc<RwLock<Option<Session>>>,
    store: CredentialStore,
}

impl SessionGate {
    pub fn new(store: CredentialStore) -> Self {
        Self {
            session: Arc::new(RwLock::new(None)),
            store,
        }
    }

    pub fn is_open(&self) -> bool {
        read_lock(&self.session).is_some()
    }

    pub fn credential(&self) -> Option<Credential> {
        read_lock(&self.session)
            .as_ref()
            .map(|s| s.credential.clone())
    }

    /// The held credential, or `AuthenticationRejected` when closed.
    pub fn require(&self) -> ConsoleResult<Credential> {
        self.credential().ok_or_else(ConsoleError::not_authenticated)
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        read_lock(&self.session).as_ref().map(|s| s.opened_at)
    }

    /// Verify `candidate` with the backend and open the gate on success.
    ///
    /// A rejected key is reported as `CredentialCheck::Rejected` and leaves
    /// the gate as it was. Only transport and unexpected backend failures
    /// are returned as errors.
    pub async fn login(
        &self,
        backend: &BackendClient,
        candidate: Credential,
    ) -> ConsoleResult<CredentialCheck> {
        let verdict = backend.check_credential(&candidate).await?;
        match &verdict {
            CredentialCheck::Accepted => {
                if let Err(e) = self.store.save(&candidate).await {
                    warn!("could not persist session credential: {}", e);
                }
                self.open(candidate);
                info!("admin session opened");
            }
            CredentialCheck::Rejected(reason) => {
                warn!("admin credential rejected: {}", reason);
            }
        }
        Ok(verdict)
    }

    /// Re-verify a persisted credential and open the gate if it still holds.
    pub async fn resume(&self, backend: &BackendClient) -> ConsoleResult<bool> {
        let Some(candidate) = self.store.load().await? else {
            debug!("no persisted session");
            return Ok(false);
        };
        match backend.check_credential(&candidate).await? {
            CredentialCheck::Accepted => {
                self.open(candidate);
                info!("admin session resumed");
                Ok(true)
            }
            CredentialCheck::Rejected(reason) => {
                warn!("persisted credential no longer accepted: {}", reason);
                self.store.clear().await?;
                Ok(false)
            }
        }
    }

    pub async fn logout(&self) -> ConsoleResult<()> {
        write_lock(&self.session).take();
        self.store.clear().await?;
        info!("admin session closed");
        Ok(())
    }

    /// Close the gate because the backend stopped accepting the credential.
    pub async fn invalidate(&self, reason: &str) {
        if write_lock(&self.session).take().is_some() {
            warn!("admin session invalidated: {}", reason);
            if let Err(e) = self.store.clear().await {
                warn!("could not clear persisted credential: {}", e);
            }
        }
    }

    fn open(&self, credential: Credential) {
        *write_lock(&self.session) = Some(Session {
            credential,
            opened_at: Utc::now(),
        });
    }
}
