#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use storage_console::config::AppConfig;
use storage_console::models::file::FileRecord;
use storage_console::models::tier::StorageTierSummary;
use storage_console::models::version::FileVersion;
use storage_console::services::backend::ADMIN_KEY_HEADER;
use storage_console::services::session::CredentialStore;
use storage_console::Console;

pub const ADMIN_KEY: &str = "test-admin-key";

type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message })))
}

/// In-memory stand-in for the storage backend's HTTP surface.
#[derive(Default)]
pub struct FakeBackend {
    pub files: Vec<FileRecord>,
    pub nodes: BTreeMap<String, Value>,
    pub tiers: Vec<StorageTierSummary>,
    pub versions: HashMap<String, Vec<FileVersion>>,
    pub blobs: HashMap<String, Vec<u8>>,
    /// `(verified, corrupted, missing)` per node.
    pub verify_counts: HashMap<String, (usize, usize, usize)>,

    /// Request counters by route label, e.g. `"files"`, `"nodes"`.
    pub hits: HashMap<&'static str, usize>,

    /// Scripted `/files` answers, consumed in arrival order.
    pub files_script: VecDeque<(Duration, Vec<FileRecord>)>,
    pub fail_files: bool,
    pub fail_nodes: bool,
    pub fail_delete: HashSet<i64>,
    pub fail_rollback: bool,
    pub fail_uploads: bool,
    /// Privileged routes answer 401 even for the right key.
    pub revoke_key: bool,
    pub verify_delay: Duration,
    /// Per-file delay before `/versions/{filename}` answers.
    pub versions_delay: HashMap<String, Duration>,
    pub nodes_delay: Duration,
    /// Stream downloads in six chunks with this pause before each one.
    pub download_pace: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct Shared(Arc<Mutex<FakeBackend>>);

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, FakeBackend> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hits(&self, route: &str) -> usize {
        self.lock().hits.get(route).copied().unwrap_or(0)
    }

    /// Wait until `route` has been hit at least `n` times.
    pub async fn wait_for_hits(&self, route: &str, n: usize) {
        for _ in 0..200 {
            if self.hits(route) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{route} was not hit {n} times");
    }
}

impl FakeBackend {
    fn hit(&mut self, route: &'static str) {
        *self.hits.entry(route).or_insert(0) += 1;
    }
}

pub fn file(id: i64, name: &str, size: u64) -> FileRecord {
    FileRecord {
        id,
        filename: name.to_string(),
        size,
        compressed_size: size / 2,
        primary_location: Some("node1".into()),
        upload_timestamp: Some("2024-05-01T10:00:00".into()),
    }
}

pub fn version(n: u32, size: u64, current: bool) -> FileVersion {
    FileVersion {
        version: n,
        timestamp: format!("2024-05-0{n}T10:00:00"),
        size,
        compressed_size: size / 2,
        hash: format!("hash-{n}"),
        is_current: current,
    }
}

pub fn node(status: &str, used_bytes: u64) -> Value {
    json!({
        "status": status,
        "last_heartbeat": "2024-05-01T12:00:00",
        "seconds_since_heartbeat": 1.5,
        "storage": {
            "used_bytes": used_bytes,
            "total_bytes": 524288000u64,
            "usage_percent": used_bytes as f64 / 524288000.0 * 100.0
        }
    })
}

/// Three files, three nodes, three tiers and a version history for `a.txt`.
pub fn seeded() -> FakeBackend {
    let mut fake = FakeBackend {
        files: vec![file(1, "a.txt", 100), file(2, "b.txt", 200), file(3, "c.txt", 300)],
        tiers: vec![
            StorageTierSummary { name: "hot".into(), file_count: 2, total_size: 300, total_compressed_size: 150 },
            StorageTierSummary { name: "warm".into(), file_count: 1, total_size: 300, total_compressed_size: 150 },
            StorageTierSummary { name: "cold".into(), file_count: 0, total_size: 0, total_compressed_size: 0 },
        ],
        ..FakeBackend::default()
    };
    for (name, status) in [("node1", "active"), ("node2", "active"), ("node3", "inactive")] {
        fake.nodes.insert(name.into(), node(status, 1024));
    }
    fake.versions.insert(
        "a.txt".into(),
        vec![version(1, 80, false), version(2, 90, false), version(3, 100, true)],
    );
    fake.versions.insert("b.txt".into(), vec![version(1, 200, true)]);
    for f in &fake.files {
        fake.blobs.insert(f.filename.clone(), vec![b'x'; f.size as usize]);
    }
    fake
}

fn authorize(fake: &FakeBackend, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    match headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if key == ADMIN_KEY && !fake.revoke_key => Ok(()),
        _ => Err(reject(StatusCode::UNAUTHORIZED, "Unauthorized")),
    }
}

#[derive(Deserialize)]
struct LoginBody {
    #[serde(rename = "adminKey")]
    admin_key: String,
}

async fn login(State(shared): State<Shared>, Json(body): Json<LoginBody>) -> Reply {
    shared.lock().hit("login");
    if body.admin_key == ADMIN_KEY {
        Ok(Json(json!({ "success": true, "message": "Login successful" })))
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Invalid admin key" })),
        ))
    }
}

async fn list_files(State(shared): State<Shared>) -> Reply {
    let (delay, files, fail) = {
        let mut fake = shared.lock();
        fake.hit("files");
        match fake.files_script.pop_front() {
            Some((delay, files)) => (delay, files, false),
            None => (Duration::ZERO, fake.files.clone(), fake.fail_files),
        }
    };
    tokio::time::sleep(delay).await;
    if fail {
        return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "database is locked"));
    }
    Ok(Json(json!({ "files": files })))
}

async fn node_health(State(shared): State<Shared>, headers: HeaderMap) -> Reply {
    let (delay, reply) = {
        let mut fake = shared.lock();
        fake.hit("nodes");
        let reply = authorize(&fake, &headers).and_then(|()| {
            if fake.fail_nodes {
                return Err(reject(StatusCode::SERVICE_UNAVAILABLE, "heartbeat monitor down"));
            }
            Ok(Json(json!({ "timestamp": "2024-05-01T12:00:00", "nodes": fake.nodes })))
        });
        (fake.nodes_delay, reply)
    };
    tokio::time::sleep(delay).await;
    reply
}

async fn storage_tiers(State(shared): State<Shared>, headers: HeaderMap) -> Reply {
    let mut fake = shared.lock();
    fake.hit("tiers");
    authorize(&fake, &headers)?;
    Ok(Json(json!({ "tiers": fake.tiers })))
}

async fn deduplication(State(shared): State<Shared>, headers: HeaderMap) -> Reply {
    let mut fake = shared.lock();
    fake.hit("dedup");
    authorize(&fake, &headers)?;
    Ok(Json(json!({ "total_references": 12, "total_space_saved": 4096 })))
}

async fn backups(State(shared): State<Shared>, headers: HeaderMap) -> Reply {
    let mut fake = shared.lock();
    fake.hit("backups");
    authorize(&fake, &headers)?;
    Ok(Json(json!({ "backups": [
        { "id": 1, "timestamp": "2024-05-01T00:00:00", "size": 2048, "type": "full",
          "status": "completed", "retention_days": 30, "metadata": {} },
        { "id": 2, "timestamp": "2024-05-02T00:00:00", "size": 128, "type": "incremental",
          "status": "failed", "retention_days": 7 }
    ] })))
}

async fn verify_node(
    State(shared): State<Shared>,
    Path(node): Path<String>,
    headers: HeaderMap,
) -> Reply {
    let (delay, counts) = {
        let mut fake = shared.lock();
        fake.hit("verify");
        authorize(&fake, &headers)?;
        if !fake.nodes.contains_key(&node) {
            return Err(reject(StatusCode::NOT_FOUND, "Node not found"));
        }
        (fake.verify_delay, fake.verify_counts.get(&node).copied().unwrap_or((0, 0, 0)))
    };
    tokio::time::sleep(delay).await;
    let chunks = |n: usize| -> Vec<Value> { (0..n).map(|i| json!({ "chunk_id": i })).collect() };
    Ok(Json(json!({
        "node": node,
        "results": {
            "verified_chunks": chunks(counts.0),
            "corrupted_chunks": chunks(counts.1),
            "missing_chunks": chunks(counts.2)
        }
    })))
}

async fn file_action(
    State(shared): State<Shared>,
    Path((id, action)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Reply {
    let mut fake = shared.lock();
    fake.hit("file_action");
    authorize(&fake, &headers)?;
    if !fake.files.iter().any(|f| f.id == id) {
        return Err(reject(StatusCode::NOT_FOUND, "File not found"));
    }
    match action.as_str() {
        "archive" | "restore" => Ok(Json(json!({ "message": format!("{action} complete") }))),
        "reallocate" => Ok(Json(json!({
            "message": "reallocated",
            "reallocated_chunks": [{ "chunk_id": 1 }],
            "failed_chunks": []
        }))),
        _ => Err(reject(StatusCode::NOT_FOUND, "unknown action")),
    }
}

async fn delete_file(
    State(shared): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Reply {
    let mut fake = shared.lock();
    fake.hit("delete");
    authorize(&fake, &headers)?;
    if fake.fail_delete.contains(&id) {
        return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "chunk store unavailable"));
    }
    let before = fake.files.len();
    fake.files.retain(|f| f.id != id);
    if fake.files.len() == before {
        return Err(reject(StatusCode::NOT_FOUND, "File not found"));
    }
    Ok(Json(json!({ "message": "File deleted" })))
}

async fn list_versions(State(shared): State<Shared>, Path(filename): Path<String>) -> Reply {
    let (delay, versions) = {
        let mut fake = shared.lock();
        fake.hit("versions");
        let delay = fake.versions_delay.get(&filename).copied().unwrap_or_default();
        (delay, fake.versions.get(&filename).cloned())
    };
    tokio::time::sleep(delay).await;
    let versions = versions.ok_or_else(|| reject(StatusCode::NOT_FOUND, "File not found"))?;
    let current = versions.iter().find(|v| v.is_current).map(|v| v.version);
    Ok(Json(json!({ "filename": filename, "current_version": current, "versions": versions })))
}

/// Rollback copies the target into a new version that becomes current.
async fn rollback(
    State(shared): State<Shared>,
    Path((filename, target)): Path<(String, u32)>,
) -> Reply {
    let mut fake = shared.lock();
    fake.hit("rollback");
    if fake.fail_rollback {
        return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "rollback failed"));
    }
    let versions = fake
        .versions
        .get_mut(&filename)
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "File not found"))?;
    let source = versions
        .iter()
        .find(|v| v.version == target)
        .cloned()
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Version not found"))?;
    let previous = versions.iter().find(|v| v.is_current).map(|v| v.version);
    let next = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
    for v in versions.iter_mut() {
        v.is_current = false;
    }
    versions.push(FileVersion {
        version: next,
        is_current: true,
        ..source.clone()
    });
    if let Some(f) = fake.files.iter_mut().find(|f| f.filename == filename) {
        f.size = source.size;
        f.compressed_size = source.compressed_size;
    }
    Ok(Json(json!({
        "message": format!("Rolled back to version {target}"),
        "previous_version": previous,
        "current_version": next
    })))
}

#[derive(Deserialize)]
struct DiffQuery {
    v1: u32,
    v2: u32,
}

async fn diff(
    State(shared): State<Shared>,
    Path(filename): Path<String>,
    Query(q): Query<DiffQuery>,
) -> Reply {
    let mut fake = shared.lock();
    fake.hit("diff");
    let versions = fake
        .versions
        .get(&filename)
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "File not found"))?;
    let side = |n: u32| {
        versions
            .iter()
            .find(|v| v.version == n)
            .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Version not found"))
    };
    let (a, b) = (side(q.v1)?, side(q.v2)?);
    Ok(Json(json!({
        "filename": filename,
        "version1": { "number": a.version, "timestamp": a.timestamp, "size": a.size, "hash": a.hash },
        "version2": { "number": b.version, "timestamp": b.timestamp, "size": b.size, "hash": b.hash },
        "differences": {
            "size_change": b.size as i64 - a.size as i64,
            "is_identical": a.hash == b.hash,
            "time_between": 86400.0
        }
    })))
}

#[derive(Deserialize)]
struct DownloadQuery {
    version: Option<u32>,
}

async fn download(
    State(shared): State<Shared>,
    Path(filename): Path<String>,
    Query(q): Query<DownloadQuery>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let (data, pace) = {
        let mut fake = shared.lock();
        fake.hit("download");
        let blob = fake
            .blobs
            .get(&filename)
            .cloned()
            .ok_or_else(|| reject(StatusCode::NOT_FOUND, "File not found"))?;
        let data = match q.version {
            Some(n) => {
                let v = fake
                    .versions
                    .get(&filename)
                    .and_then(|vs| vs.iter().find(|v| v.version == n))
                    .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Version not found"))?;
                vec![b'v'; v.size as usize]
            }
            None => blob,
        };
        (data, fake.download_pace)
    };
    let Some(pace) = pace else {
        return Ok(data.into_response());
    };
    let chunks: Vec<Vec<u8>> = data
        .chunks(data.len().div_ceil(6).max(1))
        .map(<[u8]>::to_vec)
        .collect();
    let stream = futures::stream::iter(chunks).then(move |chunk| async move {
        tokio::time::sleep(pace).await;
        Ok::<_, std::io::Error>(chunk)
    });
    Ok(Body::from_stream(stream).into_response())
}

async fn upload(State(shared): State<Shared>, mut multipart: Multipart) -> Reply {
    let mut received = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?
    {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or("unnamed").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?;
            received = Some((name, data.to_vec()));
        }
    }
    let (name, data) = received.ok_or_else(|| reject(StatusCode::BAD_REQUEST, "No file provided"))?;

    let mut fake = shared.lock();
    fake.hit("upload");
    if fake.fail_uploads {
        return Err(reject(StatusCode::INSUFFICIENT_STORAGE, "no space left on nodes"));
    }
    let size = data.len() as u64;
    let next_id = fake.files.iter().map(|f| f.id).max().unwrap_or(0) + 1;
    fake.files.retain(|f| f.filename != name);
    fake.files.push(file(next_id, &name, size));
    fake.blobs.insert(name.clone(), data);
    let versions = fake.versions.entry(name.clone()).or_default();
    for v in versions.iter_mut() {
        v.is_current = false;
    }
    let number = versions.len() as u32 + 1;
    versions.push(version(number, size, true));
    Ok(Json(json!({
        "message": "File uploaded successfully",
        "filename": name,
        "version": number,
        "compressed_size": size / 2
    })))
}

pub struct TestServer {
    pub handle: JoinHandle<Result<(), anyhow::Error>>,
    pub shutdown_tx: watch::Sender<bool>,
    pub addr: SocketAddr,
    pub url: String,
    pub state: Shared,
}

impl TestServer {
    pub async fn start(fake: FakeBackend) -> Result<Self> {
        let state = Shared(Arc::new(Mutex::new(fake)));

        let app = Router::new()
            .route("/login", post(login))
            .route("/files", get(list_files))
            .route("/upload", post(upload))
            .route("/versions/{filename}", get(list_versions))
            .route("/rollback/{filename}/{version}", post(rollback))
            .route("/diff/{filename}", get(diff))
            .route("/download/{filename}", get(download))
            .route("/admin/nodes/health", get(node_health))
            .route("/admin/nodes/{node}/verify", post(verify_node))
            .route("/admin/storage/tiers", get(storage_tiers))
            .route("/admin/storage/deduplication", get(deduplication))
            .route("/admin/backups", get(backups))
            .route("/admin/files/{id}", delete(delete_file))
            .route("/admin/files/{id}/{action}", post(file_action))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let url = format!("http://{}", addr);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .map_err(anyhow::Error::from)
        });

        Ok(TestServer {
            handle,
            shutdown_tx,
            addr,
            url,
            state,
        })
    }

    pub fn config(&self) -> AppConfig {
        let mut cfg = AppConfig::for_backend(self.url.clone());
        cfg.poll_interval = Duration::from_millis(50);
        cfg.request_timeout = Duration::from_secs(5);
        cfg
    }

    /// A console against this server with an in-memory session store.
    pub async fn console(&self) -> Result<Console> {
        self.console_with(&self.config()).await
    }

    pub async fn console_with(&self, cfg: &AppConfig) -> Result<Console> {
        let store = CredentialStore::in_memory().await?;
        Ok(Console::with_store(cfg, store)?)
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        let _ = self.handle.await;
        Ok(())
    }
}
