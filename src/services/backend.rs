//! src/services/backend.rs
//!
//! BackendClient: the request/response boundary to the storage service.
//! Every call is a single HTTP exchange; nothing here retries or caches.
//! Privileged calls take the credential explicitly so that only code that
//! passed the session gate can issue them.

use crate::{
    errors::{ConsoleError, ConsoleResult},
    models::{
        admin::{ActionReceipt, DeduplicationStats, ReallocationReport},
        backup::{BackupListing, BackupRecord},
        file::{FileId, FileListing, FileRecord, UploadReceipt},
        node::{NodeHealth, NodeHealthReport},
        tier::{StorageTierSummary, TierListing},
        verify::{VerifyCounts, VerifyResponse},
        version::{RollbackReceipt, VersionComparison, VersionListing, VersionSet},
    },
    services::session::Credential,
};
use futures::StreamExt;
use reqwest::{
    Body, Client, RequestBuilder, Response, StatusCode, Url,
    multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
use std::{path::Path, time::Duration};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Header carrying the admin credential on privileged calls.
pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

/// Outcome of checking a candidate credential against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    Accepted,
    Rejected(String),
}

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl BackendClient {
    /// `timeout` bounds every JSON exchange end to end. Uploads and
    /// downloads are bounded per connect and per read only.
    pub fn new(base_url: &str, timeout: Duration) -> ConsoleResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConsoleError::TransportFailure(format!("invalid backend url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConsoleError::TransportFailure(format!(
                "invalid backend url: {base_url}"
            )));
        }
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ConsoleError::TransportFailure(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            request_timeout: timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn admin(&self, req: RequestBuilder, credential: &Credential) -> RequestBuilder {
        req.header(ADMIN_KEY_HEADER, credential.expose())
    }

    fn bounded(&self, req: RequestBuilder) -> RequestBuilder {
        req.timeout(self.request_timeout)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> ConsoleResult<T> {
        self.receive_json(self.bounded(req)).await
    }

    /// Like `send_json` without the total timeout.
    async fn receive_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> ConsoleResult<T> {
        let resp = check_status(req.send().await?).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    // --- Session ---

    /// `POST /login`. Invalid keys are a normal outcome, not an error.
    pub async fn check_credential(&self, candidate: &Credential) -> ConsoleResult<CredentialCheck> {
        let req = self
            .http
            .post(self.endpoint(&["login"]))
            .json(&serde_json::json!({ "adminKey": candidate.expose() }));
        let resp = self.bounded(req).send().await?;

        let status = resp.status();
        if status.is_success() {
            let body: serde_json::Value = serde_json::from_slice(&resp.bytes().await?)?;
            let accepted = body
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if accepted {
                return Ok(CredentialCheck::Accepted);
            }
            return Ok(CredentialCheck::Rejected(
                message_from_value(&body).unwrap_or_else(|| "invalid admin key".into()),
            ));
        }

        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST
        ) {
            let body = resp.text().await.unwrap_or_default();
            return Ok(CredentialCheck::Rejected(
                error_message(&body).unwrap_or_else(|| "invalid admin key".into()),
            ));
        }

        Err(status_error(resp).await)
    }

    // --- Polled collections ---

    /// `GET /files`
    pub async fn list_files(&self) -> ConsoleResult<Vec<FileRecord>> {
        let listing: FileListing = self.send_json(self.http.get(self.endpoint(&["files"]))).await?;
        Ok(listing.files)
    }

    /// `GET /admin/nodes/health`
    pub async fn node_health(&self, credential: &Credential) -> ConsoleResult<Vec<NodeHealth>> {
        let req = self.http.get(self.endpoint(&["admin", "nodes", "health"]));
        let report: NodeHealthReport = self.send_json(self.admin(req, credential)).await?;
        Ok(report.into_nodes())
    }

    /// `GET /admin/storage/tiers`
    pub async fn storage_tiers(
        &self,
        credential: &Credential,
    ) -> ConsoleResult<Vec<StorageTierSummary>> {
        let req = self.http.get(self.endpoint(&["admin", "storage", "tiers"]));
        let listing: TierListing = self.send_json(self.admin(req, credential)).await?;
        Ok(listing.tiers)
    }

    // --- On-demand privileged reads ---

    /// `GET /admin/storage/deduplication`
    pub async fn deduplication_stats(
        &self,
        credential: &Credential,
    ) -> ConsoleResult<DeduplicationStats> {
        let req = self
            .http
            .get(self.endpoint(&["admin", "storage", "deduplication"]));
        self.send_json(self.admin(req, credential)).await
    }

    /// `GET /admin/backups`
    pub async fn list_backups(&self, credential: &Credential) -> ConsoleResult<Vec<BackupRecord>> {
        let req = self.http.get(self.endpoint(&["admin", "backups"]));
        let listing: BackupListing = self.send_json(self.admin(req, credential)).await?;
        Ok(listing.backups)
    }

    // --- Privileged actions ---

    /// `POST /admin/nodes/{node}/verify`
    pub async fn verify_node(
        &self,
        credential: &Credential,
        node: &str,
    ) -> ConsoleResult<VerifyCounts> {
        let req = self
            .http
            .post(self.endpoint(&["admin", "nodes", node, "verify"]));
        let resp: VerifyResponse = self.send_json(self.admin(req, credential)).await?;
        Ok(resp.counts())
    }

    /// `POST /admin/files/{id}/archive`
    pub async fn archive_file(
        &self,
        credential: &Credential,
        id: FileId,
    ) -> ConsoleResult<ActionReceipt> {
        self.file_action(credential, id, "archive").await
    }

    /// `POST /admin/files/{id}/restore`
    pub async fn restore_file(
        &self,
        credential: &Credential,
        id: FileId,
    ) -> ConsoleResult<ActionReceipt> {
        self.file_action(credential, id, "restore").await
    }

    /// `POST /admin/files/{id}/reallocate`
    pub async fn reallocate_file(
        &self,
        credential: &Credential,
        id: FileId,
    ) -> ConsoleResult<ReallocationReport> {
        self.file_action(credential, id, "reallocate").await
    }

    /// `DELETE /admin/files/{id}`
    pub async fn delete_file(
        &self,
        credential: &Credential,
        id: FileId,
    ) -> ConsoleResult<ActionReceipt> {
        let id = id.to_string();
        let req = self.http.delete(self.endpoint(&["admin", "files", &id]));
        self.send_json(self.admin(req, credential)).await
    }

    async fn file_action<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        id: FileId,
        action: &str,
    ) -> ConsoleResult<T> {
        let id = id.to_string();
        let req = self
            .http
            .post(self.endpoint(&["admin", "files", &id, action]));
        self.send_json(self.admin(req, credential)).await
    }

    // --- Versions ---

    /// `GET /versions/{filename}`
    pub async fn list_versions(&self, filename: &str) -> ConsoleResult<VersionSet> {
        let listing: VersionListing = self
            .send_json(self.http.get(self.endpoint(&["versions", filename])))
            .await?;
        if let Some(current) = listing.current_version {
            debug!(filename = %listing.filename, current, "fetched version listing");
        }
        Ok(VersionSet::new(listing.filename, listing.versions))
    }

    /// `POST /rollback/{filename}/{version}`
    pub async fn rollback(&self, filename: &str, version: u32) -> ConsoleResult<RollbackReceipt> {
        let version = version.to_string();
        self.send_json(
            self.http
                .post(self.endpoint(&["rollback", filename, &version])),
        )
        .await
    }

    /// `GET /diff/{filename}?v1=&v2=`
    pub async fn compare_versions(
        &self,
        filename: &str,
        v1: u32,
        v2: u32,
    ) -> ConsoleResult<VersionComparison> {
        let req = self
            .http
            .get(self.endpoint(&["diff", filename]))
            .query(&[("v1", v1), ("v2", v2)]);
        self.send_json(req).await
    }

    // --- Transfers ---

    /// Stream `GET /download/{filename}` into `dest`. Returns bytes written.
    ///
    /// A partially written file is removed when the transfer fails.
    pub async fn download_to(
        &self,
        filename: &str,
        version: Option<u32>,
        dest: &Path,
    ) -> ConsoleResult<u64> {
        let mut req = self.http.get(self.endpoint(&["download", filename]));
        if let Some(version) = version {
            req = req.query(&[("version", version)]);
        }
        let resp = check_status(req.send().await?).await?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        let mut body = resp.bytes_stream();

        let result: ConsoleResult<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            drop(file);
            if let Err(e) = fs::remove_file(dest).await {
                warn!("could not remove partial download {:?}: {}", dest, e);
            }
            return Err(err);
        }

        debug!(filename, ?version, written, "download complete");
        Ok(written)
    }

    /// `POST /upload` as multipart field `file`, streaming from `path`.
    ///
    /// `on_progress(sent, total)` fires after each chunk is handed to the
    /// transport.
    pub async fn upload<F>(
        &self,
        path: &Path,
        file_name: &str,
        mut on_progress: F,
    ) -> ConsoleResult<UploadReceipt>
    where
        F: FnMut(u64, u64) + Send + Sync + 'static,
    {
        let file = File::open(path).await?;
        let total = file.metadata().await?.len();
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                on_progress(sent, total);
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        self.receive_json(self.http.post(self.endpoint(&["upload"])).multipart(form))
            .await
    }
}

async fn check_status(resp: Response) -> ConsoleResult<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(status_error(resp).await)
    }
}

async fn status_error(resp: Response) -> ConsoleError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    ConsoleError::from_status(status, message)
}

/// Pull `error` (or `message`) out of a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    message_from_value(&value)
}

fn message_from_value(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_segments() {
        let client = BackendClient::new("http://localhost:5000/api/", Duration::from_secs(1)).unwrap();
        let url = client.endpoint(&["versions", "my report.pdf"]);
        assert_eq!(url.as_str(), "http://localhost:5000/api/versions/my%20report.pdf");
    }

    #[test]
    fn only_json_calls_carry_the_total_timeout() {
        let client = BackendClient::new("http://localhost:5000", Duration::from_secs(3)).unwrap();
        let url = client.endpoint(&["files"]);
        let json = client.bounded(client.http.get(url.clone())).build().unwrap();
        assert_eq!(json.timeout(), Some(&Duration::from_secs(3)));
        let transfer = client.http.get(url).build().unwrap();
        assert_eq!(transfer.timeout(), None);
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(BackendClient::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
        assert!(BackendClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn error_body_message_extraction() {
        assert_eq!(error_message(r#"{"error":"Unauthorized"}"#).as_deref(), Some("Unauthorized"));
        assert_eq!(
            error_message(r#"{"success":false,"message":"Invalid admin key"}"#).as_deref(),
            Some("Invalid admin key")
        );
        assert_eq!(error_message("<html>oops</html>"), None);
    }
}
