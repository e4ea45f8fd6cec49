//! Stateless, authenticated operations against the Drive v3 API.
//!
//! Every request obtains a valid token from the [`TokenManager`], retries
//! transient failures with exponential backoff, and on a 401 invalidates the
//! credential and retries exactly once with a fresh one. The client keeps no
//! remote state of its own; recovering from a missing/forbidden object is the
//! sync engine's job.

use std::time::Duration;

use chrono::DateTime;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::error::SyncError;
use super::multipart::RelatedMultipart;
use super::token::TokenManager;

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Metadata of a remote file, as returned by list/find operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFileMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl DriveFileMeta {
    /// Remote modification time as epoch milliseconds; 0 when absent or
    /// unparseable, which makes the remote lose any strict-newer comparison.
    pub fn modified_ms(&self) -> i64 {
        self.modified_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Option<Vec<DriveFileMeta>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: String,
}

#[derive(Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    tokens: TokenManager,
}

impl DriveClient {
    pub fn new(tokens: TokenManager) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, tokens }
    }

    /// Idempotently resolve/create a nested folder path, returning the
    /// deepest folder's id.
    pub async fn ensure_path(&self, segments: &[&str]) -> Result<String, SyncError> {
        let mut parent: Option<String> = None;
        for segment in segments {
            let id = self.ensure_folder(segment, parent.as_deref()).await?;
            parent = Some(id);
        }
        parent.ok_or_else(|| SyncError::Layout("empty folder path".into()))
    }

    /// Find a folder by name under a parent, creating it when absent.
    pub async fn ensure_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, SyncError> {
        if let Some(existing) = self.find_by_name(name, parent).await? {
            return Ok(existing);
        }

        debug!(name, "creating remote folder");
        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
        });
        if let Some(parent) = parent {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let response = self
            .send(
                self.http
                    .post(format!("{API_BASE}/files"))
                    .query(&[("fields", "id")])
                    .json(&metadata),
            )
            .await?;
        let file: FileRef = Self::expect_ok(response).await?.json().await.map_err(as_network)?;
        Ok(file.id)
    }

    /// Exact, non-trashed name match under a parent (`root` when none).
    pub async fn find_by_name(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, SyncError> {
        let q = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query_value(name),
            parent.unwrap_or("root"),
        );
        let response = self
            .send(
                self.http
                    .get(format!("{API_BASE}/files"))
                    .query(&[("q", q.as_str()), ("fields", "files(id,name,mimeType)")]),
            )
            .await?;
        let list: FileList = Self::expect_ok(response).await?.json().await.map_err(as_network)?;
        Ok(list
            .files
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|f| f.id))
    }

    /// Create a new remote file with metadata and content in one multipart
    /// request, returning its id.
    pub async fn upload_new(
        &self,
        name: &str,
        parent: &str,
        mime: &str,
        content: Vec<u8>,
    ) -> Result<String, SyncError> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent],
            "mimeType": mime,
        });
        let multipart = RelatedMultipart::new()
            .json_part(metadata.to_string())
            .part(mime, content);

        let response = self
            .send(
                self.http
                    .post(format!("{UPLOAD_BASE}/files"))
                    .query(&[("uploadType", "multipart"), ("fields", "id")])
                    .header("Content-Type", multipart.content_type())
                    .body(multipart.into_body()),
            )
            .await?;
        let file: FileRef = Self::expect_ok(response).await?.json().await.map_err(as_network)?;
        Ok(file.id)
    }

    /// Replace a file's content. The metadata part stays empty: resending
    /// non-writable fields (e.g. parents) gets the write rejected.
    pub async fn update_content(
        &self,
        file_id: &str,
        mime: &str,
        content: Vec<u8>,
    ) -> Result<(), SyncError> {
        let multipart = RelatedMultipart::new()
            .json_part("{}")
            .part(mime, content);

        let response = self
            .send(
                self.http
                    .patch(format!("{UPLOAD_BASE}/files/{file_id}"))
                    .query(&[("uploadType", "multipart"), ("fields", "id")])
                    .header("Content-Type", multipart.content_type())
                    .body(multipart.into_body()),
            )
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn download_json<T: serde::de::DeserializeOwned>(
        &self,
        file_id: &str,
    ) -> Result<T, SyncError> {
        let response = self
            .send(
                self.http
                    .get(format!("{API_BASE}/files/{file_id}"))
                    .query(&[("alt", "media")]),
            )
            .await?;
        Self::expect_ok(response).await?.json().await.map_err(as_network)
    }

    pub async fn download_bytes(&self, file_id: &str) -> Result<Vec<u8>, SyncError> {
        let response = self
            .send(
                self.http
                    .get(format!("{API_BASE}/files/{file_id}"))
                    .query(&[("alt", "media")]),
            )
            .await?;
        let bytes = Self::expect_ok(response).await?.bytes().await.map_err(as_network)?;
        Ok(bytes.to_vec())
    }

    /// Soft-delete a remote file (recoverable from the remote trash).
    pub async fn trash(&self, file_id: &str) -> Result<(), SyncError> {
        let response = self
            .send(
                self.http
                    .patch(format!("{API_BASE}/files/{file_id}"))
                    .json(&serde_json::json!({ "trashed": true })),
            )
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    /// List the non-trashed files in a folder, following pagination.
    pub async fn list(&self, folder_id: &str) -> Result<Vec<DriveFileMeta>, SyncError> {
        let q = format!("'{folder_id}' in parents and trashed = false");
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(format!("{API_BASE}/files")).query(&[
                ("q", q.as_str()),
                (
                    "fields",
                    "files(id,name,mimeType,modifiedTime),nextPageToken",
                ),
                ("pageSize", "100"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = self.send(request).await?;
            let list: FileList = Self::expect_ok(response).await?.json().await.map_err(as_network)?;

            files.extend(list.files.unwrap_or_default());
            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(files)
    }

    /// Send with a fresh bearer token, retrying transient failures
    /// (3 attempts, 300ms initial delay, doubling) and retrying a 401 exactly
    /// once after invalidating the credential.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SyncError> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempts_left = MAX_ATTEMPTS;
        let mut retried_auth = false;

        loop {
            let builder = request
                .try_clone()
                .ok_or_else(|| SyncError::Network("request body is not replayable".into()))?;
            let token = self.tokens.get_valid_token().await?;

            match builder.bearer_auth(token).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED && !retried_auth {
                        debug!("401 from Drive, invalidating token and retrying once");
                        self.tokens.invalidate().await?;
                        retried_auth = true;
                        continue;
                    }
                    if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                        && attempts_left > 1
                    {
                        attempts_left -= 1;
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempts_left > 1 => {
                    attempts_left -= 1;
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(SyncError::Network(e.to_string())),
            }
        }
    }

    async fn expect_ok(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

fn as_network(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

/// Escape a name for use inside a Drive query string literal.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query_value() {
        assert_eq!(escape_query_value("plain"), "plain");
        assert_eq!(escape_query_value("it's"), "it\\'s");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_modified_ms_parses_rfc3339() {
        let meta = DriveFileMeta {
            id: "f".into(),
            name: "im1.webp".into(),
            mime_type: None,
            modified_time: Some("1970-01-01T00:00:01Z".into()),
        };
        assert_eq!(meta.modified_ms(), 1_000);
    }

    #[test]
    fn test_modified_ms_defaults_to_zero() {
        let mut meta = DriveFileMeta {
            id: "f".into(),
            name: "im1.webp".into(),
            mime_type: None,
            modified_time: None,
        };
        assert_eq!(meta.modified_ms(), 0);
        meta.modified_time = Some("not a time".into());
        assert_eq!(meta.modified_ms(), 0);
    }
}
