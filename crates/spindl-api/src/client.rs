//! Job-control operations over HTTP.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};

use spindl_core::{BackendError, TrackMetadata};

/// Service path prefix shared by all four operations.
const SERVICE_PATH: &str = "spotify";

/// Bearer token sent when no account token is configured. The backend
/// requires the header to be present even for anonymous use.
const ANONYMOUS_TOKEN: &str = "null";

/// Outcome of a preparation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparationStatus {
    /// A worker is free; materialization can be requested right away.
    Ready,
    /// The job entered the server queue at the given depth.
    Queued {
        /// Number of jobs ahead of this one.
        depth: u32,
    },
    /// The file was prepared earlier; its link is returned immediately.
    Exists {
        /// CDN link of the existing file.
        url: String,
    },
}

/// The four job-control operations, as a seam for testing session logic
/// without a network.
///
/// Implementations must be exactly-once per call: no retries, no caching.
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Current server-wide queue depth.
    async fn queue_depth(&self) -> Result<u32, BackendError>;

    /// Resolve a track reference into metadata.
    async fn track_info(&self, url: &str) -> Result<TrackMetadata, BackendError>;

    /// Ask the backend to prepare the track for download.
    async fn request_download(
        &self,
        track_id: &str,
        socket_id: Option<&str>,
    ) -> Result<PreparationStatus, BackendError>;

    /// Ask the backend to materialize the prepared track.
    async fn process_download(
        &self,
        track_id: &str,
        socket_id: Option<&str>,
    ) -> Result<(), BackendError>;
}

/// `reqwest`-backed [`JobControl`] implementation.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

/// Every successful response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct QueueData {
    #[serde(default)]
    queue: u32,
}

#[derive(Debug, Deserialize)]
struct PreparationData {
    status: String,
    queue: Option<u32>,
    url: Option<String>,
}

impl BackendClient {
    /// Create a client for the given API base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self::with_client(base_url, auth_token, reqwest::Client::new())
    }

    /// Create a client reusing a shared `reqwest` connection pool.
    #[must_use]
    pub fn with_client(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            auth_token,
        }
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/{SERVICE_PATH}/{operation}", self.base_url)
    }

    /// Bearer auth plus JSON content type, on every request.
    fn build_headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let token = self.auth_token.as_deref().unwrap_or(ANONYMOUS_TOKEN);
        let auth_value = format!("Bearer {token}");
        let _ = headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| BackendError::Validation(format!("invalid auth token: {e}")))?,
        );

        Ok(headers)
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str) -> Result<T, BackendError> {
        let response = self
            .client
            .get(self.url(operation))
            .headers(self.build_headers()?)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        read_json(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &serde_json::Value,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .post(self.url(operation))
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        read_json(response).await
    }
}

/// Check the status, then decode: error bodies may carry a backend message,
/// success bodies must match the expected shape.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(BackendError::from_status(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
}

#[async_trait]
impl JobControl for BackendClient {
    #[instrument(skip_all)]
    async fn queue_depth(&self) -> Result<u32, BackendError> {
        let envelope: Envelope<QueueData> = self.get("get-queue").await?;
        debug!(depth = envelope.data.queue, "fetched queue depth");
        Ok(envelope.data.queue)
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn track_info(&self, url: &str) -> Result<TrackMetadata, BackendError> {
        if url.trim().is_empty() {
            return Err(BackendError::Validation(
                "Field track url cannot be empty".into(),
            ));
        }

        let envelope: Envelope<TrackMetadata> =
            self.post("get-info", &json!({ "url": url })).await?;
        debug!(track_id = %envelope.data.id, "resolved track");
        Ok(envelope.data)
    }

    #[instrument(skip_all, fields(track_id = %track_id))]
    async fn request_download(
        &self,
        track_id: &str,
        socket_id: Option<&str>,
    ) -> Result<PreparationStatus, BackendError> {
        let body = json!({ "track_id": track_id, "socket_id": socket_id });
        let envelope: Envelope<PreparationData> = self.post("request-download", &body).await?;
        let data = envelope.data;

        let status = match data.status.as_str() {
            "ready" => PreparationStatus::Ready,
            "queue" => PreparationStatus::Queued {
                depth: data.queue.unwrap_or(0),
            },
            "exist" => match data.url {
                Some(url) => PreparationStatus::Exists { url },
                None => {
                    return Err(BackendError::Malformed(
                        "exist status without a url".into(),
                    ));
                }
            },
            other => {
                return Err(BackendError::Malformed(format!(
                    "unknown preparation status: {other}"
                )));
            }
        };
        debug!(?status, "preparation answered");
        Ok(status)
    }

    #[instrument(skip_all, fields(track_id = %track_id))]
    async fn process_download(
        &self,
        track_id: &str,
        socket_id: Option<&str>,
    ) -> Result<(), BackendError> {
        let body = json!({ "track_id": track_id, "socket_id": socket_id });
        let response = self
            .client
            .post(self.url("process-download"))
            .headers(self.build_headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }
        debug!("materialization acknowledged");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
