//! HTTP client for the Lumina transcription backend
//!
//! This module owns the wire format and failure taxonomy for the two
//! endpoints the service exposes: `POST /api/transcribe` (multipart file
//! upload) and `GET /api/health` (see `health`). Uploads stream the file
//! body so progress can be reported while bytes go out, and the retry
//! wrapper applies a fixed exponential backoff between attempts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Default base URL for the transcription service
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Client-side payload cap, matching the backend's upload limit
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default number of upload attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// End-to-end budget for a single transcription request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Upload progress callback, invoked with integer percent (0-100)
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Transcription API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("File size exceeds 100MB limit")]
    PayloadTooLarge,
    #[error("Rate limit exceeded, try again later")]
    RateLimited,
    #[error("Transcription service is temporarily unavailable")]
    ServiceUnavailable,
    #[error("Transcription request timed out")]
    Timeout,
    #[error("{0}")]
    Service(String),
    #[error("Network error: {0}")]
    Network(reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("All retry attempts exhausted")]
    MaxRetriesExceeded,
}

/// A successful transcription, as returned by the service.
///
/// Field names follow the backend's camelCase JSON.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub text: String,
    pub file_name: String,
    pub duration: String,
    pub file_size: String,
    pub date: String,
}

/// Error detail payload the backend attaches to failed requests
#[derive(Deserialize)]
struct ErrorDetail {
    detail: String,
}

/// Seam for driving the upload workflow; implemented by [`ApiClient`]
/// and by stubs in tests.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe_with_retry(
        &self,
        path: &Path,
        on_progress: Option<ProgressFn>,
        max_attempts: u32,
    ) -> Result<TranscriptionResult, ApiError>;
}

/// Client for the transcription API (stateless, cheap to clone)
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Upload a media file and return its transcription.
    ///
    /// The file is sent as a single multipart part under the field name
    /// `file`. `on_progress` receives upload percent as bytes are written
    /// to the socket; 100% means the upload finished, not that the server
    /// is done transcribing.
    pub async fn transcribe(
        &self,
        path: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<TranscriptionResult, ApiError> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();

        // Enforced here as well as in validation so oversized payloads
        // never leave the machine.
        if total > MAX_UPLOAD_BYTES {
            return Err(ApiError::PayloadTooLarge);
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = media_type(path).unwrap_or("application/octet-stream");

        let mut sent: u64 = 0;
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                sent += bytes.len() as u64;
                if let Some(cb) = &on_progress {
                    let pct = if total == 0 {
                        100
                    } else {
                        (sent * 100 / total).min(100) as u8
                    };
                    cb(pct);
                }
            }
        });

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            total,
        )
        .file_name(file_name)
        .mime_str(mime)
        .map_err(ApiError::Network)?;

        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(url = %self.base_url, size = total, "starting transcription upload");

        let response = self
            .http
            .post(format!("{}/api/transcribe", self.base_url))
            .multipart(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, response).await);
        }

        response
            .json::<TranscriptionResult>()
            .await
            .map_err(map_transport_error)
    }
}

#[async_trait]
impl Transcriber for ApiClient {
    /// Upload with up to `max_attempts` sequential tries.
    ///
    /// Backoff between attempts is 2^i seconds (1s, 2s, 4s, ...). Every
    /// error kind is retried the same way, including `PayloadTooLarge`,
    /// which mirrors the backend client this replaces. The progress
    /// callback is shared across attempts and not reset between them, so
    /// treat reported percent as best-effort.
    async fn transcribe_with_retry(
        &self,
        path: &Path,
        on_progress: Option<ProgressFn>,
        max_attempts: u32,
    ) -> Result<TranscriptionResult, ApiError> {
        retry_with_backoff(max_attempts, || {
            let on_progress = on_progress.clone();
            self.transcribe(path, on_progress)
        })
        .await
    }
}

/// Run `op` up to `max_attempts` times, sleeping `2^i` seconds after
/// failed attempt `i`. Surfaces the last error once attempts run out.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut last_error = None;

    for attempt in 0..max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, error = %e, "transcription attempt failed");
                last_error = Some(e);

                if attempt + 1 < max_attempts {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }
    }

    // Reachable only when max_attempts is 0; kept so exhaustion always
    // produces an error.
    Err(last_error.unwrap_or(ApiError::MaxRetriesExceeded))
}

/// Delay before the retry that follows failed attempt `attempt` (0-indexed).
/// The shift is capped so absurd attempt counts cannot overflow.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(63))
}

/// Declared content type for an upload, from the file extension
pub fn media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "mp3" => Some("audio/mpeg"),
        "wav" | "wave" => Some("audio/wav"),
        "mp4" => Some("video/mp4"),
        "mpeg" | "mpg" => Some("video/mpeg"),
        "mov" | "qt" => Some("video/quicktime"),
        _ => None,
    }
}

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(err)
    }
}

/// Map a non-success response to a typed error, consuming the body for
/// the service-supplied detail message when there is one.
async fn error_for_status(status: reqwest::StatusCode, response: reqwest::Response) -> ApiError {
    use reqwest::StatusCode;

    match status {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
        StatusCode::SERVICE_UNAVAILABLE => ApiError::ServiceUnavailable,
        StatusCode::GATEWAY_TIMEOUT => ApiError::Timeout,
        _ => {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorDetail>(&body)
                .map(|d| d.detail)
                .unwrap_or_else(|_| {
                    if body.trim().is_empty() {
                        format!("Error transcribing file (HTTP {})", status.as_u16())
                    } else {
                        body
                    }
                });
            ApiError::Service(detail)
        }
    }
}
