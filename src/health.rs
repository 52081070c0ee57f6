//! Liveness monitoring for the transcription backend
//!
//! A check is a single `GET /api/health` with a short timeout; the
//! service is healthy only when the body reports `status: "healthy"`.
//! Checks never fail: every failure mode is folded into the returned
//! status. The optional poller re-checks on a fixed interval and
//! publishes into a shared observable that manual checks also write,
//! last writer wins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// How long a single liveness request may take
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one liveness check, replaced wholesale every cycle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Wire format of the health endpoint
#[derive(Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Health monitor for one service base URL (cheap to clone; clones share
/// the observed status)
#[derive(Clone)]
pub struct HealthMonitor {
    base_url: String,
    http: reqwest::Client,
    status: Arc<Mutex<Option<HealthStatus>>>,
}

/// Handle for a running poller task
pub struct PollerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the poller. The last published status remains observable.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl HealthMonitor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            status: Arc::new(Mutex::new(None)),
        }
    }

    /// Perform one liveness check and publish the result.
    ///
    /// Never returns an error; transport failures, bad status codes and
    /// unexpected payloads all come back as `healthy: false` with the
    /// cause in `error`.
    pub async fn check(&self) -> HealthStatus {
        let status = match self.fetch().await {
            Ok(response) => interpret(response),
            Err(e) => HealthStatus {
                healthy: false,
                message: None,
                error: Some(e.to_string()),
            },
        };

        if let Ok(mut current) = self.status.lock() {
            *current = Some(status.clone());
        }

        status
    }

    /// Boolean-only variant of [`check`](Self::check)
    #[allow(dead_code)]
    pub async fn is_healthy(&self) -> bool {
        self.check().await.healthy
    }

    /// Most recently observed status; `None` until the first check lands
    pub fn status(&self) -> Option<HealthStatus> {
        self.status.lock().ok().and_then(|guard| guard.clone())
    }

    /// Spawn a background task that re-checks every `period`.
    ///
    /// The first check fires immediately. Concurrent manual checks are
    /// not synchronized with the poller; whichever response resolves
    /// last is the one observed.
    pub fn spawn_poller(&self, period: Duration) -> PollerHandle {
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let status = monitor.check().await;
                debug!(healthy = status.healthy, "health poll completed");
            }
        });

        PollerHandle { task }
    }

    async fn fetch(&self) -> Result<HealthResponse, reqwest::Error> {
        self.http
            .get(format!("{}/api/health", self.base_url))
            .timeout(CHECK_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

/// Healthy iff the service literally reports `"healthy"`
fn interpret(response: HealthResponse) -> HealthStatus {
    if response.status == "healthy" {
        HealthStatus {
            healthy: true,
            message: response.message,
            error: None,
        }
    } else {
        HealthStatus {
            healthy: false,
            message: response.message,
            error: Some(format!("Service reported status '{}'", response.status)),
        }
    }
}
