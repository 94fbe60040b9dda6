//! Transport - Batch delivery to the ingestion endpoint
//!
//! [`Transport`] is the seam between the batcher and the network. The HTTP
//! implementation posts to `/v1/events/batch` and classifies every failure
//! as transient, rate-limited or permanent so the batcher knows whether to
//! retry.

use crate::error::{Error, Result, SendError};
use crate::event::{Batch, BatchPayload};
use crate::utils::{RateLimitConfig, RateLimiter};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// SDK version reported to the backend
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header carrying the SDK version
const SDK_VERSION_HEADER: &str = "x-agentcost-sdk-version";

/// Response bodies are truncated to this many characters in errors
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Health checks use a shorter timeout than batch sends
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Delivers batches somewhere
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one batch
    async fn send(&self, batch: &Batch) -> std::result::Result<(), SendError>;

    /// Whether the destination is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

/// Map an HTTP response to a delivery outcome
///
/// `2xx` with an empty body or `{"status": "ok"}` is success; any other 2xx
/// body means the backend did not accept the batch.
pub fn classify_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> std::result::Result<(), SendError> {
    if status.is_success() {
        let body = body.trim();
        if body.is_empty() {
            return Ok(());
        }
        return match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) if value.get("status").and_then(|s| s.as_str()) == Some("ok") => Ok(()),
            Ok(value) => Err(SendError::Transient(format!(
                "backend rejected batch: {}",
                truncate(&value.to_string())
            ))),
            Err(e) => Err(SendError::Transient(format!("unreadable response body: {e}"))),
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SendError::RateLimited { retry_after });
    }

    if status.is_client_error() {
        return Err(SendError::Permanent {
            status: status.as_u16(),
            body: truncate(body),
        });
    }

    Err(SendError::Transient(format!(
        "HTTP {}: {}",
        status.as_u16(),
        truncate(body)
    )))
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

fn join(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::config("base_url", "cannot be a base URL"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// HTTP transport backed by reqwest
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    events_url: Url,
    health_url: Url,
    projects_url: Url,
    project_id: String,
    timeout: Duration,
    limiter: RateLimiter,
}

impl HttpTransport {
    /// Create a transport for `base_url`
    pub fn new(
        base_url: &str,
        api_key: &str,
        project_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| Error::config("base_url", e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| Error::config("api_key", format!("invalid header value: {e}")))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("agentcost-rs/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(SDK_VERSION_HEADER, HeaderValue::from_static(SDK_VERSION));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            events_url: join(&base, &["v1", "events", "batch"])?,
            health_url: join(&base, &["v1", "health"])?,
            projects_url: join(&base, &["v1", "projects"])?,
            project_id: project_id.into(),
            timeout,
            limiter: RateLimiter::new(RateLimitConfig::default()),
        })
    }

    /// Set the send throttle (0 disables it)
    #[must_use]
    pub fn with_max_requests_per_second(mut self, max: u32) -> Self {
        self.limiter = RateLimiter::new(RateLimitConfig::per_second(max));
        self
    }

    /// Ingestion endpoint
    #[must_use]
    pub fn events_url(&self) -> &Url {
        &self.events_url
    }

    /// Fetch the project record (`GET /v1/projects/<id>`)
    pub async fn project_info(&self) -> std::result::Result<serde_json::Value, SendError> {
        let mut url = self.projects_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(&self.project_id);
        }

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return classify_response(status, retry_after, &body).map(|()| serde_json::Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| SendError::Transient(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> std::result::Result<(), SendError> {
        self.limiter.acquire().await;

        debug!(batch_id = %batch.id, events = batch.len(), url = %self.events_url, "Sending batch");

        let payload = BatchPayload {
            project_id: &self.project_id,
            events: &batch.events,
        };

        let response = self
            .client
            .post(self.events_url.clone())
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Transient(format!("request timed out after {:?}", self.timeout))
                } else {
                    SendError::Transient(format!("connection error: {e}"))
                }
            })?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| SendError::Transient(format!("failed to read response body: {e}")))?;

        classify_response(status, retry_after, &body)
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.health_url.clone())
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}
