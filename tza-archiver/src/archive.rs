//! Wayback Machine "Save Page Now" client
//!
//! One call to [`ArchiveSubmitter::submit`] issues exactly one capture request
//! and translates every result (transport error, HTTP status, JSON body) into a
//! [`SubmitOutcome`]. Retries and pacing belong to the caller.

use crate::cid::ArchiveTarget;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const SAVE_ENDPOINT: &str = "https://web.archive.org/save";
pub const AVAILABILITY_ENDPOINT: &str = "https://archive.org/wayback/available";
const USER_AGENT: &str = concat!("tz-archiver/", env!("CARGO_PKG_VERSION"));

/// `status_ext` values meaning the service is out of capacity for us right now
const CAPACITY_STATUS_EXT: &[&str] = &[
    "error:too-many-requests",
    "error:user-session-limit",
    "error:too-many-daily-captures",
    "error:no-browsers-available",
];

/// Message fragments reporting a capture inside the freshness window
const ALREADY_ARCHIVED_MARKERS: &[&str] = &[
    "same snapshot had been made",
    "already been archived",
    "already captured",
];

/// Longest slice of a non-JSON body kept in a failure reason
const MAX_REASON_BODY: usize = 200;

/// Archive client errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result of one submission, as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Capture scheduled (or pending)
    Accepted { job_id: Option<String> },
    /// Service already holds a capture inside the freshness window
    AlreadyArchived { message: String },
    /// Service is out of capacity; nothing is recorded
    RateLimited { reason: String },
    /// Transport error, timeout or permanent service error
    Failed { reason: String },
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SubmitOutcome::Accepted { .. } | SubmitOutcome::AlreadyArchived { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Accepted { .. } => "accepted",
            SubmitOutcome::AlreadyArchived { .. } => "already_archived",
            SubmitOutcome::RateLimited { .. } => "rate_limited",
            SubmitOutcome::Failed { .. } => "failed",
        }
    }
}

/// Internet Archive S3-style key pair
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    fn authorization_header(&self) -> String {
        format!("LOW {}:{}", self.access_key, self.secret_key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Capture options sent with every submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    pub js_behavior_timeout: Duration,
    pub if_not_archived_within: Duration,
    pub delay_availability: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            js_behavior_timeout: Duration::from_secs(
                tza_common::config::DEFAULT_JS_BEHAVIOR_TIMEOUT_SECS,
            ),
            if_not_archived_within: Duration::from_secs(
                tza_common::config::DEFAULT_IF_NOT_ARCHIVED_WITHIN_SECS,
            ),
            delay_availability: false,
        }
    }
}

impl SaveOptions {
    /// Form body for `POST /save`
    pub fn form_fields(&self, url: &str) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("url", url.to_string()),
            (
                "js_behavior_timeout",
                self.js_behavior_timeout.as_secs().to_string(),
            ),
            (
                "if_not_archived_within",
                self.if_not_archived_within.as_secs().to_string(),
            ),
        ];
        if self.delay_availability {
            fields.push(("delay_wb_availability", "1".to_string()));
        }
        fields
    }
}

/// Anything that can submit archive targets
#[async_trait]
pub trait ArchiveSubmitter: Send + Sync {
    /// Submit one target. Never fails: errors become [`SubmitOutcome::Failed`].
    async fn submit(&self, target: &ArchiveTarget) -> SubmitOutcome;

    /// Whether the service already holds any capture of the target
    async fn is_indexed(&self, _target: &ArchiveTarget) -> Result<bool, ArchiveError> {
        Ok(false)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_ext: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    #[serde(default)]
    closest: Option<ClosestSnapshot>,
}

#[derive(Debug, Default, Deserialize)]
struct ClosestSnapshot {
    #[serde(default)]
    available: bool,
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_REASON_BODY) {
        Some((index, _)) => format!("{}...", &body[..index]),
        None => body.to_string(),
    }
}

fn is_capacity_status(status_ext: Option<&str>) -> bool {
    status_ext.is_some_and(|ext| CAPACITY_STATUS_EXT.contains(&ext))
}

fn is_already_archived_message(message: &str) -> bool {
    let message = message.to_lowercase();
    ALREADY_ARCHIVED_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

fn describe(parsed: &SaveResponse, fallback: &str) -> String {
    match (parsed.status_ext.as_deref(), parsed.message.as_deref()) {
        (Some(ext), Some(message)) => format!("{}: {}", ext, message),
        (Some(ext), None) => ext.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => fallback.to_string(),
    }
}

/// Classify a `POST /save` response
pub fn classify_response(status: u16, body: &str) -> SubmitOutcome {
    let parsed = serde_json::from_str::<SaveResponse>(body).ok();

    if status == 429 || status == 503 {
        let reason = parsed
            .as_ref()
            .map(|p| describe(p, ""))
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status));
        return SubmitOutcome::RateLimited { reason };
    }

    if !(200..300).contains(&status) {
        return match parsed {
            Some(p) if is_capacity_status(p.status_ext.as_deref()) => SubmitOutcome::RateLimited {
                reason: describe(&p, ""),
            },
            Some(p) => SubmitOutcome::Failed {
                reason: format!("HTTP {}: {}", status, describe(&p, "no message")),
            },
            None => SubmitOutcome::Failed {
                reason: format!("HTTP {}: {}", status, truncate(body)),
            },
        };
    }

    let Some(parsed) = parsed else {
        return SubmitOutcome::Failed {
            reason: format!("Unparseable response: {}", truncate(body)),
        };
    };

    if parsed.status.as_deref() == Some("error") {
        if is_capacity_status(parsed.status_ext.as_deref()) {
            return SubmitOutcome::RateLimited {
                reason: describe(&parsed, "capacity exhausted"),
            };
        }
        return SubmitOutcome::Failed {
            reason: describe(&parsed, "service reported an error"),
        };
    }

    if let Some(message) = parsed.message.as_deref() {
        if is_already_archived_message(message) {
            return SubmitOutcome::AlreadyArchived {
                message: message.to_string(),
            };
        }
    }

    if parsed.job_id.is_some() || parsed.status.as_deref() == Some("pending") {
        return SubmitOutcome::Accepted {
            job_id: parsed.job_id,
        };
    }

    if parsed.url.is_some() && parsed.message.is_none() {
        return SubmitOutcome::Accepted { job_id: None };
    }

    SubmitOutcome::Failed {
        reason: describe(&parsed, "response carried no job id"),
    }
}

/// Wayback Machine client
pub struct WaybackClient {
    http_client: reqwest::Client,
    credentials: Credentials,
    options: SaveOptions,
    save_endpoint: String,
    availability_endpoint: String,
}

impl WaybackClient {
    pub fn new(
        credentials: Credentials,
        options: SaveOptions,
        request_timeout: Duration,
    ) -> Result<Self, ArchiveError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ArchiveError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            credentials,
            options,
            save_endpoint: SAVE_ENDPOINT.to_string(),
            availability_endpoint: AVAILABILITY_ENDPOINT.to_string(),
        })
    }

    /// Point the client at different service endpoints
    pub fn with_endpoints(
        mut self,
        save_endpoint: impl Into<String>,
        availability_endpoint: impl Into<String>,
    ) -> Self {
        self.save_endpoint = save_endpoint.into();
        self.availability_endpoint = availability_endpoint.into();
        self
    }
}

#[async_trait]
impl ArchiveSubmitter for WaybackClient {
    async fn submit(&self, target: &ArchiveTarget) -> SubmitOutcome {
        let form = self.options.form_fields(target.url().as_str());

        let response = match self
            .http_client
            .post(&self.save_endpoint)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, self.credentials.authorization_header())
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("Request timed out: {}", e)
                } else {
                    format!("Network error: {}", e)
                };
                warn!(cid = %target.cid(), error = %reason, "Failed to submit for archiving");
                return SubmitOutcome::Failed { reason };
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return SubmitOutcome::Failed {
                    reason: format!("Failed to read response body: {}", e),
                }
            }
        };

        let outcome = classify_response(status, &body);
        debug!(
            cid = %target.cid(),
            http_status = status,
            outcome = outcome.label(),
            "Save Page Now response"
        );
        outcome
    }

    async fn is_indexed(&self, target: &ArchiveTarget) -> Result<bool, ArchiveError> {
        let response = self
            .http_client
            .get(&self.availability_endpoint)
            .query(&[("url", target.url().as_str())])
            .send()
            .await
            .map_err(|e| ArchiveError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ArchiveError::ApiError(status.as_u16(), truncate(&error_text)));
        }

        let availability: AvailabilityResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::ParseError(e.to_string()))?;

        Ok(availability
            .archived_snapshots
            .closest
            .is_some_and(|closest| closest.available))
    }
}
