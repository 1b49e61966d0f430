//! Error types for mmv-verify
//!
//! Two layers:
//! - [`FetchError`]: one source failing for one record. Caught at the task
//!   boundary and recorded as an absent source, never propagated further.
//! - [`VerifyError`]: batch-level failures. Only configuration errors (and
//!   an unreadable checkpoint) abort a batch, and they do so before any
//!   fetch starts.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Per-source fetch failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Connection or transport failure (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded the per-request timeout (retryable)
    #[error("Request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// Source throttled us, HTTP 429 (retryable, honors retry-after)
    #[error("Rate limited by source (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Record unknown to this source (fatal for this source only)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input or unparseable response (fatal for this source only)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// Network, timeout and rate-limit errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout { .. } | FetchError::RateLimited { .. }
        )
    }

    /// Source-provided minimum wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short stable label used in reports and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Timeout { .. } => "timeout",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::NotFound(_) => "not_found",
            FetchError::Parse(_) => "parse",
        }
    }

    /// Classify a non-success HTTP response for adapter authors.
    ///
    /// 404 and 410 mean the record is absent at this source, 429 is a rate
    /// limit (with any `Retry-After` hint), 408/5xx are transient, and the
    /// remaining 4xx codes mean we sent something the source cannot accept.
    pub fn from_status(status: StatusCode, headers: &HeaderMap) -> Self {
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                FetchError::NotFound(format!("source returned {}", status))
            }
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
                retry_after: parse_retry_after(headers),
            },
            StatusCode::REQUEST_TIMEOUT => FetchError::Timeout { after_ms: 0 },
            s if s.is_server_error() => FetchError::Network(format!("source returned {}", s)),
            s => FetchError::Parse(format!("source rejected request: {}", s)),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { after_ms: 0 }
        } else if let Some(status) = err.status() {
            FetchError::from_status(status, &HeaderMap::new())
        } else if err.is_decode() || err.is_builder() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP-date.
///
/// Dates in the past yield a zero wait.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// Batch-level error
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Invalid configuration or input; the batch fails before any work starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint could not be read or written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Coordinator or worker task failed to complete
    #[error("Task failed: {0}")]
    Task(String),

    /// mmv-common error
    #[error("Common error: {0}")]
    Common(#[from] mmv_common::Error),
}

/// Result type for batch-level operations
pub type VerifyResult<T> = Result<T, VerifyError>;
