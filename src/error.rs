//! Pipeline error taxonomy.
//!
//! Stage workers branch on the error class when settling a queue message:
//! [`StageError::Throttled`] and [`StageError::Transient`] are requeued with
//! jittered backoff (bounded by a per-lane retry counter), while
//! [`StageError::Terminal`] marks the document `Error` in the status journal
//! and produces no further messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    /// An external service signalled a rate limit (HTTP 429-equivalent).
    #[error("throttled: {0}")]
    Throttled(String),

    /// The request never completed (connect failure, timeout); worth
    /// retrying where the lane allows it.
    #[error("not ready: {0}")]
    Transient(String),

    /// Document-fatal failure. No retry; the document stays visible to
    /// status queries as failed until resubmitted.
    #[error("{0}")]
    Terminal(String),
}

impl StageError {
    pub fn terminal(err: impl std::fmt::Display) -> Self {
        StageError::Terminal(err.to_string())
    }

    /// True for error classes that should be retried via requeue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Throttled(_) | StageError::Transient(_))
    }
}

/// Classify a non-success HTTP status from an external service. Only
/// throttling is retried; any other status is document-fatal.
pub fn classify_status(status: reqwest::StatusCode, operation: &str) -> StageError {
    if status.as_u16() == 429 {
        StageError::Throttled(format!("{operation}: service throttled the request"))
    } else {
        StageError::Terminal(format!("{operation}: service returned {status}"))
    }
}

/// Classify a transport-level request failure (DNS, connect, timeout).
pub fn transport_error(operation: &str, err: reqwest::Error) -> StageError {
    StageError::Transient(format!("{operation}: request failed: {err}"))
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        StageError::Terminal(format!("{err:#}"))
    }
}

impl From<sqlx::Error> for StageError {
    fn from(err: sqlx::Error) -> Self {
        StageError::Terminal(err.to_string())
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        // Network-level failures are terminal for the document; transient
        // service states are mapped explicitly by the clients.
        StageError::Terminal(err.to_string())
    }
}
