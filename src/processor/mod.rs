//! The external processing callback boundary.
//!
//! The orchestration layer never interprets what the transcription/
//! extraction service returns; it only needs each failure classified as
//! transient or permanent so the retry policy and circuit breakers can do
//! their job. Collaborators implement [`EpisodeProcessor`] directly: a
//! plain trait boundary, injected at the call site, with no factory or
//! registry in between.

pub mod classify;
pub mod http;

pub use http::HttpProcessor;

use crate::credentials::ApiCredential;
use crate::WorkItem;
use async_trait::async_trait;

/// How a processing failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network error, timeout, or 5xx: safe to retry.
    Transient,
    /// Explicit rate-limit response: retried like a transient failure and
    /// reported to the breaker, but logged distinctly.
    RateLimited,
    /// Validation or other 4xx: retrying cannot help.
    Permanent,
}

impl ErrorKind {
    /// Whether the retry policy may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }

    /// Short label used in logs and recorded errors.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Permanent => "permanent",
        }
    }

    /// Remediation hint surfaced with terminal failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "Check network connectivity and the service status page",
            ErrorKind::RateLimited => "Reduce concurrency or configure additional API keys",
            ErrorKind::Permanent => "Inspect the episode's manifest entry for bad fields",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A classified processing failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ProcessError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
}

impl ProcessError {
    /// A transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// A rate-limit failure.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: message.into(),
        }
    }

    /// A permanent failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }
}

/// The external processing callback.
///
/// Implementations send one episode to the external service using the given
/// credential and classify any failure. The orchestration layer guarantees
/// at most one in-flight call per credential and that the credential's quota
/// slot was already consumed.
#[async_trait]
pub trait EpisodeProcessor: Send + Sync {
    /// Process one work item with `credential`.
    async fn process(
        &self,
        item: &WorkItem,
        credential: &ApiCredential,
    ) -> Result<(), ProcessError>;
}
