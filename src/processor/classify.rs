//! HTTP outcome classification.
//!
//! Maps transport errors and status codes onto the transient/permanent
//! taxonomy. Response bodies are never inspected; the status line is the
//! entire classification surface.

use super::ErrorKind;
use reqwest::StatusCode;

/// Classify an HTTP status code.
///
/// Rate limiting (429) is its own kind so logs can distinguish "the service
/// pushed back" from ordinary flakiness; the retry policy treats both as
/// retryable. Request timeout (408) is the one other 4xx worth retrying.
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        429 => ErrorKind::RateLimited,
        408 => ErrorKind::Transient,
        _ if status.is_server_error() => ErrorKind::Transient,
        _ if status.is_client_error() => ErrorKind::Permanent,
        // Redirect loops and other oddities: retrying is harmless.
        _ => ErrorKind::Transient,
    }
}

/// Classify a transport-level failure.
///
/// Timeouts, refused connections, and DNS failures are all worth another
/// try; a request that never reached the service cannot be permanently bad.
pub fn classify_transport(_err: &reqwest::Error) -> ErrorKind {
    ErrorKind::Transient
}

/// Human-readable description for a failed status.
pub fn describe_status(status: StatusCode) -> String {
    let reason = match status.as_u16() {
        400 => "invalid request",
        401 | 403 => "authentication failed",
        404 => "resource not found",
        408 => "request timeout",
        422 => "payload rejected",
        429 => "rate limit exceeded",
        500 => "internal server error",
        502 => "bad gateway",
        503 => "service unavailable",
        504 => "gateway timeout",
        _ if status.is_server_error() => "server error",
        _ if status.is_client_error() => "client error",
        _ => "unexpected status",
    };
    format!("{reason} ({})", status.as_u16())
}
