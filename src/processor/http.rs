//! HTTP processing collaborator.
//!
//! Submits one episode per call to the transcription/extraction endpoint
//! and classifies the outcome. The response body is deliberately ignored:
//! downstream consumers fetch results through their own channel, and this
//! layer only needs success/failure.

use super::classify::{classify_status, classify_transport, describe_status};
use super::{EpisodeProcessor, ProcessError};
use crate::credentials::ApiCredential;
use crate::WorkItem;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// HTTP connect timeout - time to establish the TCP connection.
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Overall request timeout. Submission is a hand-off, not the transcription
/// itself, so a few minutes is generous.
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 180;

/// Shared HTTP client.
///
/// reqwest clients are cheap to clone, but a single instance keeps
/// connection pooling effective across all concurrent workers.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            panic!("FATAL: failed to build HTTP client: {e}. Check system TLS configuration.")
        })
});

#[derive(Serialize)]
struct SubmitRequest<'a> {
    item_id: &'a str,
    feed: &'a str,
    title: &'a str,
    published_at: i64,
    audio_url: &'a str,
}

/// [`EpisodeProcessor`] that POSTs episodes to a configured endpoint.
pub struct HttpProcessor {
    client: Client,
    endpoint: String,
}

impl HttpProcessor {
    /// Create a processor targeting `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EpisodeProcessor for HttpProcessor {
    async fn process(
        &self,
        item: &WorkItem,
        credential: &ApiCredential,
    ) -> Result<(), ProcessError> {
        let body = SubmitRequest {
            item_id: &item.id,
            feed: &item.episode.feed,
            title: &item.episode.title,
            published_at: item.episode.published_at,
            audio_url: &item.episode.audio_url,
        };

        debug!(item_id = %item.id, key_id = %credential.key_id, "submitting episode");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&credential.secret)
            .header("x-api-key-id", &credential.key_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProcessError {
                kind: classify_transport(&e),
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(item_id = %item.id, status = status.as_u16(), "episode accepted");
            return Ok(());
        }

        Err(ProcessError {
            kind: classify_status(status),
            message: describe_status(status),
        })
    }
}
