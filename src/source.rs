//! Episode enumeration.
//!
//! The orchestrator does not parse feeds itself; an [`EpisodeSource`]
//! collaborator produces the work-item list for a batch. The bundled
//! [`ManifestSource`] reads a JSON manifest, which is the hand-off format
//! produced by the upstream feed tooling.

use crate::{Episode, WorkItem};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// Produces the ordered list of work items for a batch.
///
/// Invoked once per batch; on resume the checkpoint overlays prior state
/// onto the re-enumerated items (ids are deterministic, so the overlay is
/// stable).
#[async_trait]
pub trait EpisodeSource: Send + Sync {
    /// Enumerate all work items for this batch.
    async fn enumerate(&self) -> Result<Vec<WorkItem>, SourceError>;

    /// Name of the source collection, used as the default ledger namespace.
    fn feed_name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ManifestEpisode {
    title: String,
    /// RFC3339 publication time
    published_at: String,
    audio_url: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    feed: String,
    episodes: Vec<ManifestEpisode>,
}

/// [`EpisodeSource`] backed by a JSON manifest file.
pub struct ManifestSource {
    path: PathBuf,
    feed: String,
}

impl ManifestSource {
    /// Create a source reading from `path`.
    ///
    /// The feed name is not known until the manifest is read; constructing
    /// with [`ManifestSource::load`] reads it eagerly.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            feed: String::new(),
        }
    }

    /// Create a source and read the manifest header eagerly so
    /// [`EpisodeSource::feed_name`] is available before enumeration.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let manifest = read_manifest(&path)?;
        Ok(Self {
            path,
            feed: manifest.feed,
        })
    }
}

fn read_manifest(path: &std::path::Path) -> Result<Manifest, SourceError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SourceError::Io(format!("failed to read {}: {e}", path.display())))?;
    let manifest: Manifest = serde_json::from_str(&contents)
        .map_err(|e| SourceError::Parse(format!("invalid manifest: {e}")))?;

    if manifest.feed.is_empty() {
        return Err(SourceError::Validation("feed name cannot be empty".into()));
    }
    Ok(manifest)
}

#[async_trait]
impl EpisodeSource for ManifestSource {
    async fn enumerate(&self) -> Result<Vec<WorkItem>, SourceError> {
        let manifest = read_manifest(&self.path)?;
        let feed = manifest.feed;

        let mut items = Vec::with_capacity(manifest.episodes.len());
        let mut seen = HashSet::new();

        for entry in manifest.episodes {
            let published_at = DateTime::parse_from_rfc3339(&entry.published_at)
                .map_err(|e| {
                    SourceError::Parse(format!(
                        "invalid published_at '{}' for '{}': {e}",
                        entry.published_at, entry.title
                    ))
                })?
                .timestamp_millis();

            let episode = Episode {
                feed: feed.clone(),
                title: entry.title,
                published_at,
                audio_url: entry.audio_url,
            };
            episode.validate().map_err(SourceError::Validation)?;

            let item = WorkItem::from_episode(episode);
            if !seen.insert(item.id.clone()) {
                debug!(item_id = %item.id, title = %item.episode.title, "duplicate episode in manifest, skipping");
                continue;
            }
            items.push(item);
        }

        info!(feed = %feed, items = items.len(), "episodes enumerated");
        Ok(items)
    }

    fn feed_name(&self) -> &str {
        &self.feed
    }
}

/// Enumeration errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Manifest could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// An episode failed validation
    #[error("validation error: {0}")]
    Validation(String),
}
