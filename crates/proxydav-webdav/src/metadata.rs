//! Remote metadata resolution.
//!
//! PROPFIND needs size and modification time for files this server
//! never stores. Resolution order: the in-process cache, then the
//! persistent store, then a bounded HEAD probe against the origin.
//! Probe results are persisted to both. A failed probe resolves to "no
//! metadata"; the caller simply omits those properties.
//!
//! Resolution always runs outside the filesystem lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proxydav_core::{FileMetadata, MetadataCache, PersistentStore};
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use tracing::{debug, warn};

use crate::xml;

/// Timeout for origin HEAD probes.
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MetadataResolver {
    store: PersistentStore,
    cache: Arc<MetadataCache>,
    client: Client,
}

impl MetadataResolver {
    pub fn new(store: PersistentStore, cache: Arc<MetadataCache>, client: Client) -> Self {
        Self {
            store,
            cache,
            client,
        }
    }

    /// Resolves metadata for `url`, probing the origin on a miss.
    pub async fn resolve(&self, url: &str) -> Option<FileMetadata> {
        if let Some(metadata) = self.cache.get(url) {
            return Some(metadata);
        }

        match self.store.get_file_metadata(url) {
            Ok(Some(metadata)) => {
                self.cache.set(metadata.clone());
                return Some(metadata);
            }
            Ok(None) => {}
            Err(err) => warn!(url, error = %err, "stored metadata lookup failed"),
        }

        let metadata = self.probe(url).await?;
        if let Err(err) = self.store.set_file_metadata(&metadata) {
            warn!(url, error = %err, "failed to persist probed metadata");
        }
        self.cache.set(metadata.clone());
        Some(metadata)
    }

    async fn probe(&self, url: &str) -> Option<FileMetadata> {
        let response = match self.client.head(url).timeout(HEAD_TIMEOUT).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "HEAD probe failed");
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!(url, status = %response.status(), "HEAD probe answered non-OK");
            return None;
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        // Missing or unparsable Last-Modified falls back to "now".
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(xml::parse_http_date)
            .unwrap_or_else(Utc::now);

        Some(FileMetadata {
            url: url.to_string(),
            size,
            last_modified,
            cached_at: Utc::now(),
        })
    }
}
