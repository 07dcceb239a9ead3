//! TTL-bounded cache of remote file metadata.
//!
//! Keyed by URL. Entries expire `ttl` after [`MetadataCache::set`]
//! stamped them; a background task sweeps expired entries every `ttl/2`
//! and insertion at capacity evicts the single oldest entry first.
//!
//! The cache has its own lock, independent of the filesystem index.
//! Construct it inside a tokio runtime; the sweeper stops on
//! [`MetadataCache::close`] or drop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::types::FileMetadata;

pub struct MetadataCache {
    entries: Arc<Mutex<HashMap<String, FileMetadata>>>,
    ttl: chrono::Duration,
    max_size: usize,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MetadataCache {
    /// Creates the cache and spawns its expiry sweeper.
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        let entries = Arc::new(Mutex::new(HashMap::new()));
        let ttl_bound = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        // Sweep twice per TTL period, but never spin faster than once a
        // second.
        let sweep_every = (ttl / 2).max(Duration::from_secs(1));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let sweep_entries = Arc::clone(&entries);
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tick.tick() => {
                        let now = Utc::now();
                        let mut entries = sweep_entries.lock();
                        let before = entries.len();
                        entries.retain(|_, metadata| now - metadata.cached_at <= ttl_bound);
                        let swept = before - entries.len();
                        if swept > 0 {
                            trace!(swept, "expired metadata entries purged");
                        }
                    }
                }
            }
        });

        Self {
            entries,
            ttl: ttl_bound,
            max_size,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Returns the record for `url`, unless absent or expired.
    pub fn get(&self, url: &str) -> Option<FileMetadata> {
        let entries = self.entries.lock();
        let metadata = entries.get(url)?;
        if Utc::now() - metadata.cached_at > self.ttl {
            return None;
        }
        Some(metadata.clone())
    }

    /// Stores `metadata`, stamping `cached_at`. When the cache is at
    /// capacity the single oldest entry is evicted first.
    pub fn set(&self, mut metadata: FileMetadata) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, m)| m.cached_at)
                .map(|(url, _)| url.clone());
            if let Some(url) = oldest {
                entries.remove(&url);
            }
        }

        metadata.cached_at = Utc::now();
        entries.insert(metadata.url.clone(), metadata);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Stops the background sweeper. Idempotent; also runs on drop.
    pub fn close(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for MetadataCache {
    fn drop(&mut self) {
        self.close();
    }
}
