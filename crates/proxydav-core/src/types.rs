//! Shared data model: persisted entries, remote metadata, and the
//! in-memory projection served over WebDAV.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mapping between a virtual path and a remote URL.
///
/// Persisted 1:1 and unique by path. The path is absolute, normalized,
/// and slash-separated; the URL is absolute http/https.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub url: String,
}

/// Cached metadata about a remote file, keyed by URL.
///
/// Several virtual paths may map to the same URL and therefore share one
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub url: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
}

/// An item in the virtual filesystem: a file backed by a remote URL, or
/// a directory synthesized from the paths below it (`url` empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualItem {
    pub name: String,
    pub path: String,
    pub url: String,
    pub is_dir: bool,
}
