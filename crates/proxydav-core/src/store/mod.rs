//! Persistent storage for file entries and remote metadata.
//!
//! The engine hides behind the narrow [`KvStore`] trait so the
//! filesystem and protocol layers stay storage-agnostic. Two key
//! families live on top of it, both JSON-encoded:
//!
//! - `entry:<path>` holds the path/URL mappings ([`FileEntry`])
//! - `metadata:<url>` holds remote size/mtime records ([`FileMetadata`])

mod rocks;

pub use rocks::RocksStore;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::types::{FileEntry, FileMetadata};

/// Key prefix for persisted file entries.
const ENTRY_PREFIX: &str = "entry:";
/// Key prefix for persisted remote metadata.
const METADATA_PREFIX: &str = "metadata:";

/// Minimal key-value interface the rest of the system depends on.
///
/// Implementations must be safe for concurrent use; a write that has
/// returned is assumed durable across crashes.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// All `(key, value)` pairs under `prefix`, in key order.
    fn iterate_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// Typed store over the two persisted record families.
///
/// Cheap to clone; the handle is shared across all requests.
#[derive(Clone)]
pub struct PersistentStore {
    kv: Arc<dyn KvStore>,
}

impl PersistentStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn get_file_entry(&self, path: &str) -> Result<Option<FileEntry>, StoreError> {
        let key = format!("{ENTRY_PREFIX}{path}");
        self.kv
            .get(key.as_bytes())?
            .map(|raw| decode(&key, &raw))
            .transpose()
    }

    pub fn set_file_entry(&self, entry: &FileEntry) -> Result<(), StoreError> {
        let key = format!("{ENTRY_PREFIX}{}", entry.path);
        let data = encode(&key, entry)?;
        self.kv.set(key.as_bytes(), &data)
    }

    pub fn delete_file_entry(&self, path: &str) -> Result<(), StoreError> {
        let key = format!("{ENTRY_PREFIX}{path}");
        self.kv.delete(key.as_bytes())
    }

    /// Every persisted file entry, in key (= path) order.
    pub fn all_file_entries(&self) -> Result<Vec<FileEntry>, StoreError> {
        self.kv
            .iterate_prefix(ENTRY_PREFIX.as_bytes())?
            .into_iter()
            .map(|(key, raw)| decode(&String::from_utf8_lossy(&key), &raw))
            .collect()
    }

    pub fn count_file_entries(&self) -> Result<usize, StoreError> {
        Ok(self.kv.iterate_prefix(ENTRY_PREFIX.as_bytes())?.len())
    }

    pub fn get_file_metadata(&self, url: &str) -> Result<Option<FileMetadata>, StoreError> {
        let key = format!("{METADATA_PREFIX}{url}");
        self.kv
            .get(key.as_bytes())?
            .map(|raw| decode(&key, &raw))
            .transpose()
    }

    pub fn set_file_metadata(&self, metadata: &FileMetadata) -> Result<(), StoreError> {
        let key = format!("{METADATA_PREFIX}{}", metadata.url);
        let data = encode(&key, metadata)?;
        self.kv.set(key.as_bytes(), &data)
    }

    pub fn delete_file_metadata(&self, url: &str) -> Result<(), StoreError> {
        let key = format!("{METADATA_PREFIX}{url}");
        self.kv.delete(key.as_bytes())
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(raw).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}
