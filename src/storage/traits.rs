use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing store is out of space. The caller may evict and retry.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Generic key-value persistence substrate with per-key expiry.
///
/// This is an external collaborator: browser local storage, IndexedDB, a
/// file, whatever the host application provides. The engine relies only on
/// `get`/`set`/`remove` semantics; [`evict_oldest`](DurableStore::evict_oldest)
/// is a best-effort hook for the quota-exceeded recovery path.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch a value. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Drop up to `count` of the oldest entries to reclaim space. Returns how
    /// many were dropped. Stores that cannot enumerate entries may keep the
    /// default no-op.
    async fn evict_oldest(&self, count: usize) -> Result<usize, StorageError> {
        let _ = count;
        Ok(0)
    }
}
