use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::traits::{DurableStore, StorageError};

struct Stored {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    // Insertion sequence, used by evict_oldest
    seq: u64,
}

/// In-memory [`DurableStore`] with per-key expiry.
///
/// Reference implementation used in tests and as the default substrate when
/// the host application provides nothing better. An optional capacity limit
/// simulates storage quota for exercising the eviction path.
pub struct MemoryStore {
    data: DashMap<String, Stored>,
    next_seq: AtomicU64,
    capacity: Option<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            next_seq: AtomicU64::new(0),
            capacity: None,
        }
    }

    /// A store that rejects writes of new keys beyond `capacity` entries
    /// with [`StorageError::QuotaExceeded`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: DashMap::new(),
            next_seq: AtomicU64::new(0),
            capacity: Some(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let expired = match self.data.get(key) {
            None => return Ok(None),
            Some(entry) => match entry.expires_at {
                Some(at) if at <= Instant::now() => true,
                _ => return Ok(Some(entry.value.clone())),
            },
        };
        if expired {
            self.data.remove(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        if let Some(cap) = self.capacity {
            if !self.data.contains_key(key) && self.data.len() >= cap {
                return Err(StorageError::QuotaExceeded);
            }
        }
        let stored = Stored {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.data.insert(key.to_string(), stored);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn evict_oldest(&self, count: usize) -> Result<usize, StorageError> {
        let mut entries: Vec<(String, u64)> = self
            .data
            .iter()
            .map(|e| (e.key().clone(), e.seq))
            .collect();
        entries.sort_by_key(|(_, seq)| *seq);

        let mut evicted = 0;
        for (key, _) in entries.into_iter().take(count) {
            if self.data.remove(&key).is_some() {
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        store.remove("k").await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_key_reads_absent() {
        let store = MemoryStore::new();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_millis(0)))
            .await
            .unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        // Lazily purged on read
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unexpired_key_survives() {
        let store = MemoryStore::new();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capacity_rejects_new_keys() {
        let store = MemoryStore::with_capacity(1);
        store.set("a", b"1".to_vec(), None).await.unwrap();

        let err = store.set("b", b"2".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded));

        // Overwriting an existing key is always allowed
        store.set("a", b"3".to_vec(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_evict_oldest_drops_in_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.set(&format!("k{}", i), vec![i], None).await.unwrap();
        }

        let evicted = store.evict_oldest(2).await.unwrap();
        assert_eq!(evicted, 2);
        assert!(store.get("k0").await.unwrap().is_none());
        assert!(store.get("k1").await.unwrap().is_none());
        assert!(store.get("k2").await.unwrap().is_some());
    }
}
