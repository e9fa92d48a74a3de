// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable local store: the persistence substrate under the sync engine.
//!
//! Offline changesets and collection snapshots are persisted through the
//! [`DurableStore`] trait so that a crash or page refresh never loses an
//! accepted user action. The JSON helpers here add the typed layer the rest
//! of the crate uses, including the quota-exceeded recovery path: on
//! [`StorageError::QuotaExceeded`] the oldest cached entries are evicted and
//! the write is retried once.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{DurableStore, StorageError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// How many entries to evict when a write hits the quota.
const QUOTA_EVICT_BATCH: usize = 16;

/// Typed read. A missing or unparseable value reads as `None`; a value that
/// no longer parses is dropped, matching the original storage layer's
/// treatment of corrupt entries.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "Dropping unparseable persisted value");
            store.remove(key).await?;
            Ok(None)
        }
    }
}

/// Typed write with quota recovery: on [`StorageError::QuotaExceeded`],
/// evict the oldest cached entries and retry once.
pub async fn put_json<T: Serialize>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StorageError> {
    let raw = serde_json::to_vec(value)?;
    match store.set(key, raw.clone(), ttl).await {
        Err(StorageError::QuotaExceeded) => {
            let evicted = store.evict_oldest(QUOTA_EVICT_BATCH).await?;
            debug!(key, evicted, "Quota exceeded, evicted oldest entries and retrying");
            store.set(key, raw, ttl).await
        }
        other => other,
    }
}
