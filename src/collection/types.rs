use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::changeset::ReplayReport;
use crate::item::{CollectionItem, ItemId};

/// Errors a collection operation surfaces to the caller.
///
/// Connectivity failures never appear here: they are absorbed into the
/// offline-pending path. Only business-rule rejections and misuse reach the
/// UI as actionable errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The server understood the request and declined it. The optimistic
    /// change was rolled back.
    #[error("rejected by server: {0}")]
    Rejected(String),
    /// The id references no item in the collection.
    #[error("unknown item {0}")]
    UnknownItem(ItemId),
}

/// User-facing synchronization status of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Everything confirmed by the server.
    Synced,
    /// A replay cycle is pushing offline changes right now.
    Syncing,
    /// Unconfirmed changes are queued or journaled.
    Pending,
    /// Working from local state; the server is unreachable.
    Offline,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Synced => "All changes synced",
            Self::Syncing => "Syncing changes...",
            Self::Pending => "Changes pending sync",
            Self::Offline => "Offline, changes saved locally",
        };
        f.write_str(text)
    }
}

/// Point-in-time view of a synchronized collection, published through the
/// watch channel and persisted as the offline fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot<P> {
    pub items: Vec<CollectionItem<P>>,
    /// Server-reported total across all pages, adjusted optimistically.
    pub total: u64,
    /// True iff the offline changeset is non-empty.
    pub has_offline_changes: bool,
    /// True while the collection is serving local state because the last
    /// authoritative load failed.
    pub offline_mode: bool,
    pub sync_status: SyncStatus,
    /// Epoch millis of the last successful full reload or full flush.
    pub last_sync_at: Option<i64>,
}

impl<P> Default for CollectionSnapshot<P> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            has_offline_changes: false,
            offline_mode: false,
            sync_status: SyncStatus::Synced,
            last_sync_at: None,
        }
    }
}

/// How a removal was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The server confirmed the delete.
    Confirmed,
    /// Connectivity was down; a tombstone is journaled for replay.
    Queued,
}

/// Result of the pre-checkout synchronization gate.
#[derive(Debug, Clone, Default)]
pub struct CheckoutReport {
    /// True iff no unsynchronized state remains; checkout may proceed.
    pub ready: bool,
    /// Outcome of the forced replay cycle.
    pub replay: ReplayReport,
    /// Queue entries whose flush failed; they remain queued.
    pub flush_failed: Vec<ItemId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(SyncStatus::Synced.to_string(), "All changes synced");
        assert_eq!(SyncStatus::Offline.to_string(), "Offline, changes saved locally");
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::Rejected("stock unavailable".into());
        assert_eq!(err.to_string(), "rejected by server: stock unavailable");
        assert_eq!(
            SyncError::UnknownItem(ItemId::Remote(4)).to_string(),
            "unknown item remote:4"
        );
    }

    #[test]
    fn test_default_snapshot_is_clean() {
        let snapshot: CollectionSnapshot<u32> = CollectionSnapshot::default();
        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.sync_status, SyncStatus::Synced);
        assert!(!snapshot.has_offline_changes);
    }
}
