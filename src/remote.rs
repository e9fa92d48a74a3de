// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consumed REST contract.
//!
//! The sync engine never talks HTTP itself; the application injects a
//! [`RemoteCollection`] implementation wrapping its API client. The contract
//! the engine depends on: endpoints are idempotent by id and return the
//! authoritative post-mutation state.
//!
//! Failures are split into two families the engine treats very differently:
//! connectivity failures (no response, timeout, explicit offline marker) are
//! absorbed into the offline-pending path, while application-level
//! rejections (the server understood and declined) are surfaced and rolled
//! back — retrying a rejected business rule is pointless.

use async_trait::async_trait;
use thiserror::Error;

use crate::item::Payload;

/// Why a remote call failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No connectivity: the request never reached the server.
    #[error("network unreachable")]
    Offline,
    /// The request timed out. Treated identically to [`RemoteError::Offline`].
    #[error("request timed out")]
    Timeout,
    /// The server received the request and declined it (validation, stock,
    /// auth). Not retryable by the sync engine.
    #[error("rejected by server: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// True for failures caused by connectivity rather than by the server
    /// declining the request.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// One page of an authoritative collection listing.
#[derive(Debug, Clone)]
pub struct Page<P> {
    /// `(server_id, payload)` pairs in server order.
    pub items: Vec<(u64, P)>,
    /// Total item count across all pages.
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// REST surface of one server-side collection (cart, favorites).
///
/// All ids here are server-canonical; the engine only dispatches calls for
/// [`crate::ItemId::Remote`] identities.
#[async_trait]
pub trait RemoteCollection<P: Payload>: Send + Sync {
    /// `GET /collection?page=&limit=`
    async fn list(&self, page: u32, limit: u32) -> Result<Page<P>, RemoteError>;

    /// `POST /collection` — the server assigns the canonical id and returns
    /// the authoritative payload.
    async fn create(&self, payload: &P) -> Result<(u64, P), RemoteError>;

    /// `PUT /collection/{id}`
    async fn update(&self, id: u64, payload: &P) -> Result<P, RemoteError>;

    /// `DELETE /collection/{id}`
    async fn delete(&self, id: u64) -> Result<(), RemoteError>;

    /// `DELETE /collection` with an id list. Used to compact the replay of
    /// multiple offline removals. The default falls back to sequential
    /// deletes for backends without a batch endpoint.
    async fn batch_delete(&self, ids: &[u64]) -> Result<(), RemoteError> {
        for id in ids {
            self.delete(*id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(RemoteError::Offline.is_connectivity());
        assert!(RemoteError::Timeout.is_connectivity());
        assert!(!RemoteError::Rejected("out of stock".into()).is_connectivity());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", RemoteError::Offline), "network unreachable");
        assert_eq!(
            format!("{}", RemoteError::Rejected("out of stock".into())),
            "rejected by server: out of stock"
        );
    }
}
