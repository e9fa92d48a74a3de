// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collection item data model.
//!
//! The [`CollectionItem`] is the unit of state the sync engine manages: one
//! cart line, one favorite, one address. Each item carries an [`ItemId`] and
//! a [`SyncState`] describing where it stands relative to the server.
//!
//! Identity is a tagged union rather than a numeric-sign convention:
//! [`ItemId::Local`] ids are minted on-device for optimistic inserts and are
//! replaced by [`ItemId::Remote`] once the server confirms the create. On the
//! wire and in persisted snapshots, local ids serialize as negative integers
//! so they can never collide with server ids (which are always non-negative).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of a collection item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemId {
    /// Locally minted, not yet confirmed by the server.
    Local(u64),
    /// Server-assigned canonical id.
    Remote(u64),
}

impl ItemId {
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// The server id, if this identity is server-confirmed.
    #[must_use]
    pub fn remote(&self) -> Option<u64> {
        match self {
            Self::Remote(id) => Some(*id),
            Self::Local(_) => None,
        }
    }

    /// Signed wire representation: local ids are negative, remote ids
    /// non-negative.
    #[must_use]
    pub fn as_wire(&self) -> i64 {
        match self {
            Self::Local(n) => -(*n as i64),
            Self::Remote(n) => *n as i64,
        }
    }

    /// Parse the signed wire representation.
    #[must_use]
    pub fn from_wire(raw: i64) -> Self {
        if raw < 0 {
            Self::Local(raw.unsigned_abs())
        } else {
            Self::Remote(raw as u64)
        }
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(n) => write!(f, "local:{}", n),
            Self::Remote(n) => write!(f, "remote:{}", n),
        }
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_wire(i64::deserialize(deserializer)?))
    }
}

/// Per-item synchronization state.
///
/// Transitions: `Synced → LocalPending → {Synced | Offline}`, and
/// `Offline → LocalPending` when a replay cycle picks the item up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Server has confirmed the latest mutation.
    Synced,
    /// An optimistic mutation is applied locally; a sync attempt is in flight
    /// or scheduled.
    LocalPending,
    /// The last mutation could not reach the server; an offline changeset or
    /// queue entry covers it.
    Offline,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "Synced"),
            Self::LocalPending => write!(f, "LocalPending"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// Domain payload carried by a [`CollectionItem`].
///
/// Implemented by the concrete storefront types ([`crate::cart::CartLine`],
/// [`crate::favorites::FavoriteEntry`]).
pub trait Payload:
    Clone + std::fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Whether two payloads describe the same logical entity (same product,
    /// same sku), regardless of mutable fields like quantity. Used for
    /// duplicate detection and favorite toggling.
    fn same_entity(&self, other: &Self) -> bool;

    /// Short human-readable tag for log fields.
    fn label(&self) -> String;
}

/// One entry of a synchronized collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionItem<P> {
    pub id: ItemId,
    pub payload: P,
    pub state: SyncState,
}

impl<P> CollectionItem<P> {
    pub fn new(id: ItemId, payload: P, state: SyncState) -> Self {
        Self { id, payload, state }
    }

    /// True if the last mutation to this item has not been confirmed.
    #[must_use]
    pub fn offline(&self) -> bool {
        self.state == SyncState::Offline
    }

    /// True if a sync attempt is in flight or scheduled.
    #[must_use]
    pub fn pending_sync(&self) -> bool {
        self.state == SyncState::LocalPending
    }
}
