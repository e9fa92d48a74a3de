// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutation queue: debounced write coalescing.
//!
//! A user tapping the quantity stepper five times in a second must not cost
//! five network round trips. The [`MutationQueue`] keeps at most one entry
//! per item id holding the latest desired value; a debounce timer (default
//! 800 ms) collapses rapid successive mutations into a single send carrying
//! only the final value. Intermediate values are dropped on purpose — lossy
//! coalescing is the point, not a bug.
//!
//! Per-id ordering is guaranteed by a single in-flight guard: while a send
//! for an id is running, newer values are recorded but no second send
//! starts; the timer re-arms once the flight completes. The queue does not
//! retry: one failed send hands the id to the offline changeset path via
//! [`UpdateSink::send_failed`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::item::{ItemId, Payload};
use crate::remote::RemoteError;

/// Receiving side of the queue: the orchestrator.
#[async_trait]
pub trait UpdateSink<P: Payload>: Send + Sync {
    /// Transmit the coalesced value for `id`.
    async fn send(&self, id: ItemId, value: P) -> Result<(), RemoteError>;

    /// A send failed and the entry was dropped from the queue; the offline
    /// path takes over eventual delivery of `value`.
    async fn send_failed(&self, id: ItemId, value: P, error: RemoteError);
}

struct Entry<P> {
    /// Latest desired value not yet handed to a send.
    desired: Option<P>,
    /// A send for this id is in flight.
    pending: bool,
    timer: Option<JoinHandle<()>>,
}

impl<P> Default for Entry<P> {
    fn default() -> Self {
        Self {
            desired: None,
            pending: false,
            timer: None,
        }
    }
}

struct QueueInner<P: Payload> {
    entries: DashMap<ItemId, Entry<P>>,
    sink: Arc<dyn UpdateSink<P>>,
    debounce: Duration,
}

/// Per-entity-id pending-write tracker with debounce coalescing.
pub struct MutationQueue<P: Payload> {
    inner: Arc<QueueInner<P>>,
}

impl<P: Payload> Clone for MutationQueue<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> MutationQueue<P> {
    pub fn new(sink: Arc<dyn UpdateSink<P>>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                entries: DashMap::new(),
                sink,
                debounce,
            }),
        }
    }

    /// Record the desired value for `id`, restarting the debounce timer.
    ///
    /// If a send for `id` is in flight the value is recorded but the timer
    /// is not restarted until that send completes — this is what prevents
    /// send storms for a rapidly mutated item.
    pub fn enqueue(&self, id: ItemId, value: P) {
        let mut entry = self.inner.entries.entry(id).or_default();
        entry.desired = Some(value);
        if entry.pending {
            debug!(%id, "Send in flight, absorbed newer value");
            return;
        }
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.timer = Some(QueueInner::spawn_timer(Arc::clone(&self.inner), id));
    }

    /// Send every outstanding entry's latest value immediately, in parallel.
    ///
    /// Returns the ids whose sends failed; those entries stay queued with
    /// their latest values. Used by the pre-checkout synchronization gate.
    pub async fn flush_all(&self) -> Vec<ItemId> {
        let inner = &self.inner;

        let mut to_send = Vec::new();
        for mut entry in inner.entries.iter_mut() {
            if entry.pending {
                continue;
            }
            if let Some(value) = entry.desired.take() {
                entry.pending = true;
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                to_send.push((*entry.key(), value));
            }
        }
        if to_send.is_empty() {
            return Vec::new();
        }
        debug!(count = to_send.len(), "Flushing all queued mutations");

        let sends = to_send.into_iter().map(|(id, value)| {
            let inner = Arc::clone(inner);
            async move {
                let result = inner.sink.send(id, value.clone()).await;
                (id, value, result)
            }
        });

        let mut failed = Vec::new();
        for (id, value, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => inner.settle(id),
                Err(error) => {
                    warn!(%id, %error, "Flush send failed, entry stays queued");
                    if let Some(mut entry) = inner.entries.get_mut(&id) {
                        entry.pending = false;
                        // Keep the newest value if one arrived mid-flight
                        if entry.desired.is_none() {
                            entry.desired = Some(value);
                        }
                    }
                    failed.push(id);
                }
            }
        }
        failed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        self.inner.entries.contains_key(&id)
    }

    /// Latest not-yet-sent value per queued id. Used to re-overlay
    /// optimistic values after an authoritative reload.
    #[must_use]
    pub fn queued_values(&self) -> Vec<(ItemId, P)> {
        self.inner
            .entries
            .iter()
            .filter_map(|entry| entry.value().desired.clone().map(|v| (*entry.key(), v)))
            .collect()
    }

    /// Drop the entry for `id`, cancelling its timer. Used when the item is
    /// removed from the collection while an update is still queued.
    pub fn discard(&self, id: ItemId) {
        if let Some((_, mut entry)) = self.inner.entries.remove(&id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    /// Drop all entries and cancel their timers (session reset).
    pub fn clear(&self) {
        self.inner.entries.retain(|_, entry| {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            false
        });
    }
}

impl<P: Payload> QueueInner<P> {
    fn spawn_timer(inner: Arc<Self>, id: ItemId) -> JoinHandle<()> {
        let debounce = inner.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.fire(id).await;
        })
    }

    /// Debounce timer elapsed: take the desired value and send it.
    async fn fire(self: &Arc<Self>, id: ItemId) {
        let value = {
            let Some(mut entry) = self.entries.get_mut(&id) else {
                return;
            };
            if entry.pending {
                return;
            }
            entry.timer = None;
            match entry.desired.take() {
                Some(value) => {
                    entry.pending = true;
                    value
                }
                None => {
                    drop(entry);
                    self.entries.remove_if(&id, |_, e| !e.pending && e.desired.is_none());
                    return;
                }
            }
        };

        debug!(%id, "Debounce elapsed, sending coalesced value");
        match self.sink.send(id, value.clone()).await {
            Ok(()) => self.settle(id),
            Err(error) => {
                // One failure hands off to the offline path; prefer the
                // newest value if one arrived while the send was in flight.
                let newest = self
                    .entries
                    .remove(&id)
                    .and_then(|(_, entry)| entry.desired)
                    .unwrap_or(value);
                warn!(%id, %error, "Send failed, handing off to offline path");
                self.sink.send_failed(id, newest, error).await;
            }
        }
    }

    /// A send for `id` completed successfully: drop the entry, or re-arm the
    /// debounce timer if a newer value arrived mid-flight.
    fn settle(self: &Arc<Self>, id: ItemId) {
        let rearm = match self.entries.get_mut(&id) {
            Some(mut entry) => {
                entry.pending = false;
                entry.desired.is_some()
            }
            None => false,
        };
        if rearm {
            if let Some(mut entry) = self.entries.get_mut(&id) {
                if !entry.pending && entry.timer.is_none() {
                    entry.timer = Some(Self::spawn_timer(Arc::clone(self), id));
                }
            }
        } else {
            // Guard against a concurrent enqueue between the check and here
            self.entries.remove_if(&id, |_, e| !e.pending && e.desired.is_none());
        }
    }
}
