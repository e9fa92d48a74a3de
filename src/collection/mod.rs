// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronized collection state: the orchestrator the UI observes.
//!
//! A [`SyncedCollection`] owns the in-memory, locally-authoritative copy of
//! one server-side collection (cart lines, favorites) and coordinates the
//! mutation queue, offline changeset, and network monitor around it. Every
//! mutating operation applies its optimistic local effect first and deals
//! with the network second; the UI sees the result immediately through the
//! watch channel and the engine reconciles truth in the background.
//!
//! The one place that inverts this policy is [`SyncedCollection::sync_before_checkout`]:
//! financial correctness needs a hard gate, so checkout blocks until every
//! journaled and queued mutation has been confirmed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use storefront_sync::{
//!     CartLine, ConnectivityProbe, MemoryStore, NetworkMonitor, RemoteCollection,
//!     SyncConfig, SyncedCollection,
//! };
//!
//! # async fn demo(
//! #     api: Arc<dyn RemoteCollection<CartLine>>,
//! #     probe: Arc<dyn ConnectivityProbe>,
//! # ) {
//! let monitor = Arc::new(NetworkMonitor::new(probe));
//! let cart = SyncedCollection::new(
//!     "cart",
//!     api,
//!     Arc::new(MemoryStore::new()),
//!     Arc::clone(&monitor),
//!     SyncConfig::default(),
//! )
//! .await;
//!
//! cart.load_authoritative(1).await;
//! let mut updates = cart.subscribe();
//! let id = cart
//!     .add(CartLine { product_id: 9, sku_id: 90, quantity: 1 })
//!     .await
//!     .unwrap();
//! # let _ = (updates.changed().await, id);
//! # }
//! ```

mod types;

pub use types::{CheckoutReport, CollectionSnapshot, RemoveOutcome, SyncError, SyncStatus};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::changeset::{ChangeAction, OfflineChangeset, ReplayReport};
use crate::config::SyncConfig;
use crate::item::{CollectionItem, ItemId, Payload, SyncState};
use crate::network::NetworkMonitor;
use crate::queue::{MutationQueue, UpdateSink};
use crate::remote::{RemoteCollection, RemoteError};
use crate::storage::{self, DurableStore};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

struct State<P> {
    items: Vec<CollectionItem<P>>,
    total: u64,
    offline_mode: bool,
    last_sync_at: Option<i64>,
}

impl<P> Default for State<P> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            offline_mode: false,
            last_sync_at: None,
        }
    }
}

struct CollectionInner<P: Payload> {
    name: String,
    remote: Arc<dyn RemoteCollection<P>>,
    store: Arc<dyn DurableStore>,
    monitor: Arc<NetworkMonitor>,
    config: SyncConfig,
    state: Mutex<State<P>>,
    changeset: OfflineChangeset<P>,
    queue: MutationQueue<P>,
    publisher: watch::Sender<CollectionSnapshot<P>>,
    next_local_id: AtomicU64,
    /// Monitor subscription, released on drop. 0 = not subscribed.
    subscription: AtomicU64,
    snapshot_key: String,
}

/// Offline-tolerant, reactive view of one server-side collection.
///
/// Cheap to clone; clones share state.
pub struct SyncedCollection<P: Payload> {
    inner: Arc<CollectionInner<P>>,
}

impl<P: Payload> Clone for SyncedCollection<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Adapter handing the mutation queue's sends back to the orchestrator.
struct QueueSink<P: Payload> {
    inner: Weak<CollectionInner<P>>,
}

#[async_trait]
impl<P: Payload> UpdateSink<P> for QueueSink<P> {
    async fn send(&self, id: ItemId, value: P) -> Result<(), RemoteError> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        // Local ids never reach the queue; their updates ride the changeset.
        let Some(server_id) = id.remote() else {
            return Ok(());
        };
        let confirmed = inner.remote.update(server_id, &value).await?;
        inner.apply_confirmed_update(id, confirmed);
        inner.publish();
        inner.persist_snapshot().await;
        Ok(())
    }

    async fn send_failed(&self, id: ItemId, value: P, error: RemoteError) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if error.is_connectivity() {
            warn!(collection = %inner.name, %id, %error, "Debounced update unreachable, journaling");
            inner.monitor_recheck();
            inner.degrade(id, ChangeAction::Update { payload: value }).await;
        } else {
            // The server declined the value; our optimistic copy is wrong.
            warn!(collection = %inner.name, %id, %error, "Debounced update rejected, reloading");
            let collection = SyncedCollection { inner };
            collection.load_authoritative(1).await;
        }
    }
}

impl<P: Payload> SyncedCollection<P> {
    /// Construct a collection, restoring the persisted snapshot and offline
    /// changeset of a previous session, and wire it to the network monitor
    /// so reconnects trigger an automatic replay.
    pub async fn new(
        name: impl Into<String>,
        remote: Arc<dyn RemoteCollection<P>>,
        store: Arc<dyn DurableStore>,
        monitor: Arc<NetworkMonitor>,
        config: SyncConfig,
    ) -> Self {
        let name = name.into();
        let snapshot_key = format!("{}:{}:snapshot", config.storage_prefix, name);
        let changes_key = format!("{}:{}:changes", config.storage_prefix, name);

        let changeset = OfflineChangeset::load(
            Arc::clone(&store),
            changes_key,
            config.replay_backoff_base(),
            config.replay_backoff_cap(),
        )
        .await;

        let restored: Option<CollectionSnapshot<P>> =
            match storage::get_json(store.as_ref(), &snapshot_key).await {
                Ok(found) => found,
                Err(error) => {
                    warn!(collection = %name, %error, "Could not restore snapshot, starting empty");
                    None
                }
            };
        let mut state = State::default();
        let mut next_local = 1;
        if let Some(snapshot) = restored {
            info!(collection = %name, items = snapshot.items.len(), "Restored persisted snapshot");
            for item in &snapshot.items {
                if let ItemId::Local(n) = item.id {
                    next_local = next_local.max(n + 1);
                }
            }
            state.items = snapshot.items;
            state.total = snapshot.total;
            state.last_sync_at = snapshot.last_sync_at;
        }

        let debounce = config.debounce();
        let (publisher, _) = watch::channel(CollectionSnapshot::default());
        let inner = Arc::new_cyclic(|weak: &Weak<CollectionInner<P>>| {
            let sink = Arc::new(QueueSink {
                inner: weak.clone(),
            });
            CollectionInner {
                name,
                remote,
                store,
                monitor,
                config,
                state: Mutex::new(state),
                changeset,
                queue: MutationQueue::new(sink, debounce),
                publisher,
                next_local_id: AtomicU64::new(next_local),
                subscription: AtomicU64::new(0),
                snapshot_key,
            }
        });
        inner.publish();

        let weak = Arc::downgrade(&inner);
        let subscription = inner.monitor.subscribe(move |online| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.publish();
            if online {
                let collection = SyncedCollection { inner };
                tokio::spawn(async move { collection.handle_reconnect().await });
            }
        });
        inner.subscription.store(subscription, Ordering::Release);

        Self { inner }
    }

    /// Reactive read surface: receives a fresh snapshot after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot<P>> {
        self.inner.publisher.subscribe()
    }

    /// Current snapshot without subscribing.
    #[must_use]
    pub fn snapshot(&self) -> CollectionSnapshot<P> {
        self.inner.current_snapshot()
    }

    #[must_use]
    pub fn items(&self) -> Vec<CollectionItem<P>> {
        self.inner.state.lock().items.clone()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.inner.state.lock().total
    }

    #[must_use]
    pub fn find(&self, id: ItemId) -> Option<CollectionItem<P>> {
        self.inner
            .state
            .lock()
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    #[must_use]
    pub fn has_offline_changes(&self) -> bool {
        !self.inner.changeset.is_empty()
    }

    /// Insert an item optimistically and create it on the server.
    ///
    /// The item is visible to the UI before any network traffic happens. A
    /// connectivity failure degrades to offline-pending rather than failing;
    /// the only error a caller can see is an explicit server rejection,
    /// which rolls the insert back.
    #[tracing::instrument(skip(self, payload), fields(collection = %self.inner.name, item = %payload.label()))]
    pub async fn add(&self, payload: P) -> Result<ItemId, SyncError> {
        let inner = &self.inner;
        let id = ItemId::Local(inner.next_local_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut state = inner.state.lock();
            state
                .items
                .insert(0, CollectionItem::new(id, payload.clone(), SyncState::LocalPending));
            state.total += 1;
        }
        inner.publish();
        inner.persist_snapshot().await;

        if !inner.monitor.is_online() {
            debug!(%id, "Offline, journaling create");
            inner.degrade(id, ChangeAction::Add { payload }).await;
            return Ok(id);
        }

        match inner.remote.create(&payload).await {
            Ok((server_id, confirmed)) => {
                let confirmed_id = ItemId::Remote(server_id);
                debug!(local = %id, id = %confirmed_id, "Create confirmed");
                inner.adopt_identity(id, confirmed_id, confirmed);
                inner.publish();
                inner.persist_snapshot().await;
                Ok(confirmed_id)
            }
            Err(RemoteError::Rejected(reason)) => {
                warn!(%id, %reason, "Create rejected, rolling back optimistic insert");
                {
                    let mut state = inner.state.lock();
                    if let Some(pos) = state.items.iter().position(|item| item.id == id) {
                        state.items.remove(pos);
                        state.total = state.total.saturating_sub(1);
                    }
                }
                inner.publish();
                inner.persist_snapshot().await;
                Err(SyncError::Rejected(reason))
            }
            Err(error) => {
                warn!(%id, %error, "Create unreachable, degrading to offline-pending");
                inner.monitor_recheck();
                inner.degrade(id, ChangeAction::Add { payload }).await;
                Ok(id)
            }
        }
    }

    /// Mutate an item in place and schedule the write.
    ///
    /// Online, the new value rides the debounced mutation queue; offline (or
    /// for an item whose create has not confirmed) it is journaled,
    /// replacing any prior un-replayed update for the same id.
    #[tracing::instrument(skip(self, payload), fields(collection = %self.inner.name, %id))]
    pub async fn update(&self, id: ItemId, payload: P) -> Result<(), SyncError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
                return Err(SyncError::UnknownItem(id));
            };
            item.payload = payload.clone();
            item.state = SyncState::LocalPending;
        }
        inner.publish();
        inner.persist_snapshot().await;

        if inner.monitor.is_online() && id.is_remote() {
            // A journaled update from an earlier offline stretch is now
            // stale; dropping it keeps a retained replay entry from
            // clobbering the value the queue is about to send.
            match inner.changeset.supersede_update(id).await {
                Ok(true) => inner.publish(),
                Ok(false) => {}
                Err(error) => warn!(%id, %error, "Could not persist superseded update"),
            }
            inner.queue.enqueue(id, payload);
        } else {
            inner.degrade(id, ChangeAction::Update { payload }).await;
        }
        Ok(())
    }

    /// Remove an item optimistically.
    ///
    /// Deletion is the one operation that rolls back on failure: a silently
    /// "offline-deleted" item is confusing. An explicit rejection reinserts
    /// the item at its original position and surfaces the error; genuine
    /// connectivity loss instead journals a tombstone and reports
    /// [`RemoveOutcome::Queued`].
    #[tracing::instrument(skip(self), fields(collection = %self.inner.name, %id))]
    pub async fn remove(&self, id: ItemId) -> Result<RemoveOutcome, SyncError> {
        let inner = &self.inner;
        let (index, item) = {
            let mut state = inner.state.lock();
            let Some(pos) = state.items.iter().position(|item| item.id == id) else {
                return Err(SyncError::UnknownItem(id));
            };
            let item = state.items.remove(pos);
            state.total = state.total.saturating_sub(1);
            (pos, item)
        };
        inner.queue.discard(id);
        inner.publish();
        inner.persist_snapshot().await;

        let server_id = match (inner.monitor.is_online(), id.remote()) {
            (true, Some(server_id)) => server_id,
            // Offline, or the server never heard of this item; journaling
            // the remove cancels a still-pending offline create outright.
            _ => {
                inner.degrade_removed(id).await;
                return Ok(RemoveOutcome::Queued);
            }
        };

        match inner.remote.delete(server_id).await {
            Ok(()) => {
                debug!("Delete confirmed");
                // An older journaled update for this id would now target a
                // deleted item; drop it instead of replaying it into a
                // rejection.
                if let Err(error) = inner.changeset.supersede_update(id).await {
                    warn!(%id, %error, "Could not drop journaled update for deleted item");
                }
                inner.persist_snapshot().await;
                Ok(RemoveOutcome::Confirmed)
            }
            Err(RemoteError::Rejected(reason)) => {
                warn!(%reason, "Delete rejected, restoring item");
                {
                    let mut state = inner.state.lock();
                    let pos = index.min(state.items.len());
                    state.items.insert(
                        pos,
                        CollectionItem::new(item.id, item.payload, SyncState::Synced),
                    );
                    state.total += 1;
                }
                inner.publish();
                inner.persist_snapshot().await;
                Err(SyncError::Rejected(reason))
            }
            Err(error) => {
                // Connectivity dropped mid-request; the removal stands.
                warn!(%error, "Delete unreachable, journaling tombstone");
                inner.monitor_recheck();
                inner.degrade_removed(id).await;
                Ok(RemoveOutcome::Queued)
            }
        }
    }

    /// Replace local state with the server's canonical listing.
    ///
    /// On success, still-pending changeset entries are re-overlaid so no
    /// accepted user action disappears from view. On failure the collection
    /// keeps serving the last local snapshot with `offline_mode` set; a
    /// failed load never blocks the UI.
    #[tracing::instrument(skip(self), fields(collection = %self.inner.name))]
    pub async fn load_authoritative(&self, page: u32) -> bool {
        let inner = &self.inner;
        match inner.remote.list(page, inner.config.page_limit).await {
            Ok(listing) => {
                {
                    let mut state = inner.state.lock();
                    state.items = listing
                        .items
                        .into_iter()
                        .map(|(id, payload)| {
                            CollectionItem::new(ItemId::Remote(id), payload, SyncState::Synced)
                        })
                        .collect();
                    state.total = listing.total;
                    state.offline_mode = false;
                    state.last_sync_at = Some(now_ms());
                }
                inner.overlay_pending();
                inner.publish();
                inner.persist_snapshot().await;
                info!(total = inner.state.lock().total, "Authoritative load complete");
                true
            }
            Err(error) => {
                warn!(%error, "Authoritative load failed, serving local snapshot");
                let empty = inner.state.lock().items.is_empty();
                if empty {
                    let fallback: Option<CollectionSnapshot<P>> =
                        storage::get_json(inner.store.as_ref(), &inner.snapshot_key)
                            .await
                            .ok()
                            .flatten();
                    if let Some(snapshot) = fallback {
                        let mut state = inner.state.lock();
                        state.items = snapshot.items;
                        state.total = snapshot.total;
                        state.last_sync_at = snapshot.last_sync_at;
                    }
                }
                inner.state.lock().offline_mode = true;
                inner.monitor_recheck();
                inner.publish();
                false
            }
        }
    }

    /// Hard synchronization gate before checkout.
    ///
    /// Verifies connectivity with a live probe, forces a replay of the
    /// offline changeset (bypassing backoff), then flushes the mutation
    /// queue. `ready` is true only when nothing unsynchronized remains;
    /// checkout must not proceed otherwise.
    #[tracing::instrument(skip(self), fields(collection = %self.inner.name))]
    pub async fn sync_before_checkout(&self) -> CheckoutReport {
        let inner = &self.inner;
        if !inner.monitor.check_status().await {
            warn!("Checkout sync blocked, backend unreachable");
            inner.publish();
            return CheckoutReport::default();
        }

        let replay = inner.changeset.replay(inner.remote.as_ref(), true).await;
        self.apply_replay_effects(&replay).await;
        let flush_failed = inner.queue.flush_all().await;

        let ready =
            inner.changeset.is_empty() && flush_failed.is_empty() && inner.queue.is_empty();
        if ready {
            inner.state.lock().last_sync_at = Some(now_ms());
            info!("Checkout gate clear");
        } else {
            warn!(
                journaled = inner.changeset.len(),
                flush_failed = flush_failed.len(),
                "Checkout gate blocked by unresolved failures"
            );
        }
        inner.publish();
        inner.persist_snapshot().await;
        CheckoutReport {
            ready,
            replay,
            flush_failed,
        }
    }

    /// Periodic background reconciliation: re-probe, replay if anything is
    /// journaled (honoring the failure backoff), otherwise refresh from the
    /// server.
    pub async fn reconcile(&self) {
        let inner = &self.inner;
        if !inner.monitor.check_status().await {
            inner.publish();
            return;
        }
        if inner.changeset.is_empty() {
            self.load_authoritative(1).await;
        } else {
            let report = inner.changeset.replay(inner.remote.as_ref(), false).await;
            self.apply_replay_effects(&report).await;
        }
    }

    /// Clear all in-memory and persisted state (logout).
    pub async fn reset(&self) {
        let inner = &self.inner;
        info!(collection = %inner.name, "Resetting collection");
        inner.queue.clear();
        if let Err(error) = inner.changeset.clear().await {
            warn!(%error, "Could not clear persisted changeset");
        }
        *inner.state.lock() = State::default();
        if let Err(error) = inner.store.remove(&inner.snapshot_key).await {
            warn!(%error, "Could not clear persisted snapshot");
        }
        inner.publish();
    }

    /// Empty the collection (the "clear cart" action).
    ///
    /// Optimistic like every other mutation: items vanish immediately and
    /// pending debounced writes for them are discarded. Server-confirmed
    /// ids go out as one batch delete when online; a rejection restores the
    /// collection wholesale, while connectivity loss journals tombstones
    /// that the next replay compacts back into a batch. Unconfirmed local
    /// creates are cancelled outright.
    #[tracing::instrument(skip(self), fields(collection = %self.inner.name))]
    pub async fn clear_all(&self) -> Result<RemoveOutcome, SyncError> {
        let inner = &self.inner;
        let (items, total) = {
            let mut state = inner.state.lock();
            let total = state.total;
            state.total = 0;
            (std::mem::take(&mut state.items), total)
        };
        if items.is_empty() {
            return Ok(RemoveOutcome::Confirmed);
        }
        inner.queue.clear();
        inner.publish();
        inner.persist_snapshot().await;

        let server_ids: Vec<u64> = items.iter().filter_map(|item| item.id.remote()).collect();

        let mut outcome = RemoveOutcome::Confirmed;
        if !server_ids.is_empty() {
            let confirmed = if inner.monitor.is_online() {
                match inner.remote.batch_delete(&server_ids).await {
                    Ok(()) => {
                        debug!(count = server_ids.len(), "Clear confirmed");
                        for server_id in &server_ids {
                            let id = ItemId::Remote(*server_id);
                            if let Err(error) = inner.changeset.supersede_update(id).await {
                                warn!(%id, %error, "Could not drop journaled update for cleared item");
                            }
                        }
                        true
                    }
                    Err(RemoteError::Rejected(reason)) => {
                        warn!(%reason, "Clear rejected, restoring collection");
                        {
                            let mut state = inner.state.lock();
                            state.items = items;
                            state.total = total;
                        }
                        inner.publish();
                        inner.persist_snapshot().await;
                        return Err(SyncError::Rejected(reason));
                    }
                    Err(error) => {
                        warn!(%error, "Clear unreachable, journaling tombstones");
                        inner.monitor_recheck();
                        false
                    }
                }
            } else {
                debug!(count = server_ids.len(), "Offline, journaling clear as tombstones");
                false
            };
            if !confirmed {
                outcome = RemoveOutcome::Queued;
                for server_id in server_ids {
                    if let Err(error) = inner
                        .changeset
                        .record(ItemId::Remote(server_id), ChangeAction::Remove)
                        .await
                    {
                        warn!(id = server_id, %error, "Could not journal tombstone");
                    }
                }
            }
        }

        // Cancel journaled creates for items that never reached the server.
        for item in items.iter().filter(|item| item.id.is_local()) {
            if let Err(error) = inner.changeset.record(item.id, ChangeAction::Remove).await {
                warn!(id = %item.id, %error, "Could not cancel journaled create");
            }
        }
        inner.publish();
        inner.persist_snapshot().await;
        Ok(outcome)
    }

    async fn handle_reconnect(self) {
        info!(collection = %self.inner.name, "Connectivity restored, replaying offline changes");
        let report = self
            .inner
            .changeset
            .replay(self.inner.remote.as_ref(), false)
            .await;
        self.apply_replay_effects(&report).await;
    }

    /// Fold a replay report back into collection state: renumber confirmed
    /// creates, drop locally-minted items the server rejected, and refresh
    /// from the authoritative listing when anything changed server-side.
    async fn apply_replay_effects(&self, report: &ReplayReport) {
        if !report.attempted {
            return;
        }
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            for (old, new) in &report.remapped {
                if let Some(item) = state.items.iter_mut().find(|item| item.id == *old) {
                    item.id = *new;
                }
            }
            for rejected in &report.rejected {
                if rejected.is_local() {
                    if let Some(pos) = state.items.iter().position(|item| item.id == *rejected) {
                        state.items.remove(pos);
                        state.total = state.total.saturating_sub(1);
                    }
                }
            }
        }
        if report.succeeded > 0 || !report.rejected.is_empty() {
            self.load_authoritative(1).await;
        } else {
            inner.publish();
            inner.persist_snapshot().await;
        }
    }
}

impl<P: Payload> CollectionInner<P> {
    fn current_snapshot(&self) -> CollectionSnapshot<P> {
        let has_offline = !self.changeset.is_empty();
        let queue_busy = !self.queue.is_empty();
        let state = self.state.lock();
        let pending_items = state
            .items
            .iter()
            .any(|item| item.pending_sync() || item.offline());
        let sync_status = if self.changeset.replay_in_flight() {
            SyncStatus::Syncing
        } else if state.offline_mode || !self.monitor.is_online() {
            SyncStatus::Offline
        } else if has_offline || queue_busy || pending_items {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        CollectionSnapshot {
            items: state.items.clone(),
            total: state.total,
            has_offline_changes: has_offline,
            offline_mode: state.offline_mode,
            sync_status,
            last_sync_at: state.last_sync_at,
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.current_snapshot());
    }

    async fn persist_snapshot(&self) {
        let snapshot = self.current_snapshot();
        if let Err(error) = storage::put_json(
            self.store.as_ref(),
            &self.snapshot_key,
            &snapshot,
            Some(self.config.snapshot_ttl()),
        )
        .await
        {
            warn!(
                collection = %self.name,
                %error,
                "Snapshot persist failed, in-memory state remains authoritative"
            );
        }
    }

    /// Mark the item offline, journal the action, and republish.
    async fn degrade(&self, id: ItemId, action: ChangeAction<P>) {
        {
            let mut state = self.state.lock();
            if let Some(item) = state.items.iter_mut().find(|item| item.id == id) {
                item.state = SyncState::Offline;
            }
        }
        if let Err(error) = self.changeset.record(id, action).await {
            warn!(collection = %self.name, %id, %error, "Could not journal offline change");
        }
        self.publish();
        self.persist_snapshot().await;
    }

    /// Journal a tombstone for an already-removed item.
    async fn degrade_removed(&self, id: ItemId) {
        if let Err(error) = self.changeset.record(id, ChangeAction::Remove).await {
            warn!(collection = %self.name, %id, %error, "Could not journal tombstone");
        }
        self.publish();
        self.persist_snapshot().await;
    }

    /// Splice a confirmed server identity into the optimistic item,
    /// preserving its position.
    fn adopt_identity(&self, old: ItemId, new: ItemId, confirmed: P) {
        {
            let mut state = self.state.lock();
            if let Some(item) = state.items.iter_mut().find(|item| item.id == old) {
                item.id = new;
                if item.payload == confirmed {
                    item.state = SyncState::Synced;
                }
                // else the user mutated again while the create was in
                // flight; the follow-up write will confirm it
            }
        }
        self.changeset.renumber(old, new);
    }

    fn apply_confirmed_update(&self, id: ItemId, confirmed: P) {
        let mut state = self.state.lock();
        if let Some(item) = state.items.iter_mut().find(|item| item.id == id) {
            if item.payload == confirmed {
                item.state = SyncState::Synced;
            }
            // else a newer optimistic value is still queued
        }
    }

    /// Re-apply pending mutations on top of a fresh authoritative listing.
    fn overlay_pending(&self) {
        let journaled = self.changeset.snapshot();
        let queued = self.queue.queued_values();
        if journaled.is_empty() && queued.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for entry in journaled {
            match entry.action {
                ChangeAction::Add { payload } => {
                    if !state.items.iter().any(|item| item.id == entry.id) {
                        state.items.insert(
                            0,
                            CollectionItem::new(entry.id, payload, SyncState::Offline),
                        );
                        state.total += 1;
                    }
                }
                ChangeAction::Update { payload } => {
                    if let Some(item) = state.items.iter_mut().find(|item| item.id == entry.id) {
                        item.payload = payload;
                        item.state = SyncState::Offline;
                    }
                }
                ChangeAction::Remove => {
                    if let Some(pos) = state.items.iter().position(|item| item.id == entry.id) {
                        state.items.remove(pos);
                        state.total = state.total.saturating_sub(1);
                    }
                }
            }
        }
        for (id, payload) in queued {
            if let Some(item) = state.items.iter_mut().find(|item| item.id == id) {
                item.payload = payload;
                item.state = SyncState::LocalPending;
            }
        }
    }

    /// Kick an out-of-band probe so the monitor flag catches up with a
    /// request that just failed.
    fn monitor_recheck(&self) {
        let monitor = Arc::clone(&self.monitor);
        tokio::spawn(async move {
            monitor.check_status().await;
        });
    }
}

impl<P: Payload> Drop for CollectionInner<P> {
    fn drop(&mut self) {
        let subscription = self.subscription.load(Ordering::Acquire);
        if subscription != 0 {
            self.monitor.unsubscribe(subscription);
        }
    }
}
