// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline changeset: durable journal of unsynchronized mutations.
//!
//! When a mutation cannot reach the server, it is recorded here and the
//! journal is persisted through the [`DurableStore`] before the recording
//! call returns. A crash or page refresh after that point loses nothing:
//! the changeset is reloaded at construction and replayed when connectivity
//! returns.
//!
//! Recording coalesces: an update replaces a prior un-replayed update for
//! the same id, an update to an unconfirmed offline create folds into the
//! pending add, and removing an item that only ever existed locally cancels
//! the whole thing — the server never hears about it.
//!
//! Replay is single-flight (an atomic flag with an RAII guard) and processes
//! entries in enqueue order, except that removes of server-confirmed ids are
//! compacted into one batch delete. Connectivity failures retain their
//! entries for the next cycle; server rejections drop theirs — retrying a
//! rejected business rule never succeeds.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::item::{ItemId, Payload};
use crate::remote::RemoteCollection;
use crate::storage::{self, DurableStore, StorageError};

/// What an offline mutation wants done once the server is reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeAction<P> {
    Add { payload: P },
    Update { payload: P },
    Remove,
}

impl<P> ChangeAction<P> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Remove => "remove",
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry<P> {
    pub id: ItemId,
    pub action: ChangeAction<P>,
    /// Epoch millis at enqueue time.
    pub enqueued_at: i64,
}

impl<P> ChangeEntry<P> {
    fn new(id: ItemId, action: ChangeAction<P>) -> Self {
        Self {
            id,
            action,
            enqueued_at: now_ms(),
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Outcome of one replay cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// False when the cycle was skipped (already in flight, or deferred by
    /// backoff).
    pub attempted: bool,
    pub succeeded: usize,
    /// Connectivity failures; their entries remain journaled.
    pub failed: usize,
    /// Ids whose entries the server rejected; those entries were dropped.
    pub rejected: Vec<ItemId>,
    /// Local ids confirmed by the server during this cycle, with the
    /// canonical identity each now carries.
    pub remapped: Vec<(ItemId, ItemId)>,
}

impl ReplayReport {
    fn skipped() -> Self {
        Self::default()
    }

    /// Everything journaled at the start of the cycle made it to the server.
    #[must_use]
    pub fn clean(&self) -> bool {
        self.attempted && self.failed == 0
    }
}

/// Exponential delay between automatic replay attempts.
///
/// Explicit replays (the pre-checkout gate) bypass it; only background
/// reconnect-triggered cycles are throttled.
pub struct ReplayBackoff {
    base: Duration,
    cap: Duration,
    failures: u32,
    next_attempt_at: Option<tokio::time::Instant>,
}

impl ReplayBackoff {
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: 0,
            next_attempt_at: None,
        }
    }

    fn ready(&self) -> bool {
        self.next_attempt_at
            .map_or(true, |at| tokio::time::Instant::now() >= at)
    }

    fn register_failure(&mut self) {
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(self.failures.min(16)))
            .min(self.cap);
        self.failures += 1;
        self.next_attempt_at = Some(tokio::time::Instant::now() + delay);
        debug!(
            failures = self.failures,
            delay_ms = delay.as_millis() as u64,
            "Replay backoff armed"
        );
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.next_attempt_at = None;
    }
}

/// Clears the in-flight flag when a replay cycle ends, however it ends.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable, coalescing journal of mutations awaiting connectivity.
pub struct OfflineChangeset<P: Payload> {
    store: Arc<dyn DurableStore>,
    key: String,
    entries: Mutex<Vec<ChangeEntry<P>>>,
    replaying: AtomicBool,
    backoff: Mutex<ReplayBackoff>,
}

impl<P: Payload> OfflineChangeset<P> {
    /// Construct, restoring any journal a previous session persisted under
    /// `key`. A storage read failure starts empty rather than failing: a
    /// broken store must not block the UI.
    pub async fn load(
        store: Arc<dyn DurableStore>,
        key: String,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> Self {
        let entries: Vec<ChangeEntry<P>> =
            match storage::get_json::<Vec<ChangeEntry<P>>>(store.as_ref(), &key).await {
                Ok(Some(persisted)) => {
                    info!(key, count = persisted.len(), "Restored offline changeset");
                    persisted
                }
                Ok(None) => Vec::new(),
                Err(error) => {
                    warn!(key, %error, "Could not restore offline changeset, starting empty");
                    Vec::new()
                }
            };
        Self {
            store,
            key,
            entries: Mutex::new(entries),
            replaying: AtomicBool::new(false),
            backoff: Mutex::new(ReplayBackoff::new(backoff_base, backoff_cap)),
        }
    }

    /// Journal a mutation and persist before returning.
    pub async fn record(&self, id: ItemId, action: ChangeAction<P>) -> Result<(), StorageError> {
        debug!(%id, kind = action.kind(), "Recording offline change");
        {
            let mut entries = self.entries.lock();
            Self::coalesce(&mut entries, id, action);
        }
        self.persist().await
    }

    fn coalesce(entries: &mut Vec<ChangeEntry<P>>, id: ItemId, action: ChangeAction<P>) {
        match action {
            // The item only ever existed on this device; cancel everything.
            ChangeAction::Remove if id.is_local() => {
                debug!(%id, "Remove cancels pending offline create");
                entries.retain(|e| e.id != id);
            }
            // Updates that will be deleted anyway are dead weight.
            ChangeAction::Remove => {
                entries.retain(|e| {
                    !(e.id == id && matches!(e.action, ChangeAction::Update { .. }))
                });
                entries.push(ChangeEntry::new(id, ChangeAction::Remove));
            }
            ChangeAction::Update { payload } => {
                let slot = entries
                    .iter_mut()
                    .find(|e| e.id == id && !matches!(e.action, ChangeAction::Remove));
                match slot {
                    Some(entry) => match &mut entry.action {
                        ChangeAction::Add { payload: p } | ChangeAction::Update { payload: p } => {
                            *p = payload;
                        }
                        ChangeAction::Remove => {}
                    },
                    None => entries.push(ChangeEntry::new(id, ChangeAction::Update { payload })),
                }
            }
            add @ ChangeAction::Add { .. } => entries.push(ChangeEntry::new(id, add)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    /// Current journal contents, oldest first. Used to re-overlay pending
    /// mutations after an authoritative reload.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChangeEntry<P>> {
        self.entries.lock().clone()
    }

    /// True while a replay cycle is running.
    #[must_use]
    pub fn replay_in_flight(&self) -> bool {
        self.replaying.load(Ordering::Acquire)
    }

    /// Drop a journaled update for `id` because a newer value for the same
    /// item is taking the online path. Replaying the journaled one after
    /// that would push a stale value over the fresh one.
    ///
    /// Returns whether an entry was dropped. Pending creates are left
    /// alone: the item does not exist on the server yet, so the online
    /// path cannot supersede them.
    pub async fn supersede_update(&self, id: ItemId) -> Result<bool, StorageError> {
        let dropped = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| !(e.id == id && matches!(e.action, ChangeAction::Update { .. })));
            entries.len() != before
        };
        if dropped {
            debug!(%id, "Journaled update superseded by newer online write");
            self.persist().await?;
        }
        Ok(dropped)
    }

    /// Rewrite entries referencing `old` to `new`. Used when a create
    /// confirms outside the replay path while follow-up mutations for the
    /// local id are still journaled. The next persist picks up the rewrite.
    pub fn renumber(&self, old: ItemId, new: ItemId) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if entry.id == old {
                entry.id = new;
            }
        }
    }

    /// Drop the journal in memory and in the store (session reset).
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().clear();
        self.backoff.lock().reset();
        self.store.remove(&self.key).await
    }

    /// Push the journal to the server.
    ///
    /// At most one cycle runs at a time; a call while one is in flight
    /// returns with `attempted == false`. Automatic cycles (`force ==
    /// false`) honor the failure backoff; the pre-checkout gate forces
    /// through it.
    pub async fn replay(&self, remote: &dyn RemoteCollection<P>, force: bool) -> ReplayReport {
        if !force && !self.backoff.lock().ready() {
            debug!("Replay deferred by backoff");
            return ReplayReport::skipped();
        }
        if self
            .replaying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Replay already in flight, skipping");
            return ReplayReport::skipped();
        }
        let _guard = ReplayGuard(&self.replaying);

        let batch: Vec<ChangeEntry<P>> = std::mem::take(&mut *self.entries.lock());
        let mut report = ReplayReport {
            attempted: true,
            ..ReplayReport::default()
        };
        if batch.is_empty() {
            return report;
        }
        info!(count = batch.len(), "Replaying offline changeset");

        let mut retained: Vec<ChangeEntry<P>> = Vec::new();
        let mut remap: HashMap<ItemId, ItemId> = HashMap::new();
        let mut rejected_creates: HashSet<ItemId> = HashSet::new();
        let mut removes: Vec<(u64, ChangeEntry<P>)> = Vec::new();

        for mut entry in batch {
            // A create confirmed earlier in this cycle renumbers everything
            // that still referenced its local id.
            if let Some(confirmed) = remap.get(&entry.id) {
                entry.id = *confirmed;
            }
            // Follow-ups to a rejected create can never succeed.
            if rejected_creates.contains(&entry.id) {
                report.rejected.push(entry.id);
                continue;
            }

            match &entry.action {
                ChangeAction::Add { payload } => match remote.create(payload).await {
                    Ok((server_id, _)) => {
                        let confirmed = ItemId::Remote(server_id);
                        debug!(local = %entry.id, %confirmed, "Offline create confirmed");
                        remap.insert(entry.id, confirmed);
                        report.remapped.push((entry.id, confirmed));
                        report.succeeded += 1;
                    }
                    Err(error) if error.is_connectivity() => {
                        report.failed += 1;
                        retained.push(entry);
                    }
                    Err(error) => {
                        warn!(id = %entry.id, %error, "Offline create rejected, dropping");
                        rejected_creates.insert(entry.id);
                        report.rejected.push(entry.id);
                    }
                },
                ChangeAction::Update { payload } => match entry.id.remote() {
                    Some(server_id) => match remote.update(server_id, payload).await {
                        Ok(_) => report.succeeded += 1,
                        Err(error) if error.is_connectivity() => {
                            report.failed += 1;
                            retained.push(entry);
                        }
                        Err(error) => {
                            warn!(id = %entry.id, %error, "Offline update rejected, dropping");
                            report.rejected.push(entry.id);
                        }
                    },
                    // Its create has not confirmed yet; try again next cycle.
                    None => {
                        report.failed += 1;
                        retained.push(entry);
                    }
                },
                ChangeAction::Remove => match entry.id.remote() {
                    Some(server_id) => removes.push((server_id, entry)),
                    // Coalescing cancels local-id removes at record time.
                    None => debug!(id = %entry.id, "Dropping remove for unconfirmed id"),
                },
            }
        }

        if !removes.is_empty() {
            let ids: Vec<u64> = removes.iter().map(|(server_id, _)| *server_id).collect();
            let result = if ids.len() == 1 {
                remote.delete(ids[0]).await
            } else {
                remote.batch_delete(&ids).await
            };
            match result {
                Ok(()) => report.succeeded += removes.len(),
                Err(error) if error.is_connectivity() => {
                    report.failed += removes.len();
                    retained.extend(removes.into_iter().map(|(_, entry)| entry));
                }
                Err(error) => {
                    warn!(count = removes.len(), %error, "Offline removes rejected, dropping");
                    report.rejected.extend(removes.iter().map(|(_, entry)| entry.id));
                }
            }
        }

        // Merge failures back ahead of anything recorded mid-cycle, and
        // renumber those newer entries too.
        {
            let mut entries = self.entries.lock();
            for entry in entries.iter_mut() {
                if let Some(confirmed) = remap.get(&entry.id) {
                    entry.id = *confirmed;
                }
            }
            let newer = std::mem::take(&mut *entries);
            *entries = retained;
            entries.extend(newer);
        }
        if let Err(error) = self.persist().await {
            warn!(%error, "Could not persist changeset after replay");
        }

        {
            let mut backoff = self.backoff.lock();
            if report.failed == 0 {
                backoff.reset();
            } else {
                backoff.register_failure();
            }
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            rejected = report.rejected.len(),
            "Replay cycle finished"
        );
        report
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let snapshot = self.entries.lock().clone();
        if snapshot.is_empty() {
            self.store.remove(&self.key).await
        } else {
            storage::put_json(self.store.as_ref(), &self.key, &snapshot, None).await
        }
    }
}
