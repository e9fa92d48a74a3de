// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network monitor: online/offline detection with listener callbacks.
//!
//! Connectivity is judged from two signals: the cheap transport flag the
//! platform reports (the `navigator.onLine` analogue) and an active liveness
//! probe against the backend health endpoint. The transport flag alone is
//! optimistic — a captive portal or dead backend still reads "online" — so
//! [`NetworkMonitor::check_status`] verifies with a real round trip.
//!
//! The monitor is an injectable service passed to each synchronized
//! collection, not a global singleton: subscriptions are explicit and can be
//! dropped, and tests swap in a scripted probe.
//!
//! Listeners fire only on actual transitions; a probe confirming the current
//! status is silent. Probe failure means "offline", it is never surfaced as
//! an error.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Source of raw connectivity signals. Implemented by the host platform;
/// tests use a scripted fake.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Cheap transport-level signal. Optimistic: `true` does not guarantee
    /// the backend is reachable.
    fn transport_online(&self) -> bool {
        true
    }

    /// Active liveness check against the backend (HEAD on the health
    /// endpoint). `false` on any failure.
    async fn probe(&self) -> bool;
}

/// Handle returned by [`NetworkMonitor::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Poller {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Tracks online/offline transitions and notifies subscribers.
pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    /// Last verified status.
    online: AtomicBool,
    /// Epoch millis of the last completed probe (0 = never probed).
    last_probe_ms: AtomicI64,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
    /// Serializes concurrent status checks (prevents thundering herd and
    /// duplicate transition notifications).
    checking: tokio::sync::Mutex<()>,
    poller: Mutex<Option<Poller>>,
}

impl NetworkMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        let initial = probe.transport_online();
        Self {
            probe,
            online: AtomicBool::new(initial),
            last_probe_ms: AtomicI64::new(0),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            checking: tokio::sync::Mutex::new(()),
            poller: Mutex::new(None),
        }
    }

    /// Last verified connectivity status combined with the live transport
    /// flag. Does not perform I/O.
    ///
    /// An observed transport drop is recorded: without this, a transport
    /// cycle that happens entirely between two probes would leave the stored
    /// status at "online" and the recovery would not register as a
    /// transition, so reconnect listeners would never fire.
    #[must_use]
    pub fn is_online(&self) -> bool {
        if !self.probe.transport_online() {
            self.online.store(false, Ordering::Release);
            return false;
        }
        self.online.load(Ordering::Acquire)
    }

    /// Epoch millis of the last completed probe, if any.
    #[must_use]
    pub fn last_probe_at(&self) -> Option<i64> {
        match self.last_probe_ms.load(Ordering::Acquire) {
            0 => None,
            at => Some(at),
        }
    }

    /// Verify connectivity with an active probe. On a transition, all
    /// subscribed listeners are invoked with the new status.
    ///
    /// Concurrent calls are serialized; each caller gets the status as of
    /// its own probe, but only the call that observes the transition
    /// notifies.
    pub async fn check_status(&self) -> bool {
        let _guard = self.checking.lock().await;

        // Transport reporting offline short-circuits the probe.
        let online = if self.probe.transport_online() {
            self.probe.probe().await
        } else {
            false
        };

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        self.last_probe_ms.store(now, Ordering::Release);

        let was = self.online.swap(online, Ordering::AcqRel);
        if was != online {
            if online {
                info!("Network restored, notifying listeners");
            } else {
                warn!("Network lost, notifying listeners");
            }
            self.notify(online);
        } else {
            debug!(online, "Network status unchanged");
        }
        online
    }

    fn notify(&self, online: bool) {
        // Snapshot so listeners may subscribe/unsubscribe from the callback.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(online);
        }
    }

    /// Register a status-change listener. Fires only on transitions.
    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a previously registered listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.write().retain(|(sid, _)| *sid != id);
    }

    /// Start periodic background re-verification. A second call while a
    /// poller is running is ignored.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            warn!("start_polling called while already polling, ignoring");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    // First tick fires immediately: verify on startup.
                    _ = ticker.tick() => {
                        monitor.check_status().await;
                    }
                }
            }
            debug!("Network poller stopped");
        });

        info!(interval_ms = interval.as_millis() as u64, "Network polling started");
        *poller = Some(Poller { handle, shutdown });
    }

    /// Stop the background poller, if running.
    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock().take() {
            let _ = poller.shutdown.send(true);
            poller.handle.abort();
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.handle.abort();
        }
    }
}
