// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the storefront sync engine.
//!
//! # Example
//!
//! ```
//! use storefront_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.debounce_ms, 800);
//!
//! // Full config
//! let config = SyncConfig {
//!     debounce_ms: 500,
//!     probe_interval_secs: 15,
//!     page_limit: 20,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Configuration for a synchronized collection.
///
/// All fields have sensible defaults matching the production storefront.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Debounce delay for write coalescing in milliseconds (default: 800)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Background connectivity probe interval in seconds (default: 30)
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Backoff between automatic replay attempts after a failed cycle:
    /// base delay, doubled per consecutive failure up to the cap
    #[serde(default = "default_replay_backoff_base_secs")]
    pub replay_backoff_base_secs: u64,
    #[serde(default = "default_replay_backoff_cap_secs")]
    pub replay_backoff_cap_secs: u64,

    /// Page size for authoritative collection listings (default: 10)
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Expiry on persisted collection snapshots (default: 7 days)
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    /// Prefix for all durable-store keys written by this engine
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,
}

fn default_debounce_ms() -> u64 { 800 }
fn default_probe_interval_secs() -> u64 { 30 }
fn default_replay_backoff_base_secs() -> u64 { 5 }
fn default_replay_backoff_cap_secs() -> u64 { 300 } // 5 min
fn default_page_limit() -> u32 { 10 }
fn default_snapshot_ttl_secs() -> u64 { 7 * 24 * 3600 } // 7 days
fn default_storage_prefix() -> String { "sync".into() }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            replay_backoff_base_secs: default_replay_backoff_base_secs(),
            replay_backoff_cap_secs: default_replay_backoff_cap_secs(),
            page_limit: default_page_limit(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            storage_prefix: default_storage_prefix(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    #[must_use]
    pub fn replay_backoff_base(&self) -> Duration {
        Duration::from_secs(self.replay_backoff_base_secs)
    }

    #[must_use]
    pub fn replay_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.replay_backoff_cap_secs)
    }

    #[must_use]
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}
