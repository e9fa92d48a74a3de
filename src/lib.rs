//! # Storefront Sync
//!
//! An offline-tolerant synchronization engine for client-side storefront
//! collections (cart, favorites).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SyncedCollection (orchestrator)             │
//! │  • Optimistic mutations, rollback on rejection             │
//! │  • Reactive snapshots via tokio::sync::watch               │
//! │  • Pre-checkout synchronization gate                       │
//! └─────────────────────────────────────────────────────────────┘
//!        │                  │                      │
//!        ▼                  ▼                      ▼
//! ┌──────────────┐  ┌────────────────┐  ┌───────────────────┐
//! │ MutationQueue│  │ OfflineChangeset│ │  NetworkMonitor   │
//! │ • 800 ms     │  │ • Durable journal│ │ • Transport flag  │
//! │   debounce   │  │ • Coalescing    │ │   + live probe    │
//! │ • Last value │  │ • Single-flight │ │ • Transition-only │
//! │   per id wins│  │   replay        │ │   notifications   │
//! └──────────────┘  └────────────────┘  └───────────────────┘
//!        │                  │
//!        ▼                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │     RemoteCollection (injected REST client)                 │
//! │     DurableStore (injected persistence substrate)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_sync::{
//!     CartCollection, CartLine, ConnectivityProbe, MemoryStore, NetworkMonitor,
//!     RemoteCollection, SyncConfig,
//! };
//!
//! # async fn run(
//! #     api: Arc<dyn RemoteCollection<CartLine>>,
//! #     probe: Arc<dyn ConnectivityProbe>,
//! # ) {
//! let monitor = Arc::new(NetworkMonitor::new(probe));
//! monitor.start_polling(SyncConfig::default().probe_interval());
//!
//! let cart = CartCollection::new(
//!     "cart",
//!     api,
//!     Arc::new(MemoryStore::new()),
//!     Arc::clone(&monitor),
//!     SyncConfig::default(),
//! )
//! .await;
//!
//! cart.load_authoritative(1).await;
//!
//! // Optimistic: the item is visible before the server confirms it
//! cart.add(CartLine { product_id: 9, sku_id: 90, quantity: 1 })
//!     .await
//!     .unwrap();
//!
//! // Hard gate before checkout
//! let report = cart.sync_before_checkout().await;
//! if report.ready {
//!     // proceed to payment
//! }
//! # }
//! ```
//!
//! ## Key policies
//!
//! - **Mutations never feel broken**: every add/update succeeds instantly
//!   from the user's point of view; connectivity failures degrade to
//!   offline-pending state reconciled in the background.
//! - **Removals roll back on rejection**: deletion is the one operation that
//!   restores the item instead of queueing when the server declines.
//! - **Nothing is lost**: offline mutations are journaled durably before the
//!   accepting call returns and survive a full process restart.
//! - **Checkout is gated**: the one place correctness beats responsiveness.
//!
//! ## Modules
//!
//! - [`collection`]: The [`SyncedCollection`] orchestrator
//! - [`queue`]: Debounced write coalescing
//! - [`changeset`]: Durable offline journal with single-flight replay
//! - [`network`]: Connectivity monitoring and probing
//! - [`storage`]: Persistence substrate traits
//! - [`remote`]: The consumed REST contract
//! - [`cart`] / [`favorites`]: Storefront domain payloads

pub mod cart;
pub mod changeset;
pub mod collection;
pub mod config;
pub mod favorites;
pub mod item;
pub mod network;
pub mod queue;
pub mod remote;
pub mod storage;

pub use cart::{CartCollection, CartLine};
pub use changeset::{ChangeAction, ChangeEntry, OfflineChangeset, ReplayReport};
pub use collection::{
    CheckoutReport, CollectionSnapshot, RemoveOutcome, SyncError, SyncStatus, SyncedCollection,
};
pub use config::SyncConfig;
pub use favorites::{FavoriteCollection, FavoriteEntry};
pub use item::{CollectionItem, ItemId, Payload, SyncState};
pub use network::{ConnectivityProbe, NetworkMonitor, SubscriptionId};
pub use queue::{MutationQueue, UpdateSink};
pub use remote::{Page, RemoteCollection, RemoteError};
pub use storage::{DurableStore, MemoryStore, StorageError};
