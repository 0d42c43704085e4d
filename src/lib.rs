//! Offline sync engine for a medication-adherence client.
//!
//! Two halves, both built over a narrow [`store::PersistentStore`]:
//!
//! - **Write path**: an [`queue::OfflineQueue`] that persists mutations made
//!   while disconnected and drains them with exponential backoff once the
//!   [`connectivity::ConnectivityMonitor`] reports online. At-least-once
//!   delivery; handlers should be idempotent-friendly.
//! - **Read path**: a [`cache::CollectionCache`] serving previously fetched
//!   collections instantly (stale-while-revalidate) while a background fetch
//!   reconciles the entry.
//!
//! [`status::StatusSurface`] folds both into one pushed snapshot for the UI
//! banner. All services are explicitly constructed and injected; there is no
//! global state.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(SqliteStore::open()?);
//! let monitor = ConnectivityMonitor::new(Some(platform_source));
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(MutationKind::RecordEvent, move |payload| {
//!     let api = api.clone();
//!     async move { api.record_dose_event(payload).await }
//! });
//!
//! let queue = OfflineQueue::new(store.clone(), registry, monitor.clone(), config)?;
//! let _listener = queue.watch_connectivity();
//! let status = StatusSurface::new(&monitor, &queue);
//!
//! queue.enqueue(MutationKind::RecordEvent, json!({ "dose_id": "d1" }))?;
//! ```

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod queue;
pub mod retry;
pub mod status;
pub mod store;

pub use cache::{CacheKey, CollectionCache, DataSource, SwrHandle, SwrState};
pub use config::SyncConfig;
pub use connectivity::{
  AssumeOnlineSource, ConnectivityMonitor, ConnectivitySource, ManualSource, NetworkSnapshot,
};
pub use queue::{
  HandlerRegistry, MutationKind, OfflineQueue, QueueItem, QueueItemStatus, QueueStatus,
};
pub use retry::{with_retry, RetryPolicy};
pub use status::{StatusSurface, SyncStatus};
pub use store::{MemoryStore, PersistentStore, SqliteStore};
