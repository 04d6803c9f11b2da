//! Offline-first synchronization engine for the EduDesk dashboard.
//!
//! The dashboard keeps working, and keeps accepting writes, while the network
//! is unavailable; this crate is the part that makes that true. Reads go
//! through a read-through accessor that falls back to a durable local cache;
//! writes are queued in a durable outbox and drained against the remote system
//! of record once connectivity returns. Last local write wins, and the server
//! is the source of truth on the next successful read. Delivery to the remote
//! service is at-least-once; idempotency is the caller's concern where needed.
//!
//! Component layering, leaf first:
//!
//! - [`store`] - versioned multi-collection SQLite store, durable across
//!   restarts, degrading to no-op persistence when unavailable
//! - [`connectivity`] - observable online/offline flag
//! - [`repo`] - typed cached-entity collections, partitioned by tenant
//! - [`outbox`] - durable queue of pending write intents
//! - [`sync`] - the drainer: single-flight cycles, per-item retry accounting
//! - [`read_through`] - live-first read policy with cache fallback
//! - [`query`] - bindable fetch state machine for UI consumers
//! - [`engine`] - composition root wiring the above around one store handle

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod outbox;
pub mod query;
pub mod read_through;
pub mod repo;
pub mod store;
pub mod sync;

pub use config::EngineConfig;
pub use connectivity::ConnectivityMonitor;
pub use engine::{OfflineEngine, SyncTrigger};
pub use outbox::{Mutation, MutationKind, Outbox, OutboxItem, OutboxStats, Priority, RETRY_LIMIT};
pub use query::{DataQuery, QueryState};
pub use read_through::{ReadOutcome, ReadSource, ReadThrough};
pub use repo::{CacheRecord, CachedEntity, CollectionHandle, Repository};
pub use store::{NoopStore, SqliteStore, StoreBackend, SyncMetadata};
pub use sync::{DrainOutcome, DrainProgress, DrainState, RemoteService, SyncScheduler};

/// Route engine tracing through the test writer. Safe to call from every test;
/// only the first call installs the subscriber.
#[cfg(test)]
pub(crate) fn init_test_logging() {
  use tracing_subscriber::EnvFilter;

  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
