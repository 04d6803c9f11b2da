//! Durable multi-collection local store with versioned, additive schema.
//!
//! The store is a best-effort accelerator, not the record of truth: when the
//! backing database cannot be opened at all, [`open_or_noop`] degrades to a
//! [`NoopStore`] whose reads are empty and whose writes are discarded, and the
//! rest of the engine keeps running against the remote service alone.

mod schema;
mod sqlite;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use color_eyre::Result;
use tracing::warn;

use crate::outbox::OutboxItem;

/// Current time as epoch millis, the timestamp unit used throughout the store.
pub(crate) fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// One serialized entity as persisted in a cache collection.
#[derive(Debug, Clone)]
pub struct EntityRow {
  /// Natural identifier of the remote record
  pub entity_id: String,
  /// Mandatory partition key; tenant-scoped queries go through this
  pub tenant_id: String,
  /// Optional foreign-key index value (e.g. student id, section id)
  pub secondary_key: Option<String>,
  /// Serialized entity snapshot
  pub data: Vec<u8>,
  /// When the snapshot was cached (epoch millis)
  pub cached_at: i64,
}

/// Freshness bookkeeping for one collection, overwritten on every bulk
/// population. Diagnostic only; correctness never depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetadata {
  pub collection: String,
  pub last_sync_at: i64,
  pub item_count: i64,
}

/// Trait for local store backends.
///
/// All operations are collection-level and independently atomic; the engine
/// never needs cross-collection transactions because the outbox and the entity
/// cache are deliberately decoupled.
pub trait StoreBackend: Send + Sync {
  /// Upsert a batch of entities into a collection as one logical write.
  fn put_entities(&self, collection: &str, rows: &[EntityRow]) -> Result<()>;

  /// All entities in a collection for one tenant, via the tenant index.
  fn entities_by_tenant(&self, collection: &str, tenant_id: &str) -> Result<Vec<EntityRow>>;

  /// All entities in a collection matching a secondary index value. The rows
  /// still carry their tenant id; callers must filter by tenant themselves.
  fn entities_by_secondary(&self, collection: &str, secondary_key: &str) -> Result<Vec<EntityRow>>;

  /// Drop every cached entity and all sync metadata. The outbox is untouched.
  fn clear_entities(&self) -> Result<()>;

  /// Insert a freshly enqueued outbox item.
  fn insert_outbox(&self, item: &OutboxItem) -> Result<()>;

  /// All outbox items with `synced = false`, in unspecified order.
  fn pending_outbox(&self) -> Result<Vec<OutboxItem>>;

  /// Every outbox item, synced or not.
  fn all_outbox(&self) -> Result<Vec<OutboxItem>>;

  /// Set `synced = true` for an item and record the confirmation time.
  /// Returns false if the id is unknown. Marking an already-synced item again
  /// is a no-op.
  fn mark_outbox_synced(&self, id: &str) -> Result<bool>;

  /// Increment an item's retry count and record the latest error message.
  /// Returns false if the id is unknown.
  fn bump_outbox_retry(&self, id: &str, error: Option<&str>) -> Result<bool>;

  /// Zero an unsynced item's retry count and clear its error, putting it back
  /// in the retry budget. Returns false if the id is unknown or already synced.
  fn reset_outbox_retry(&self, id: &str) -> Result<bool>;

  /// Delete synced items whose confirmation time is older than the cutoff.
  /// Returns the number of rows removed.
  fn delete_synced_outbox_before(&self, cutoff_millis: i64) -> Result<usize>;

  /// Overwrite the metadata row for a collection.
  fn put_metadata(&self, meta: &SyncMetadata) -> Result<()>;

  /// Metadata for a collection, if it has ever been populated.
  fn get_metadata(&self, collection: &str) -> Result<Option<SyncMetadata>>;
}

/// Store used when persistent storage is unavailable (quota exhaustion,
/// restricted environments). Reads are empty, writes are discarded.
pub struct NoopStore;

impl StoreBackend for NoopStore {
  fn put_entities(&self, _collection: &str, _rows: &[EntityRow]) -> Result<()> {
    Ok(())
  }

  fn entities_by_tenant(&self, _collection: &str, _tenant_id: &str) -> Result<Vec<EntityRow>> {
    Ok(Vec::new())
  }

  fn entities_by_secondary(
    &self,
    _collection: &str,
    _secondary_key: &str,
  ) -> Result<Vec<EntityRow>> {
    Ok(Vec::new())
  }

  fn clear_entities(&self) -> Result<()> {
    Ok(())
  }

  fn insert_outbox(&self, _item: &OutboxItem) -> Result<()> {
    Ok(())
  }

  fn pending_outbox(&self) -> Result<Vec<OutboxItem>> {
    Ok(Vec::new())
  }

  fn all_outbox(&self) -> Result<Vec<OutboxItem>> {
    Ok(Vec::new())
  }

  fn mark_outbox_synced(&self, _id: &str) -> Result<bool> {
    Ok(false)
  }

  fn bump_outbox_retry(&self, _id: &str, _error: Option<&str>) -> Result<bool> {
    Ok(false)
  }

  fn reset_outbox_retry(&self, _id: &str) -> Result<bool> {
    Ok(false)
  }

  fn delete_synced_outbox_before(&self, _cutoff_millis: i64) -> Result<usize> {
    Ok(0)
  }

  fn put_metadata(&self, _meta: &SyncMetadata) -> Result<()> {
    Ok(())
  }

  fn get_metadata(&self, _collection: &str) -> Result<Option<SyncMetadata>> {
    Ok(None)
  }
}

/// Open the store at the given path, degrading to [`NoopStore`] if the backend
/// cannot be opened. Open failure is a warning, never a hard error.
pub fn open_or_noop(path: &Path) -> Arc<dyn StoreBackend> {
  match SqliteStore::open(path) {
    Ok(store) => Arc::new(store),
    Err(e) => {
      warn!(
        path = %path.display(),
        error = %e,
        "local store unavailable, running without persistence"
      );
      Arc::new(NoopStore)
    }
  }
}
