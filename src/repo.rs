//! Typed bulk population and retrieval over the cached-entity collections.
//!
//! The repository is a materialized view of the remote system of record, not a
//! log: writing an existing id overwrites in place, and the cache is only ever
//! refreshed by successful live reads. Store failures are swallowed into empty
//! or default results here; this layer is an optimization, not a guarantee.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::store::{now_millis, EntityRow, StoreBackend, SyncMetadata};

/// Trait for remote entity snapshots that can live in a cache collection.
pub trait CacheRecord: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Natural identifier of the remote record (e.g. student id, invoice id)
  fn entity_id(&self) -> String;

  /// Owning tenant; the mandatory partition key
  fn tenant_id(&self) -> String;

  /// Optional foreign-key index value, where access patterns need one
  /// (e.g. "by-student", "by-section")
  fn secondary_key(&self) -> Option<String> {
    None
  }

  /// Collection name for storage organization (e.g. "students", "invoices")
  fn collection() -> &'static str;
}

/// A cached snapshot plus the time it was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntity<T> {
  pub entity: T,
  /// Epoch millis at population time
  pub cached_at: i64,
}

/// Repository over one store; typed per call. Cheap to clone.
#[derive(Clone)]
pub struct Repository {
  store: Arc<dyn StoreBackend>,
}

impl Repository {
  pub fn new(store: Arc<dyn StoreBackend>) -> Self {
    Self { store }
  }

  /// Bulk-populate a collection from a successful live read. Every item is
  /// stamped with the current time, the batch is one logical write, and the
  /// collection's metadata is overwritten afterwards. Failures are logged and
  /// swallowed.
  pub fn cache<T: CacheRecord>(&self, items: &[T]) {
    let cached_at = now_millis();

    let rows: Vec<EntityRow> = items
      .iter()
      .filter_map(|item| {
        let data = match serde_json::to_vec(item) {
          Ok(data) => data,
          Err(e) => {
            warn!(collection = T::collection(), error = %e, "skipping unserializable entity");
            return None;
          }
        };
        Some(EntityRow {
          entity_id: item.entity_id(),
          tenant_id: item.tenant_id(),
          secondary_key: item.secondary_key(),
          data,
          cached_at,
        })
      })
      .collect();

    if let Err(e) = self.store.put_entities(T::collection(), &rows) {
      warn!(collection = T::collection(), error = %e, "failed to populate cache");
      return;
    }

    let meta = SyncMetadata {
      collection: T::collection().to_string(),
      last_sync_at: cached_at,
      item_count: rows.len() as i64,
    };
    if let Err(e) = self.store.put_metadata(&meta) {
      warn!(collection = T::collection(), error = %e, "failed to update sync metadata");
    }
  }

  /// All cached envelopes for a tenant, optionally narrowed by a secondary
  /// index value. Secondary lookups go through a non-tenant index, so the
  /// result is re-filtered by tenant here; rows from another tenant never
  /// escape. Store failures yield an empty result.
  pub fn get_cached<T: CacheRecord>(
    &self,
    tenant_id: &str,
    secondary: Option<&str>,
  ) -> Vec<CachedEntity<T>> {
    let rows = match secondary {
      Some(key) => self.store.entities_by_secondary(T::collection(), key),
      None => self.store.entities_by_tenant(T::collection(), tenant_id),
    };

    let rows = match rows {
      Ok(rows) => rows,
      Err(e) => {
        warn!(collection = T::collection(), error = %e, "cache read failed");
        return Vec::new();
      }
    };

    rows
      .into_iter()
      .filter(|row| row.tenant_id == tenant_id)
      .filter_map(|row| {
        let entity: T = serde_json::from_slice(&row.data).ok()?;
        Some(CachedEntity {
          entity,
          cached_at: row.cached_at,
        })
      })
      .collect()
  }

  /// Freshness bookkeeping for a collection, if it has ever been populated.
  pub fn metadata(&self, collection: &str) -> Option<SyncMetadata> {
    match self.store.get_metadata(collection) {
      Ok(meta) => meta,
      Err(e) => {
        warn!(collection, error = %e, "metadata read failed");
        None
      }
    }
  }

  /// The explicit clear-all-data operation: drops every cached entity and all
  /// metadata. Pending outbox items are not touched.
  pub fn clear_all(&self) {
    if let Err(e) = self.store.clear_entities() {
      warn!(error = %e, "failed to clear cached data");
    }
  }
}

/// Typed view of one collection, convenient for the data-binding layer.
#[derive(Clone)]
pub struct CollectionHandle<T: CacheRecord> {
  repo: Repository,
  _marker: PhantomData<T>,
}

impl<T: CacheRecord> CollectionHandle<T> {
  pub fn new(repo: Repository) -> Self {
    Self {
      repo,
      _marker: PhantomData,
    }
  }

  pub fn cache(&self, items: &[T]) {
    self.repo.cache(items)
  }

  pub fn get(&self, tenant_id: &str) -> Vec<CachedEntity<T>> {
    self.repo.get_cached(tenant_id, None)
  }

  pub fn get_by(&self, tenant_id: &str, secondary: &str) -> Vec<CachedEntity<T>> {
    self.repo.get_cached(tenant_id, Some(secondary))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{NoopStore, SqliteStore};
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Student {
    id: String,
    tenant: String,
    section: String,
    name: String,
  }

  impl CacheRecord for Student {
    fn entity_id(&self) -> String {
      self.id.clone()
    }

    fn tenant_id(&self) -> String {
      self.tenant.clone()
    }

    fn secondary_key(&self) -> Option<String> {
      Some(self.section.clone())
    }

    fn collection() -> &'static str {
      "students"
    }
  }

  fn student(id: &str, tenant: &str, section: &str, name: &str) -> Student {
    Student {
      id: id.into(),
      tenant: tenant.into(),
      section: section.into(),
      name: name.into(),
    }
  }

  fn repo() -> Repository {
    Repository::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
  }

  #[test]
  fn caching_same_id_twice_keeps_one_envelope_with_latest_fields() {
    let repo = repo();

    repo.cache(&[student("s1", "t1", "7b", "Ada")]);
    repo.cache(&[student("s1", "t1", "7b", "Ada Lovelace")]);

    let cached = repo.get_cached::<Student>("t1", None);
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].entity.name, "Ada Lovelace");
  }

  #[test]
  fn tenant_partitioning_holds_even_on_secondary_index() {
    let repo = repo();

    let mut batch: Vec<Student> = (0..10)
      .map(|i| student(&format!("sx{}", i), "tenant-x", "7b", "X"))
      .collect();
    batch.push(student("sy1", "tenant-y", "7b", "Y"));
    repo.cache(&batch);

    // Same section, different tenants: the secondary index is shared, the
    // result must not be.
    let for_y = repo.get_cached::<Student>("tenant-y", Some("7b"));
    assert_eq!(for_y.len(), 1);
    assert_eq!(for_y[0].entity.id, "sy1");

    let for_z = repo.get_cached::<Student>("tenant-z", Some("7b"));
    assert!(for_z.is_empty());
  }

  #[test]
  fn metadata_is_overwritten_on_each_population() {
    let repo = repo();

    repo.cache(&[
      student("s1", "t1", "7a", "A"),
      student("s2", "t1", "7a", "B"),
    ]);
    let first = repo.metadata("students").unwrap();
    assert_eq!(first.item_count, 2);

    repo.cache(&[student("s3", "t1", "7a", "C")]);
    let second = repo.metadata("students").unwrap();
    assert_eq!(second.item_count, 1);
    assert!(second.last_sync_at >= first.last_sync_at);
  }

  #[test]
  fn clear_all_drops_entities_and_metadata() {
    let repo = repo();
    repo.cache(&[student("s1", "t1", "7a", "A")]);

    repo.clear_all();

    assert!(repo.get_cached::<Student>("t1", None).is_empty());
    assert!(repo.metadata("students").is_none());
  }

  #[test]
  fn unavailable_store_degrades_to_empty_reads() {
    let repo = Repository::new(Arc::new(NoopStore));
    repo.cache(&[student("s1", "t1", "7a", "A")]);
    assert!(repo.get_cached::<Student>("t1", None).is_empty());
    assert!(repo.metadata("students").is_none());
  }

  #[test]
  fn collection_handle_narrows_by_secondary_key() {
    let repo = repo();
    let students = CollectionHandle::<Student>::new(repo);

    students.cache(&[
      student("s1", "t1", "7a", "A"),
      student("s2", "t1", "7b", "B"),
    ]);

    let in_7b = students.get_by("t1", "7b");
    assert_eq!(in_7b.len(), 1);
    assert_eq!(in_7b[0].entity.id, "s2");
    assert_eq!(students.get("t1").len(), 2);
  }
}
