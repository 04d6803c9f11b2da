//! SQLite implementation of the store backend.

use std::path::Path;
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};

use super::schema::{MIGRATIONS, SCHEMA_VERSION};
use super::{now_millis, EntityRow, StoreBackend, SyncMetadata};
use crate::outbox::{Mutation, OutboxItem, Priority};

/// SQLite-backed durable store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the database at the given path and bring its schema up to
  /// the current version.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Apply any migrations newer than the recorded schema version.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
      )
      .map_err(|e| eyre!("Failed to create schema_version table: {}", e))?;

    let current: i64 = conn
      .query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    if current > SCHEMA_VERSION {
      return Err(eyre!(
        "Store schema version {} is newer than supported version {}",
        current,
        SCHEMA_VERSION
      ));
    }

    for (idx, batch) in MIGRATIONS.iter().enumerate() {
      let version = idx as i64 + 1;
      if version <= current {
        continue;
      }

      conn
        .execute_batch(batch)
        .map_err(|e| eyre!("Failed to apply migration {}: {}", version, e))?;
      conn
        .execute(
          "INSERT INTO schema_version (version) VALUES (?)",
          params![version],
        )
        .map_err(|e| eyre!("Failed to record migration {}: {}", version, e))?;
    }

    Ok(())
  }

  /// Recorded schema version, for diagnostics.
  pub fn schema_version(&self) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read schema version: {}", e))
  }
}

/// Raw outbox columns before the payload is deserialized.
struct OutboxRow {
  id: String,
  priority: i64,
  payload: Vec<u8>,
  timestamp: i64,
  synced: i64,
  synced_at: Option<i64>,
  retry_count: i64,
  error: Option<String>,
}

fn map_outbox_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxRow> {
  Ok(OutboxRow {
    id: row.get(0)?,
    priority: row.get(1)?,
    payload: row.get(2)?,
    timestamp: row.get(3)?,
    synced: row.get(4)?,
    synced_at: row.get(5)?,
    retry_count: row.get(6)?,
    error: row.get(7)?,
  })
}

const OUTBOX_COLUMNS: &str =
  "id, priority, payload, timestamp, synced, synced_at, retry_count, error";

impl SqliteStore {
  fn select_outbox(&self, where_clause: &str) -> Result<Vec<OutboxItem>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!("SELECT {} FROM outbox {}", OUTBOX_COLUMNS, where_clause);
    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

    let items = stmt
      .query_map([], map_outbox_row)
      .map_err(|e| eyre!("Failed to query outbox: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|row| {
        let mutation: Mutation = serde_json::from_slice(&row.payload).ok()?;
        Some(OutboxItem {
          id: row.id,
          mutation,
          priority: Priority::from_rank(row.priority),
          timestamp: row.timestamp,
          synced: row.synced != 0,
          synced_at: row.synced_at,
          retry_count: row.retry_count as u32,
          error: row.error,
        })
      })
      .collect();

    Ok(items)
  }
}

impl StoreBackend for SqliteStore {
  fn put_entities(&self, collection: &str, rows: &[EntityRow]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for row in rows {
      tx_insert_entity(&tx, collection, row)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit entity batch: {}", e))?;

    Ok(())
  }

  fn entities_by_tenant(&self, collection: &str, tenant_id: &str) -> Result<Vec<EntityRow>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT entity_id, tenant_id, secondary_key, data, cached_at FROM entity_cache
         WHERE collection = ? AND tenant_id = ?",
      )
      .map_err(|e| eyre!("Failed to prepare tenant query: {}", e))?;

    let rows = stmt
      .query_map(params![collection, tenant_id], map_entity_row)
      .map_err(|e| eyre!("Failed to query entities by tenant: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(rows)
  }

  fn entities_by_secondary(&self, collection: &str, secondary_key: &str) -> Result<Vec<EntityRow>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT entity_id, tenant_id, secondary_key, data, cached_at FROM entity_cache
         WHERE collection = ? AND secondary_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare secondary-key query: {}", e))?;

    let rows = stmt
      .query_map(params![collection, secondary_key], map_entity_row)
      .map_err(|e| eyre!("Failed to query entities by secondary key: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(rows)
  }

  fn clear_entities(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM entity_cache", [])
      .map_err(|e| eyre!("Failed to clear entity cache: {}", e))?;
    conn
      .execute("DELETE FROM sync_metadata", [])
      .map_err(|e| eyre!("Failed to clear sync metadata: {}", e))?;

    Ok(())
  }

  fn insert_outbox(&self, item: &OutboxItem) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let payload = serde_json::to_vec(&item.mutation)
      .map_err(|e| eyre!("Failed to serialize mutation: {}", e))?;

    conn
      .execute(
        "INSERT INTO outbox
           (id, kind, priority, payload, timestamp, synced, synced_at, retry_count, error)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          item.id,
          item.mutation.kind().as_str(),
          item.priority.rank(),
          payload,
          item.timestamp,
          item.synced as i64,
          item.synced_at,
          item.retry_count as i64,
          item.error,
        ],
      )
      .map_err(|e| eyre!("Failed to insert outbox item: {}", e))?;

    Ok(())
  }

  fn pending_outbox(&self) -> Result<Vec<OutboxItem>> {
    self.select_outbox("WHERE synced = 0")
  }

  fn all_outbox(&self) -> Result<Vec<OutboxItem>> {
    self.select_outbox("")
  }

  fn mark_outbox_synced(&self, id: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Idempotent: an already-synced row matches zero rows and stays untouched,
    // so its recorded confirmation time never moves.
    let changed = conn
      .execute(
        "UPDATE outbox SET synced = 1, synced_at = ?, error = NULL WHERE id = ? AND synced = 0",
        params![now_millis(), id],
      )
      .map_err(|e| eyre!("Failed to mark outbox item synced: {}", e))?;

    Ok(changed > 0)
  }

  fn bump_outbox_retry(&self, id: &str, error: Option<&str>) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let changed = conn
      .execute(
        "UPDATE outbox SET retry_count = retry_count + 1, error = ? WHERE id = ? AND synced = 0",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to record outbox retry: {}", e))?;

    Ok(changed > 0)
  }

  fn reset_outbox_retry(&self, id: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let changed = conn
      .execute(
        "UPDATE outbox SET retry_count = 0, error = NULL WHERE id = ? AND synced = 0",
        params![id],
      )
      .map_err(|e| eyre!("Failed to reset outbox retries: {}", e))?;

    Ok(changed > 0)
  }

  fn delete_synced_outbox_before(&self, cutoff_millis: i64) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Rows synced before the column existed have no confirmation time; their
    // creation time stands in for it.
    let deleted = conn
      .execute(
        "DELETE FROM outbox WHERE synced = 1 AND COALESCE(synced_at, timestamp) < ?",
        params![cutoff_millis],
      )
      .map_err(|e| eyre!("Failed to garbage-collect outbox: {}", e))?;

    Ok(deleted)
  }

  fn put_metadata(&self, meta: &SyncMetadata) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO sync_metadata (collection, last_sync_at, item_count)
         VALUES (?, ?, ?)",
        params![meta.collection, meta.last_sync_at, meta.item_count],
      )
      .map_err(|e| eyre!("Failed to update sync metadata: {}", e))?;

    Ok(())
  }

  fn get_metadata(&self, collection: &str) -> Result<Option<SyncMetadata>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT last_sync_at, item_count FROM sync_metadata WHERE collection = ?")
      .map_err(|e| eyre!("Failed to prepare metadata query: {}", e))?;

    let result = stmt
      .query_row(params![collection], |row| {
        Ok(SyncMetadata {
          collection: collection.to_string(),
          last_sync_at: row.get(0)?,
          item_count: row.get(1)?,
        })
      })
      .ok();

    Ok(result)
  }
}

fn map_entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
  Ok(EntityRow {
    entity_id: row.get(0)?,
    tenant_id: row.get(1)?,
    secondary_key: row.get(2)?,
    data: row.get(3)?,
    cached_at: row.get(4)?,
  })
}

fn tx_insert_entity(
  tx: &rusqlite::Transaction<'_>,
  collection: &str,
  row: &EntityRow,
) -> Result<()> {
  tx.execute(
    "INSERT OR REPLACE INTO entity_cache
       (collection, entity_id, tenant_id, secondary_key, data, cached_at)
     VALUES (?, ?, ?, ?, ?, ?)",
    params![
      collection,
      row.entity_id,
      row.tenant_id,
      row.secondary_key,
      row.data,
      row.cached_at,
    ],
  )
  .map_err(|e| eyre!("Failed to upsert cached entity: {}", e))?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::now_millis;

  fn row(id: &str, tenant: &str) -> EntityRow {
    EntityRow {
      entity_id: id.to_string(),
      tenant_id: tenant.to_string(),
      secondary_key: None,
      data: br#"{"ok":true}"#.to_vec(),
      cached_at: now_millis(),
    }
  }

  #[test]
  fn fresh_store_is_at_current_schema_version() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
  }

  #[test]
  fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.put_entities("students", &[row("s1", "t1")]).unwrap();
      store
        .put_metadata(&SyncMetadata {
          collection: "students".into(),
          last_sync_at: 123,
          item_count: 1,
        })
        .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let rows = store.entities_by_tenant("students", "t1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].entity_id, "s1");
    assert_eq!(
      store.get_metadata("students").unwrap().unwrap().item_count,
      1
    );
  }

  #[test]
  fn partially_migrated_store_is_upgraded_without_data_loss() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    // Simulate a database written by a build that only knew migration v1
    {
      let conn = Connection::open(&path).unwrap();
      conn
        .execute(
          "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
          [],
        )
        .unwrap();
      conn.execute_batch(MIGRATIONS[0]).unwrap();
      conn
        .execute("INSERT INTO schema_version (version) VALUES (1)", [])
        .unwrap();
      conn
        .execute(
          "INSERT INTO entity_cache (collection, entity_id, tenant_id, secondary_key, data, cached_at)
           VALUES ('students', 's1', 't1', NULL, x'7b7d', 1)",
          [],
        )
        .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    assert_eq!(store.entities_by_tenant("students", "t1").unwrap().len(), 1);
  }

  #[test]
  fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let conn = Connection::open(&path).unwrap();
      conn
        .execute(
          "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
          [],
        )
        .unwrap();
      conn
        .execute("INSERT INTO schema_version (version) VALUES (999)", [])
        .unwrap();
    }

    assert!(SqliteStore::open(&path).is_err());
  }

  #[test]
  fn synced_rows_without_confirmation_time_collect_on_creation_time() {
    let store = SqliteStore::open_in_memory().unwrap();

    // Shape of a row written before the confirmation column existed
    store
      .insert_outbox(&OutboxItem {
        id: "m1".into(),
        mutation: Mutation::Message {
          tenant_id: "t1".into(),
          recipient_id: "p1".into(),
          subject: "s".into(),
          body: "b".into(),
        },
        priority: Priority::Low,
        timestamp: now_millis() - 100_000,
        synced: true,
        synced_at: None,
        retry_count: 0,
        error: None,
      })
      .unwrap();

    let deleted = store
      .delete_synced_outbox_before(now_millis() - 60_000)
      .unwrap();
    assert_eq!(deleted, 1);
  }

  #[test]
  fn querying_an_unpopulated_collection_yields_empty() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.entities_by_tenant("leads", "t1").unwrap().is_empty());
    assert!(store
      .entities_by_secondary("leads", "by-owner")
      .unwrap()
      .is_empty());
    assert!(store.get_metadata("leads").unwrap().is_none());
  }
}
