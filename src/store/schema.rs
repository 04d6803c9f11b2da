//! Versioned schema for the local store.
//!
//! Migrations are strictly additive: a version bump may create a table, add an
//! index, or add a column, but never drops or renames anything in place. The
//! applied version is recorded in the `schema_version` table so every collection
//! a given version needs is guaranteed present after `run_migrations`.

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: i64 = 3;

/// Migration batches, indexed by version - 1. Each entry is applied at most
/// once, in order, inside the opening connection.
pub const MIGRATIONS: &[&str] = &[
  // v1: initial layout
  r#"
-- Cached remote entities, one row per (collection, id). The data column holds
-- the serialized entity; tenant_id and secondary_key are extracted for indexing.
CREATE TABLE IF NOT EXISTS entity_cache (
    collection TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    secondary_key TEXT,
    data BLOB NOT NULL,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (collection, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_entity_cache_tenant
    ON entity_cache(collection, tenant_id);

CREATE INDEX IF NOT EXISTS idx_entity_cache_secondary
    ON entity_cache(collection, secondary_key);

-- Pending and recently confirmed write intents.
CREATE TABLE IF NOT EXISTS outbox (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    priority INTEGER NOT NULL,
    payload BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending
    ON outbox(synced, priority, timestamp);

-- Freshness bookkeeping, one row per collection.
CREATE TABLE IF NOT EXISTS sync_metadata (
    collection TEXT PRIMARY KEY,
    last_sync_at INTEGER NOT NULL,
    item_count INTEGER NOT NULL
);
"#,
  // v2: per-kind outbox lookups for the stats breakdown
  r#"
CREATE INDEX IF NOT EXISTS idx_outbox_kind ON outbox(kind);
"#,
  // v3: confirmation time, so the garbage-collection window starts when an
  // item was synced rather than when it was enqueued
  r#"
ALTER TABLE outbox ADD COLUMN synced_at INTEGER;
"#,
];
