//! Durable queue of write intents awaiting remote confirmation.
//!
//! Writes are always queued, online or offline; the caller gets an id back
//! immediately and never blocks on the network. An item leaves the pending set
//! only through [`Outbox::mark_synced`], and synced items are retained for a
//! bounded audit window before garbage collection removes them.

mod mutation;

pub use mutation::{Mutation, MutationKind, Priority};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{now_millis, StoreBackend};

/// After this many failed attempts an item is reported as failed and no longer
/// retried without explicit user action.
pub const RETRY_LIMIT: u32 = 3;

/// One queued write intent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxItem {
  /// Locally generated, time-ordered (UUIDv7), so lexical order is a valid
  /// FIFO tiebreak for items created in the same millisecond
  pub id: String,
  pub mutation: Mutation,
  pub priority: Priority,
  /// Creation time, epoch millis
  pub timestamp: i64,
  /// Set exactly once, on confirmed remote application
  pub synced: bool,
  /// When remote application was confirmed (epoch millis); the retention
  /// window for garbage collection starts here, not at creation
  pub synced_at: Option<i64>,
  pub retry_count: u32,
  /// Last failure message, if any attempt was rejected
  pub error: Option<String>,
}

impl OutboxItem {
  /// Whether this item has exhausted its automatic retries.
  pub fn is_failed(&self) -> bool {
    !self.synced && self.retry_count >= RETRY_LIMIT
  }
}

/// Aggregate view over the whole outbox, for status indicators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
  /// Unsynced items still inside the retry budget
  pub pending: usize,
  /// Unsynced items at or past the retry limit
  pub failed: usize,
  /// Confirmed items awaiting garbage collection
  pub synced: usize,
  /// Pending count per mutation kind
  pub by_kind: BTreeMap<MutationKind, usize>,
}

/// Handle to the durable mutation queue. Cheap to clone.
#[derive(Clone)]
pub struct Outbox {
  store: Arc<dyn StoreBackend>,
}

impl Outbox {
  pub fn new(store: Arc<dyn StoreBackend>) -> Self {
    Self { store }
  }

  /// Queue a write intent. Never touches the network; returns the new item's
  /// id immediately.
  pub fn enqueue(&self, mutation: Mutation, priority: Priority) -> Result<String> {
    let item = OutboxItem {
      id: Uuid::now_v7().to_string(),
      mutation,
      priority,
      timestamp: now_millis(),
      synced: false,
      synced_at: None,
      retry_count: 0,
      error: None,
    };

    self.store.insert_outbox(&item)?;
    debug!(id = %item.id, kind = %item.mutation.kind(), "enqueued mutation");

    Ok(item.id)
  }

  /// All unsynced items, ordered by priority rank then creation time, with the
  /// time-ordered id as the final tiebreak. The comparator is applied here, at
  /// read time, so the ordering is a contract rather than a storage accident.
  pub fn list_pending(&self) -> Result<Vec<OutboxItem>> {
    let mut items = self.store.pending_outbox()?;
    items.sort_by(|a, b| {
      (a.priority.rank(), a.timestamp, &a.id).cmp(&(b.priority.rank(), b.timestamp, &b.id))
    });
    Ok(items)
  }

  /// Confirm remote application of an item. Idempotent: marking an
  /// already-synced item again changes nothing.
  pub fn mark_synced(&self, id: &str) -> Result<()> {
    self.store.mark_outbox_synced(id)?;
    Ok(())
  }

  /// Record a failed apply attempt and its error message. Does not change the
  /// synced flag.
  pub fn increment_retry(&self, id: &str, error: Option<&str>) -> Result<()> {
    self.store.bump_outbox_retry(id, error)?;
    Ok(())
  }

  /// Explicit user-initiated retry of a failed item: zero its retry count so
  /// the next drain cycle picks it up again. Returns whether anything changed.
  pub fn retry(&self, id: &str) -> Result<bool> {
    self.store.reset_outbox_retry(id)
  }

  /// Aggregate counts over the full outbox, with a per-kind pending breakdown.
  pub fn stats(&self) -> Result<OutboxStats> {
    let mut stats = OutboxStats::default();

    for item in self.store.all_outbox()? {
      if item.synced {
        stats.synced += 1;
      } else if item.retry_count >= RETRY_LIMIT {
        stats.failed += 1;
      } else {
        stats.pending += 1;
        *stats.by_kind.entry(item.mutation.kind()).or_insert(0) += 1;
      }
    }

    Ok(stats)
  }

  /// Delete synced items whose confirmation is older than the retention
  /// window. Returns how many were removed.
  pub fn collect_garbage(&self, retention: Duration) -> Result<usize> {
    let cutoff = now_millis() - retention.as_millis() as i64;
    let deleted = self.store.delete_synced_outbox_before(cutoff)?;
    if deleted > 0 {
      info!(deleted, "garbage-collected synced outbox items");
    }
    Ok(deleted)
  }
}
