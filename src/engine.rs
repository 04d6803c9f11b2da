//! Composition root for the offline engine.
//!
//! The application constructs exactly one [`OfflineEngine`] at startup and
//! hands its parts to whoever needs them; the store handle is created once
//! here and shared, instead of living in a hidden module-level global.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::outbox::Outbox;
use crate::read_through::ReadThrough;
use crate::repo::Repository;
use crate::store::{open_or_noop, NoopStore, StoreBackend};
use crate::sync::{RemoteService, SyncScheduler};

/// Handle for requesting an immediate drain from outside the scheduler loop.
#[derive(Clone)]
pub struct SyncTrigger {
  tx: mpsc::UnboundedSender<()>,
}

impl SyncTrigger {
  /// Request a "sync now". Coalesced with any drain already in flight.
  pub fn sync_now(&self) {
    let _ = self.tx.send(());
  }
}

/// The offline engine: one durable store plus every component built on it.
pub struct OfflineEngine {
  config: EngineConfig,
  store: Arc<dyn StoreBackend>,
  repository: Repository,
  outbox: Outbox,
  monitor: ConnectivityMonitor,
  read_through: ReadThrough,
}

impl OfflineEngine {
  /// Open the engine against the configured database path. A store that
  /// cannot be opened degrades to no-op persistence; this constructor only
  /// fails when no database location can be determined at all.
  pub fn open(config: EngineConfig, initially_online: bool) -> color_eyre::Result<Self> {
    let path = match &config.db_path {
      Some(path) => path.clone(),
      None => EngineConfig::default_db_path()?,
    };
    let store = open_or_noop(&path);

    Ok(Self::with_store(config, store, initially_online))
  }

  /// Engine without persistence, for restricted environments and tests.
  pub fn ephemeral(config: EngineConfig, initially_online: bool) -> Self {
    Self::with_store(config, Arc::new(NoopStore), initially_online)
  }

  /// Wire all components around an existing store handle.
  pub fn with_store(
    config: EngineConfig,
    store: Arc<dyn StoreBackend>,
    initially_online: bool,
  ) -> Self {
    let monitor = ConnectivityMonitor::new(initially_online);
    let repository = Repository::new(store.clone());
    let outbox = Outbox::new(store.clone());
    let read_through = ReadThrough::new(monitor.clone());

    debug!("offline engine initialized");

    Self {
      config,
      store,
      repository,
      outbox,
      monitor,
      read_through,
    }
  }

  pub fn repository(&self) -> &Repository {
    &self.repository
  }

  pub fn outbox(&self) -> &Outbox {
    &self.outbox
  }

  pub fn connectivity(&self) -> &ConnectivityMonitor {
    &self.monitor
  }

  pub fn read_through(&self) -> &ReadThrough {
    &self.read_through
  }

  pub fn store(&self) -> &Arc<dyn StoreBackend> {
    &self.store
  }

  /// Build the scheduler for a given remote service binding.
  pub fn scheduler(&self, remote: Arc<dyn RemoteService>) -> Arc<SyncScheduler> {
    Arc::new(SyncScheduler::new(
      self.outbox.clone(),
      remote,
      self.monitor.clone(),
      self.config.retention(),
      self.config.drain_interval(),
      self.config.gc_interval(),
    ))
  }

  /// Build the scheduler and start its trigger loop. Returns the manual
  /// sync-now handle; dropping every clone of it stops the loop.
  pub fn start_sync(&self, remote: Arc<dyn RemoteService>) -> (Arc<SyncScheduler>, SyncTrigger) {
    let scheduler = self.scheduler(remote);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(scheduler.clone().run(rx));
    (scheduler, SyncTrigger { tx })
  }
}
