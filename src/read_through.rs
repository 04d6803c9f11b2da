//! Read-through fallback policy.
//!
//! Every data-consuming caller goes through here so it gets a best-effort
//! value whether or not the network is usable: live first while online, cache
//! on live failure, caller-supplied default when both come up empty. Reads
//! never return an error out of this layer.

use std::future::Future;

use color_eyre::Result;
use tracing::debug;

use crate::connectivity::ConnectivityMonitor;

/// Where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
  /// Fresh data from a successful live read
  Live,
  /// Cache fallback, after a live failure or while offline
  Cache,
  /// Caller-supplied default; both loaders failed or were empty
  Default,
}

/// Result of a read-through fetch, with provenance flags for the UI.
#[derive(Debug, Clone)]
pub struct ReadOutcome<T> {
  pub data: T,
  pub source: ReadSource,
  /// Whether the monitor reported offline at fetch time
  pub is_offline: bool,
}

impl<T> ReadOutcome<T> {
  /// True when the data is cache-derived rather than live.
  pub fn is_using_cache(&self) -> bool {
    self.source == ReadSource::Cache
  }
}

/// Policy wrapper pairing a live loader with a cache loader.
#[derive(Clone)]
pub struct ReadThrough {
  monitor: ConnectivityMonitor,
}

impl ReadThrough {
  pub fn new(monitor: ConnectivityMonitor) -> Self {
    Self { monitor }
  }

  /// Fetch a list dataset.
  ///
  /// Online: try the live loader; a successful non-empty result is returned as
  /// fresh (the live closure is also where the caller repopulates the cache).
  /// On live failure the cache loader answers instead, flagged as
  /// cache-derived. Offline: the live loader is never invoked. If both paths
  /// fail or are empty, the caller-supplied default is returned.
  pub async fn fetch_list<T, L, LFut, C, CFut>(
    &self,
    live: L,
    cached: C,
    default: Vec<T>,
  ) -> ReadOutcome<Vec<T>>
  where
    L: FnOnce() -> LFut,
    LFut: Future<Output = Result<Vec<T>>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<Vec<T>>>,
  {
    let online = self.monitor.is_online();

    if online {
      match live().await {
        Ok(data) if !data.is_empty() => {
          return ReadOutcome {
            data,
            source: ReadSource::Live,
            is_offline: false,
          };
        }
        Ok(_) => {
          debug!("live read returned no rows, falling back to cache");
        }
        Err(e) => {
          debug!(error = %e, "live read failed, falling back to cache");
        }
      }
    }

    match cached().await {
      Ok(data) if !data.is_empty() => ReadOutcome {
        data,
        source: ReadSource::Cache,
        is_offline: !online,
      },
      _ => ReadOutcome {
        data: default,
        source: ReadSource::Default,
        is_offline: !online,
      },
    }
  }

  /// Fetch a single value. Loaders answer with `None` for a miss; misses and
  /// failures both resolve to the default.
  pub async fn fetch_one<T, L, LFut, C, CFut>(
    &self,
    live: L,
    cached: C,
    default: T,
  ) -> ReadOutcome<T>
  where
    L: FnOnce() -> LFut,
    LFut: Future<Output = Result<Option<T>>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<Option<T>>>,
  {
    let online = self.monitor.is_online();

    if online {
      match live().await {
        Ok(Some(data)) => {
          return ReadOutcome {
            data,
            source: ReadSource::Live,
            is_offline: false,
          };
        }
        Ok(None) => {
          debug!("live read missed, falling back to cache");
        }
        Err(e) => {
          debug!(error = %e, "live read failed, falling back to cache");
        }
      }
    }

    match cached().await {
      Ok(Some(data)) => ReadOutcome {
        data,
        source: ReadSource::Cache,
        is_offline: !online,
      },
      _ => ReadOutcome {
        data: default,
        source: ReadSource::Default,
        is_offline: !online,
      },
    }
  }
}
