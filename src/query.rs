//! Async fetch state machine for the data-binding layer.
//!
//! `DataQuery<T>` is the per-screen accessor the UI binds to: it owns a
//! fetcher closure (normally built around [`crate::read_through::ReadThrough`]),
//! tracks loading/success/error states, and exposes the offline and
//! cache-derived flags alongside the data. Consumers call `fetch()` once,
//! `poll()` on every tick, and `refresh()` for an explicit reload.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::read_through::ReadOutcome;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed; the outcome carries provenance flags
  Success(ReadOutcome<T>),
  /// Query failed with an error
  Error(String),
}

/// A factory function that creates futures for fetching data
type FetcherFn<T> =
  Box<dyn Fn() -> BoxFuture<'static, Result<ReadOutcome<T>, String>> + Send + Sync>;

/// Bindable async query with offline-aware state.
pub struct DataQuery<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<ReadOutcome<T>, String>>>,
}

impl<T: Send + 'static> DataQuery<T> {
  /// Create a new query with the given fetcher function. The fetcher is
  /// called on every `fetch()` or `refresh()`.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ReadOutcome<T>, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
    }
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// The fetched data, if available.
  pub fn data(&self) -> Option<&T> {
    match &self.state {
      QueryState::Success(outcome) => Some(&outcome.data),
      _ => None,
    }
  }

  pub fn loading(&self) -> bool {
    matches!(self.state, QueryState::Loading)
  }

  /// Whether the last result was produced while offline.
  pub fn is_offline(&self) -> bool {
    match &self.state {
      QueryState::Success(outcome) => outcome.is_offline,
      _ => false,
    }
  }

  /// Whether the last result came from the local cache.
  pub fn is_using_cache(&self) -> bool {
    match &self.state {
      QueryState::Success(outcome) => outcome.is_using_cache(),
      _ => false,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match &self.state {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }

  /// Start fetching if not already loading.
  pub fn fetch(&mut self) {
    if self.loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a reload, discarding any in-flight fetch.
  pub fn refresh(&mut self) {
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for a completed fetch. Returns `true` if the state changed; call
  /// this from the event-loop tick.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(outcome)) => {
        self.state = QueryState::Success(outcome);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DataQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DataQuery")
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
