//! Sync scheduler: drains the outbox against the remote service.
//!
//! This is the only component that applies outbox items remotely. A drain
//! cycle is single-flight (overlapping triggers are ignored), processes items
//! in priority/FIFO order, and treats each item independently: one rejection
//! never aborts the cycle. Failures are recorded per item and surfaced through
//! aggregate stats, never thrown to the caller.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::Result;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::outbox::{Mutation, MutationKind, Outbox};

/// Boundary with the remote data service. Each mutation kind maps to exactly
/// one typed remote write; implementations dispatch with an exhaustive match.
#[async_trait]
pub trait RemoteService: Send + Sync {
  async fn apply(&self, mutation: &Mutation) -> Result<()>;
}

/// Scheduler state, observable between and during cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
  Idle,
  Draining,
  /// The last cycle finished with at least one item still unconfirmed
  PartialFailure,
}

/// Snapshot of an in-progress drain, for UI display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainProgress {
  /// 1-based index of the item currently being applied
  pub current: usize,
  pub total: usize,
  pub current_kind: Option<MutationKind>,
}

/// Result of one drain trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
  Completed { applied: usize, failed: usize },
  /// Another cycle was already in progress; this trigger was ignored
  AlreadyDraining,
  /// The monitor reported offline; nothing was attempted
  Offline,
}

pub struct SyncScheduler {
  outbox: Outbox,
  remote: Arc<dyn RemoteService>,
  monitor: ConnectivityMonitor,
  /// Held for the duration of a cycle; try_lock failure is the single-flight
  /// rejection path
  flight: Mutex<()>,
  state: StdMutex<DrainState>,
  progress: StdMutex<DrainProgress>,
  retention: Duration,
  drain_interval: Duration,
  gc_interval: Duration,
}

impl SyncScheduler {
  pub fn new(
    outbox: Outbox,
    remote: Arc<dyn RemoteService>,
    monitor: ConnectivityMonitor,
    retention: Duration,
    drain_interval: Duration,
    gc_interval: Duration,
  ) -> Self {
    Self {
      outbox,
      remote,
      monitor,
      flight: Mutex::new(()),
      state: StdMutex::new(DrainState::Idle),
      progress: StdMutex::new(DrainProgress::default()),
      retention,
      drain_interval,
      gc_interval,
    }
  }

  /// Current scheduler state.
  pub fn state(&self) -> DrainState {
    self.state.lock().map(|s| *s).unwrap_or(DrainState::Idle)
  }

  /// Progress snapshot of the active cycle; zeroed while idle.
  pub fn progress(&self) -> DrainProgress {
    self
      .progress
      .lock()
      .map(|p| p.clone())
      .unwrap_or_default()
  }

  fn set_state(&self, state: DrainState) {
    if let Ok(mut s) = self.state.lock() {
      *s = state;
    }
  }

  fn set_progress(&self, progress: DrainProgress) {
    if let Ok(mut p) = self.progress.lock() {
      *p = progress;
    }
  }

  /// Run one drain cycle.
  ///
  /// Items at the retry limit are skipped; they stay in the failed bucket
  /// until explicit user action re-queues them. There is no mid-item
  /// cancellation: once an apply call is issued, its result decides the next
  /// step.
  pub async fn drain(&self) -> DrainOutcome {
    let Ok(_guard) = self.flight.try_lock() else {
      debug!("drain already in progress, ignoring trigger");
      return DrainOutcome::AlreadyDraining;
    };

    if !self.monitor.is_online() {
      debug!("offline, skipping drain");
      return DrainOutcome::Offline;
    }

    let pending = match self.outbox.list_pending() {
      Ok(items) => items,
      Err(e) => {
        warn!(error = %e, "could not read pending outbox items");
        return DrainOutcome::Completed {
          applied: 0,
          failed: 0,
        };
      }
    };
    let pending: Vec<_> = pending.into_iter().filter(|i| !i.is_failed()).collect();

    self.set_state(DrainState::Draining);
    let total = pending.len();
    let mut applied = 0;
    let mut failed = 0;

    for (idx, item) in pending.iter().enumerate() {
      self.set_progress(DrainProgress {
        current: idx + 1,
        total,
        current_kind: Some(item.mutation.kind()),
      });

      match self.remote.apply(&item.mutation).await {
        Ok(()) => {
          if let Err(e) = self.outbox.mark_synced(&item.id) {
            warn!(id = %item.id, error = %e, "apply confirmed but could not mark synced");
          }
          applied += 1;
        }
        Err(e) => {
          let message = e.to_string();
          debug!(id = %item.id, kind = %item.mutation.kind(), error = %message, "remote apply failed");
          if let Err(e) = self.outbox.increment_retry(&item.id, Some(&message)) {
            warn!(id = %item.id, error = %e, "could not record retry");
          }
          failed += 1;
        }
      }
    }

    self.set_progress(DrainProgress::default());
    self.set_state(if failed > 0 {
      DrainState::PartialFailure
    } else {
      DrainState::Idle
    });

    if total > 0 {
      info!(applied, failed, total, "drain cycle finished");
    }

    DrainOutcome::Completed { applied, failed }
  }

  /// Trigger loop: drains on online transitions, on a periodic timer, and on
  /// manual sync-now requests; runs outbox garbage collection on its own
  /// timer. Exits when the sync-now channel closes.
  pub async fn run(self: Arc<Self>, mut sync_now: mpsc::UnboundedReceiver<()>) {
    let mut online = self.monitor.subscribe();
    online.borrow_and_update();

    let mut drain_tick = tokio::time::interval(self.drain_interval);
    let mut gc_tick = tokio::time::interval(self.gc_interval);

    loop {
      tokio::select! {
        changed = online.changed() => {
          if changed.is_err() {
            break;
          }
          if *online.borrow_and_update() {
            self.drain().await;
          }
        }
        _ = drain_tick.tick() => {
          self.drain().await;
        }
        _ = gc_tick.tick() => {
          if let Err(e) = self.outbox.collect_garbage(self.retention) {
            warn!(error = %e, "outbox garbage collection failed");
          }
        }
        msg = sync_now.recv() => {
          match msg {
            Some(()) => {
              self.drain().await;
            }
            None => break,
          }
        }
      }
    }

    debug!("sync scheduler stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::outbox::Priority;
  use crate::store::SqliteStore;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use tokio::sync::Notify;

  fn attendance() -> Mutation {
    Mutation::AttendanceMark {
      tenant_id: "t1".into(),
      student_id: "s1".into(),
      section_id: "7b".into(),
      date: "2026-03-02".into(),
      status: "present".into(),
    }
  }

  fn message() -> Mutation {
    Mutation::Message {
      tenant_id: "t1".into(),
      recipient_id: "parent-9".into(),
      subject: "Field trip".into(),
      body: "Forms due Friday".into(),
    }
  }

  /// Remote that records applied kinds and can be told to reject everything.
  #[derive(Default)]
  struct MockRemote {
    applied: StdMutex<Vec<MutationKind>>,
    calls: AtomicUsize,
    fail_all: AtomicBool,
  }

  #[async_trait]
  impl RemoteService for MockRemote {
    async fn apply(&self, mutation: &Mutation) -> Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail_all.load(Ordering::SeqCst) {
        return Err(eyre!("validation rejected"));
      }
      self.applied.lock().unwrap().push(mutation.kind());
      Ok(())
    }
  }

  /// Remote that parks inside apply until released, for single-flight tests.
  struct BlockingRemote {
    started: Arc<Notify>,
    release: Arc<Notify>,
  }

  #[async_trait]
  impl RemoteService for BlockingRemote {
    async fn apply(&self, _mutation: &Mutation) -> Result<()> {
      self.started.notify_one();
      self.release.notified().await;
      Ok(())
    }
  }

  fn scheduler(
    remote: Arc<dyn RemoteService>,
    online: bool,
  ) -> (Arc<SyncScheduler>, Outbox, ConnectivityMonitor) {
    crate::init_test_logging();
    let store: Arc<dyn crate::store::StoreBackend> =
      Arc::new(SqliteStore::open_in_memory().unwrap());
    let outbox = Outbox::new(store);
    let monitor = ConnectivityMonitor::new(online);
    let scheduler = Arc::new(SyncScheduler::new(
      outbox.clone(),
      remote,
      monitor.clone(),
      Duration::from_secs(24 * 3600),
      Duration::from_secs(300),
      Duration::from_secs(3600),
    ));
    (scheduler, outbox, monitor)
  }

  #[tokio::test]
  async fn offline_enqueue_then_online_drain_in_priority_order() {
    let remote = Arc::new(MockRemote::default());
    let (scheduler, outbox, monitor) = scheduler(remote.clone(), false);

    // Low-priority message first, high-priority attendance second: drain
    // order must still put attendance first.
    outbox.enqueue(message(), Priority::Low).unwrap();
    outbox.enqueue(attendance(), Priority::High).unwrap();

    let stats = outbox.stats().unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.by_kind[&MutationKind::AttendanceMark], 1);
    assert_eq!(stats.by_kind[&MutationKind::Message], 1);

    assert_eq!(scheduler.drain().await, DrainOutcome::Offline);

    monitor.set_online(true);
    let outcome = scheduler.drain().await;
    assert_eq!(
      outcome,
      DrainOutcome::Completed {
        applied: 2,
        failed: 0
      }
    );

    let applied = remote.applied.lock().unwrap().clone();
    assert_eq!(
      applied,
      vec![MutationKind::AttendanceMark, MutationKind::Message]
    );

    let stats = outbox.stats().unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.synced, 2);
    assert_eq!(scheduler.state(), DrainState::Idle);
  }

  #[tokio::test]
  async fn three_failures_move_item_to_failed_and_stop_retries() {
    let remote = Arc::new(MockRemote::default());
    remote.fail_all.store(true, Ordering::SeqCst);
    let (scheduler, outbox, _monitor) = scheduler(remote.clone(), true);

    outbox.enqueue(attendance(), Priority::High).unwrap();

    for _ in 0..3 {
      let outcome = scheduler.drain().await;
      assert_eq!(
        outcome,
        DrainOutcome::Completed {
          applied: 0,
          failed: 1
        }
      );
      assert_eq!(scheduler.state(), DrainState::PartialFailure);
    }

    let stats = outbox.stats().unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);

    // A fourth manual sync leaves the failed item alone
    let calls_before = remote.calls.load(Ordering::SeqCst);
    let outcome = scheduler.drain().await;
    assert_eq!(
      outcome,
      DrainOutcome::Completed {
        applied: 0,
        failed: 0
      }
    );
    assert_eq!(remote.calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(outbox.stats().unwrap().failed, 1);
  }

  #[tokio::test]
  async fn one_rejection_does_not_abort_the_cycle() {
    // Rejects attendance marks only
    struct Picky;

    #[async_trait]
    impl RemoteService for Picky {
      async fn apply(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
          Mutation::AttendanceMark { .. } => Err(eyre!("bad section")),
          _ => Ok(()),
        }
      }
    }

    let (scheduler, outbox, _monitor) = scheduler(Arc::new(Picky), true);
    outbox.enqueue(attendance(), Priority::High).unwrap();
    outbox.enqueue(message(), Priority::Low).unwrap();

    let outcome = scheduler.drain().await;
    assert_eq!(
      outcome,
      DrainOutcome::Completed {
        applied: 1,
        failed: 1
      }
    );

    let stats = outbox.stats().unwrap();
    assert_eq!(stats.synced, 1);
    assert_eq!(stats.pending, 1);
  }

  #[tokio::test]
  async fn overlapping_drain_triggers_are_single_flight() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let remote = Arc::new(BlockingRemote {
      started: started.clone(),
      release: release.clone(),
    });

    let (scheduler, outbox, _monitor) = scheduler(remote, true);
    outbox.enqueue(attendance(), Priority::High).unwrap();

    let background = {
      let scheduler = scheduler.clone();
      tokio::spawn(async move { scheduler.drain().await })
    };

    started.notified().await;
    assert_eq!(scheduler.state(), DrainState::Draining);

    let progress = scheduler.progress();
    assert_eq!(progress.current, 1);
    assert_eq!(progress.total, 1);
    assert_eq!(progress.current_kind, Some(MutationKind::AttendanceMark));

    // Second trigger while the first is mid-item
    assert_eq!(scheduler.drain().await, DrainOutcome::AlreadyDraining);

    release.notify_one();
    let outcome = background.await.unwrap();
    assert_eq!(
      outcome,
      DrainOutcome::Completed {
        applied: 1,
        failed: 0
      }
    );
    assert_eq!(scheduler.progress(), DrainProgress::default());
  }

  #[tokio::test]
  async fn run_loop_drains_on_online_transition_and_manual_trigger() {
    let remote = Arc::new(MockRemote::default());
    let (scheduler, outbox, monitor) = scheduler(remote.clone(), false);

    outbox.enqueue(attendance(), Priority::High).unwrap();

    let (sync_tx, sync_rx) = mpsc::unbounded_channel();
    let loop_task = tokio::spawn(scheduler.clone().run(sync_rx));

    monitor.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(outbox.stats().unwrap().synced, 1);

    outbox.enqueue(message(), Priority::Low).unwrap();
    sync_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(outbox.stats().unwrap().synced, 2);

    drop(sync_tx);
    loop_task.await.unwrap();
  }
}
