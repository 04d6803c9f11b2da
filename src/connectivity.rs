//! Process-wide network reachability flag.
//!
//! Reachability means "the local interface reports a connection", not "the
//! remote service answered". A live call can still fail while this flag is
//! true, and callers treat that as a distinct, recoverable condition.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Observable online/offline flag, updated from platform connectivity events.
///
/// Subscribers hold a `watch::Receiver`; dropping the receiver is the release,
/// so a torn-down consumer can never leave a dangling listener behind.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  /// Create a monitor seeded from the platform's current reachability signal.
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  /// Current reachability.
  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Ingest a platform went-online / went-offline event. Subscribers are only
  /// notified on an actual transition.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      info!(online, "connectivity changed");
    }
  }

  /// Subscribe to transitions. The receiver yields the current value first via
  /// `borrow_and_update` and then wakes on every change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn transitions_notify_subscribers() {
    let monitor = ConnectivityMonitor::new(false);
    let mut rx = monitor.subscribe();
    rx.borrow_and_update();

    monitor.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
    assert!(monitor.is_online());
  }

  #[tokio::test]
  async fn repeated_state_is_not_a_transition() {
    let monitor = ConnectivityMonitor::new(true);
    let mut rx = monitor.subscribe();
    rx.borrow_and_update();

    monitor.set_online(true);
    assert!(!rx.has_changed().unwrap());

    monitor.set_online(false);
    assert!(rx.has_changed().unwrap());
  }
}
