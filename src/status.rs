//! Derived sync status for display.
//!
//! Combines the connectivity monitor and the offline queue into one snapshot
//! the UI banner can render. Updates are pushed on every underlying change;
//! nothing polls.

use tokio::sync::watch;

use crate::connectivity::ConnectivityMonitor;
use crate::queue::{OfflineQueue, QueueStatus};

/// Snapshot of sync state for the banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
  pub online: bool,
  pub pending: usize,
  pub in_flight: usize,
  pub failed: usize,
  pub processing: bool,
}

impl SyncStatus {
  fn from_parts(online: bool, queue: QueueStatus) -> Self {
    Self {
      online,
      pending: queue.pending,
      in_flight: queue.in_flight,
      failed: queue.failed,
      processing: queue.processing,
    }
  }

  /// Whether there is work the banner should mention.
  pub fn has_unsynced_work(&self) -> bool {
    self.pending + self.in_flight > 0 || self.processing
  }
}

/// Combiner pushing a fresh [`SyncStatus`] on every queue or connectivity
/// change. Dropping the surface stops the combiner task.
pub struct StatusSurface {
  rx: watch::Receiver<SyncStatus>,
  task: tokio::task::JoinHandle<()>,
}

impl StatusSurface {
  pub fn new(monitor: &ConnectivityMonitor, queue: &OfflineQueue) -> Self {
    let mut net_rx = monitor.subscribe();
    let mut queue_rx = queue.subscribe_status();

    let initial = SyncStatus::from_parts(net_rx.borrow().is_online(), *queue_rx.borrow());
    let (tx, rx) = watch::channel(initial);

    let task = tokio::spawn(async move {
      loop {
        tokio::select! {
          changed = net_rx.changed() => {
            if changed.is_err() {
              break;
            }
          }
          changed = queue_rx.changed() => {
            if changed.is_err() {
              break;
            }
          }
        }
        let status = SyncStatus::from_parts(
          net_rx.borrow_and_update().is_online(),
          *queue_rx.borrow_and_update(),
        );
        tx.send_replace(status);
      }
    });

    Self { rx, task }
  }

  /// Current snapshot.
  pub fn current(&self) -> SyncStatus {
    *self.rx.borrow()
  }

  /// Subscribe to pushed snapshots.
  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.rx.clone()
  }
}

impl Drop for StatusSurface {
  fn drop(&mut self) {
    self.task.abort();
  }
}
