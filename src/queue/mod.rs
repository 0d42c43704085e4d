//! Durable offline write queue.
//!
//! Mutations made while disconnected are persisted as [`QueueItem`]s and
//! drained in enqueue order once connectivity returns, each item running
//! through the retry executor with exponential backoff. Drains are
//! edge-triggered: connectivity flipping back online, the host app returning
//! to the foreground, and enqueueing while online all kick a pass. Status is
//! pushed to subscribers on every queue mutation.

mod item;
mod registry;

pub use item::{MutationKind, QueueItem, QueueItemStatus};
pub use registry::{Handler, HandlerRegistry};

use chrono::{Duration as ChronoDuration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::retry::with_retry;
use crate::store::{PersistentStore, QUEUE_KEY};

/// Aggregate queue counts plus the flags the UI banner needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
  pub pending: usize,
  pub in_flight: usize,
  pub done: usize,
  pub failed: usize,
  pub online: bool,
  pub processing: bool,
}

struct Inner {
  store: Arc<dyn PersistentStore>,
  registry: HandlerRegistry,
  monitor: ConnectivityMonitor,
  config: SyncConfig,
  items: Mutex<Vec<QueueItem>>,
  /// Re-entrancy guard for drains, checked synchronously before any await.
  processing: AtomicBool,
  status_tx: watch::Sender<QueueStatus>,
  sync_tx: broadcast::Sender<bool>,
}

/// Offline write queue service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct OfflineQueue {
  inner: Arc<Inner>,
}

impl OfflineQueue {
  /// Construct the queue, rehydrating any persisted items before any
  /// draining can occur.
  pub fn new(
    store: Arc<dyn PersistentStore>,
    registry: HandlerRegistry,
    monitor: ConnectivityMonitor,
    config: SyncConfig,
  ) -> Result<Self> {
    let mut items: Vec<QueueItem> = match store.get(QUEUE_KEY)? {
      Some(bytes) => serde_json::from_slice(&bytes)
        .map_err(|e| eyre!("Failed to deserialize offline queue: {}", e))?,
      None => Vec::new(),
    };

    // A crash mid-pass can leave items in-flight. The attempt's outcome is
    // unknown, so they go back to pending (at-least-once contract).
    let mut recovered = 0;
    for item in &mut items {
      if item.status == QueueItemStatus::InFlight {
        item.status = QueueItemStatus::Pending;
        recovered += 1;
      }
    }
    if recovered > 0 {
      info!("queue: recovered {} in-flight items as pending", recovered);
    }

    let (status_tx, _) = watch::channel(QueueStatus::default());
    let (sync_tx, _) = broadcast::channel(16);

    let queue = Self {
      inner: Arc::new(Inner {
        store,
        registry,
        monitor,
        config,
        items: Mutex::new(items),
        processing: AtomicBool::new(false),
        status_tx,
        sync_tx,
      }),
    };
    queue.publish_status()?;

    Ok(queue)
  }

  /// Enqueue a mutation with the configured default attempt ceiling.
  pub fn enqueue(&self, kind: MutationKind, payload: serde_json::Value) -> Result<String> {
    self.enqueue_with_attempts(kind, payload, self.inner.config.queue.max_attempts)
  }

  /// Enqueue a mutation. Persists the item immediately and, if currently
  /// online, triggers a best-effort drain without blocking the caller.
  pub fn enqueue_with_attempts(
    &self,
    kind: MutationKind,
    payload: serde_json::Value,
    max_attempts: u32,
  ) -> Result<String> {
    let item = QueueItem::new(kind, payload, max_attempts);
    let id = item.id.clone();

    {
      let mut items = self.lock_items()?;
      Self::enforce_capacity(&mut items, self.inner.config.queue.capacity);
      items.push(item);
      self.persist_locked(&items)?;
    }
    self.publish_status()?;
    debug!("queue: enqueued {} ({})", id, kind);

    if self.inner.monitor.is_online() {
      let this = self.clone();
      tokio::spawn(async move {
        if let Err(e) = this.process_queue().await {
          warn!("queue: drain after enqueue failed: {}", e);
        }
      });
    }

    Ok(id)
  }

  /// Drain all pending items in enqueue order.
  ///
  /// Idempotent and non-reentrant: a call arriving while a drain is already
  /// running is a logged no-op. Skips entirely while offline. Items enqueued
  /// mid-pass wait for the next pass.
  pub async fn process_queue(&self) -> Result<()> {
    if self
      .inner
      .processing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("queue: drain already running, skipping");
      return Ok(());
    }

    let result = self.drain_pass().await;
    self.inner.processing.store(false, Ordering::SeqCst);
    let _ = self.publish_status();
    result
  }

  async fn drain_pass(&self) -> Result<()> {
    if !self.inner.monitor.is_online() {
      debug!("queue: offline, skipping drain");
      return Ok(());
    }
    self.publish_status()?;

    let pending_ids: Vec<String> = {
      let items = self.lock_items()?;
      items
        .iter()
        .filter(|i| i.status == QueueItemStatus::Pending)
        .map(|i| i.id.clone())
        .collect()
    };

    if !pending_ids.is_empty() {
      info!("queue: draining {} pending items", pending_ids.len());
    }

    let mut any_failed = false;
    for id in pending_ids {
      // One bad item must not halt the drain of the rest.
      match self.process_item(&id).await {
        Ok(true) => {}
        Ok(false) => any_failed = true,
        Err(e) => {
          warn!("queue: error processing item {}: {}", id, e);
          any_failed = true;
        }
      }
    }

    self.prune_done()?;
    let _ = self.inner.sync_tx.send(!any_failed);
    Ok(())
  }

  /// Run one pending item to completion. Returns `Ok(false)` when the item
  /// ended up failed this pass.
  async fn process_item(&self, id: &str) -> Result<bool> {
    let (kind, payload, attempts, max_attempts) = {
      let items = self.lock_items()?;
      match items.iter().find(|i| i.id == id) {
        Some(i) if i.status == QueueItemStatus::Pending => {
          (i.kind, i.payload.clone(), i.attempts, i.max_attempts)
        }
        // Changed under us (e.g. pruned); nothing to do.
        _ => return Ok(true),
      }
    };

    let handler = match self.inner.registry.get(kind) {
      Some(h) => h,
      None => {
        warn!("queue: no handler registered for kind {}", kind);
        self.update_item(id, |item| {
          item.status = QueueItemStatus::Failed;
          item.last_error = Some(format!("no handler registered for kind {}", kind));
          item.completed_at = Some(Utc::now());
        })?;
        return Ok(false);
      }
    };

    let remaining = max_attempts.saturating_sub(attempts).max(1);
    let policy = self.inner.config.retry.policy(remaining);

    let result = with_retry(&policy, || {
      let this = self.clone();
      let handler = handler.clone();
      let payload = payload.clone();
      let id = id.to_string();
      async move { this.run_attempt(&id, handler, payload).await }
    })
    .await;

    match result {
      Ok(()) => {
        self.update_item(id, |item| {
          item.status = QueueItemStatus::Done;
          item.last_error = None;
          item.completed_at = Some(Utc::now());
        })?;
        Ok(true)
      }
      Err(e) => {
        warn!("queue: item {} failed permanently: {}", id, e);
        self.update_item(id, |item| {
          item.status = QueueItemStatus::Failed;
          item.last_error = Some(e.to_string());
          item.completed_at = Some(Utc::now());
        })?;
        Ok(false)
      }
    }
  }

  /// One execution attempt: mark in-flight, run the handler, and on failure
  /// revert to pending with `attempts` incremented (unless the ceiling is
  /// reached, in which case the caller marks the item failed).
  async fn run_attempt(
    &self,
    id: &str,
    handler: Handler,
    payload: serde_json::Value,
  ) -> Result<()> {
    self.update_item(id, |item| {
      item.status = QueueItemStatus::InFlight;
    })?;

    match handler(payload).await {
      Ok(()) => Ok(()),
      Err(e) => {
        self.update_item(id, |item| {
          item.attempts += 1;
          item.last_error = Some(e.to_string());
          if item.attempts < item.max_attempts {
            item.status = QueueItemStatus::Pending;
          }
        })?;
        Err(e)
      }
    }
  }

  /// Current aggregate status. Cheap and synchronous; safe to call often.
  pub fn status(&self) -> Result<QueueStatus> {
    let items = self.lock_items()?;
    Ok(self.compute_status(&items))
  }

  /// Subscribe to status updates, pushed on every queue mutation.
  pub fn subscribe_status(&self) -> watch::Receiver<QueueStatus> {
    self.inner.status_tx.subscribe()
  }

  /// Subscribe to per-pass completion notifications. The payload is the
  /// aggregate success flag: `true` iff zero items failed that pass.
  pub fn on_sync_complete(&self) -> broadcast::Receiver<bool> {
    self.inner.sync_tx.subscribe()
  }

  /// Reset all failed items to pending with a fresh attempt budget, then
  /// drain if online.
  pub async fn retry_failed(&self) -> Result<()> {
    let reset = {
      let mut items = self.lock_items()?;
      let mut reset = 0;
      for item in items.iter_mut() {
        if item.status == QueueItemStatus::Failed {
          item.status = QueueItemStatus::Pending;
          item.attempts = 0;
          item.last_error = None;
          item.completed_at = None;
          reset += 1;
        }
      }
      self.persist_locked(&items)?;
      reset
    };
    self.publish_status()?;

    if reset > 0 {
      info!("queue: reset {} failed items to pending", reset);
    }
    if self.inner.monitor.is_online() {
      self.process_queue().await?;
    }
    Ok(())
  }

  /// Snapshot of all items, for consumers needing per-item detail.
  pub fn items(&self) -> Result<Vec<QueueItem>> {
    Ok(self.lock_items()?.clone())
  }

  /// Spawn the connectivity listener: every offline→online transition
  /// triggers a drain. Returns the task handle so the host can abort it.
  pub fn watch_connectivity(&self) -> tokio::task::JoinHandle<()> {
    let this = self.clone();
    let mut rx = self.inner.monitor.subscribe();
    // Take the baseline before the task is scheduled: a flip arriving while
    // the task is still queued must count as an edge, not as the baseline.
    let mut was_online = rx.borrow_and_update().is_online();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = rx.borrow_and_update().is_online();
        let _ = this.publish_status();
        if online && !was_online {
          info!("queue: connectivity restored, draining");
          if let Err(e) = this.process_queue().await {
            warn!("queue: drain on reconnect failed: {}", e);
          }
        }
        was_online = online;
      }
    })
  }

  /// Host hook for the app returning to foreground; drains if online.
  pub async fn notify_foregrounded(&self) -> Result<()> {
    if self.inner.monitor.is_online() {
      self.process_queue().await
    } else {
      Ok(())
    }
  }

  fn lock_items(&self) -> Result<MutexGuard<'_, Vec<QueueItem>>> {
    self
      .inner
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn persist_locked(&self, items: &[QueueItem]) -> Result<()> {
    let bytes = serde_json::to_vec(items)
      .map_err(|e| eyre!("Failed to serialize offline queue: {}", e))?;
    self.inner.store.set(QUEUE_KEY, &bytes)
  }

  /// Apply a mutation to one item, persist, and push the new status.
  fn update_item(&self, id: &str, f: impl FnOnce(&mut QueueItem)) -> Result<()> {
    {
      let mut items = self.lock_items()?;
      if let Some(item) = items.iter_mut().find(|i| i.id == id) {
        f(item);
      }
      self.persist_locked(&items)?;
    }
    self.publish_status()
  }

  fn compute_status(&self, items: &[QueueItem]) -> QueueStatus {
    let mut status = QueueStatus {
      online: self.inner.monitor.is_online(),
      processing: self.inner.processing.load(Ordering::SeqCst),
      ..QueueStatus::default()
    };
    for item in items {
      match item.status {
        QueueItemStatus::Pending => status.pending += 1,
        QueueItemStatus::InFlight => status.in_flight += 1,
        QueueItemStatus::Done => status.done += 1,
        QueueItemStatus::Failed => status.failed += 1,
      }
    }
    status
  }

  fn publish_status(&self) -> Result<()> {
    let status = {
      let items = self.lock_items()?;
      self.compute_status(&items)
    };
    self.inner.status_tx.send_replace(status);
    Ok(())
  }

  /// Make room for one more item. Pending and in-flight work is never
  /// trimmed; the oldest settled items go first.
  fn enforce_capacity(items: &mut Vec<QueueItem>, capacity: usize) {
    let mut excess = (items.len() + 1).saturating_sub(capacity);
    if excess == 0 {
      return;
    }
    items.retain(|item| {
      if excess > 0 && item.status.is_settled() {
        excess -= 1;
        false
      } else {
        true
      }
    });
    if excess > 0 {
      warn!("queue: over capacity with {} unsettled excess items", excess);
    }
  }

  /// Remove done items older than the retention window, then persist.
  fn prune_done(&self) -> Result<()> {
    let cutoff = Utc::now() - ChronoDuration::hours(self.inner.config.queue.retention_hours);
    let mut items = self.lock_items()?;
    let before = items.len();
    items.retain(|item| {
      !(item.status == QueueItemStatus::Done
        && item.completed_at.map(|t| t < cutoff).unwrap_or(false))
    });
    if items.len() != before {
      debug!("queue: pruned {} completed items", before - items.len());
    }
    self.persist_locked(&items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connectivity::{ConnectivitySource, ManualSource, NetworkSnapshot};
  use crate::store::MemoryStore;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;
  use std::time::Duration;

  fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.retry.initial_delay_ms = 1;
    config
  }

  fn manual_monitor(online: bool) -> (Arc<ManualSource>, ConnectivityMonitor) {
    let initial = if online {
      NetworkSnapshot::assume_online()
    } else {
      NetworkSnapshot::offline()
    };
    let source = Arc::new(ManualSource::new(initial));
    let monitor = ConnectivityMonitor::new(Some(source.clone() as Arc<dyn ConnectivitySource>));
    (source, monitor)
  }

  fn counting_registry(calls: Arc<AtomicU32>, fail_first: u32) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(MutationKind::RecordEvent, move |_payload| {
      let calls = calls.clone();
      async move {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < fail_first {
          Err(eyre!("transient failure {}", n))
        } else {
          Ok(())
        }
      }
    });
    registry
  }

  #[tokio::test]
  async fn test_offline_enqueue_persists_and_rehydrates() {
    let store = Arc::new(MemoryStore::new());
    let (_source, monitor) = manual_monitor(false);

    let queue = OfflineQueue::new(
      store.clone(),
      HandlerRegistry::new(),
      monitor.clone(),
      test_config(),
    )
    .unwrap();

    for i in 0..3 {
      queue
        .enqueue(MutationKind::RecordEvent, json!({ "n": i }))
        .unwrap();
    }

    // Rebuild from the same store, as after an app restart
    let rehydrated =
      OfflineQueue::new(store, HandlerRegistry::new(), monitor, test_config()).unwrap();
    let items = rehydrated.items().unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.status == QueueItemStatus::Pending));
  }

  #[tokio::test]
  async fn test_in_flight_items_rehydrate_as_pending() {
    let store = Arc::new(MemoryStore::new());
    let stuck = {
      let mut item = QueueItem::new(MutationKind::CreateRecord, json!({}), 5);
      item.status = QueueItemStatus::InFlight;
      item
    };
    store
      .set(QUEUE_KEY, &serde_json::to_vec(&vec![stuck]).unwrap())
      .unwrap();

    let (_source, monitor) = manual_monitor(false);
    let queue = OfflineQueue::new(store, HandlerRegistry::new(), monitor, test_config()).unwrap();
    assert_eq!(queue.items().unwrap()[0].status, QueueItemStatus::Pending);
  }

  #[tokio::test]
  async fn test_concurrent_drains_process_each_item_once() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    let handler_calls = calls.clone();
    registry.register(MutationKind::RecordEvent, move |_payload| {
      let calls = handler_calls.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    });

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();

    source.set_online(true);
    let (a, b) = tokio::join!(queue.process_queue(), queue.process_queue());
    a.unwrap();
    b.unwrap();

    // The re-entrancy guard short-circuits one of the two calls
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.status().unwrap().done, 2);
  }

  #[tokio::test]
  async fn test_always_failing_item_exhausts_attempts() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls.clone(), u32::MAX);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue
      .enqueue_with_attempts(MutationKind::RecordEvent, json!({}), 3)
      .unwrap();

    source.set_online(true);
    queue.process_queue().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let items = queue.items().unwrap();
    let item = &items[0];
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.attempts, 3);
    assert!(item.last_error.as_deref().unwrap().contains("transient failure"));
  }

  #[tokio::test]
  async fn test_retry_failed_resets_and_drains() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));
    // Fails the first 3 attempts, succeeds afterwards
    let registry = counting_registry(calls.clone(), 3);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue
      .enqueue_with_attempts(MutationKind::RecordEvent, json!({}), 3)
      .unwrap();

    source.set_online(true);
    queue.process_queue().await.unwrap();
    assert_eq!(queue.status().unwrap().failed, 1);

    queue.retry_failed().await.unwrap();

    let items = queue.items().unwrap();
    let item = &items[0];
    assert_eq!(item.status, QueueItemStatus::Done);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_retry_failed_offline_resets_without_draining() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls.clone(), u32::MAX);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue
      .enqueue_with_attempts(MutationKind::RecordEvent, json!({}), 1)
      .unwrap();
    source.set_online(true);
    queue.process_queue().await.unwrap();
    source.set_online(false);

    queue.retry_failed().await.unwrap();

    let items = queue.items().unwrap();
    let item = &items[0];
    assert_eq!(item.status, QueueItemStatus::Pending);
    assert_eq!(item.attempts, 0);
    assert!(item.last_error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unregistered_kind_fails_with_distinct_error() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);

    let queue =
      OfflineQueue::new(store, HandlerRegistry::new(), monitor, test_config()).unwrap();
    queue.enqueue(MutationKind::DeleteRecord, json!({})).unwrap();

    source.set_online(true);
    queue.process_queue().await.unwrap();

    let items = queue.items().unwrap();
    let item = &items[0];
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert!(item
      .last_error
      .as_deref()
      .unwrap()
      .contains("no handler registered"));
  }

  #[tokio::test]
  async fn test_capacity_trims_oldest_done_preserving_pending() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls.clone(), 0);

    let mut config = test_config();
    config.queue.capacity = 3;

    let queue = OfflineQueue::new(store, registry, monitor, config).unwrap();

    let first = queue.enqueue(MutationKind::RecordEvent, json!({"n": 0})).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({"n": 1})).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({"n": 2})).unwrap();
    source.set_online(true);
    queue.process_queue().await.unwrap();
    assert_eq!(queue.status().unwrap().done, 3);
    source.set_online(false);

    let fourth = queue.enqueue(MutationKind::RecordEvent, json!({"n": 3})).unwrap();

    let items = queue.items().unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.id != first));
    assert!(items
      .iter()
      .any(|i| i.id == fourth && i.status == QueueItemStatus::Pending));
  }

  #[tokio::test]
  async fn test_end_to_end_mixed_outcomes() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);

    let b_calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    let b_counter = b_calls.clone();
    registry.register(MutationKind::RecordEvent, move |payload| {
      let b_calls = b_counter.clone();
      async move {
        match payload["name"].as_str() {
          Some("A") => Ok(()),
          Some("B") => {
            // Fails twice, then succeeds
            if b_calls.fetch_add(1, Ordering::SeqCst) < 2 {
              Err(eyre!("B transient"))
            } else {
              Ok(())
            }
          }
          _ => Err(eyre!("C terminal")),
        }
      }
    });

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    let a = queue
      .enqueue_with_attempts(MutationKind::RecordEvent, json!({"name": "A"}), 3)
      .unwrap();
    let b = queue
      .enqueue_with_attempts(MutationKind::RecordEvent, json!({"name": "B"}), 3)
      .unwrap();
    let c = queue
      .enqueue_with_attempts(MutationKind::RecordEvent, json!({"name": "C"}), 3)
      .unwrap();

    let mut sync_rx = queue.on_sync_complete();
    source.set_online(true);
    queue.process_queue().await.unwrap();

    let by_id = |id: &str| {
      queue
        .items()
        .unwrap()
        .into_iter()
        .find(|i| i.id == id)
        .unwrap()
    };
    assert_eq!(by_id(&a).status, QueueItemStatus::Done);
    assert_eq!(by_id(&b).status, QueueItemStatus::Done);
    assert_eq!(by_id(&c).status, QueueItemStatus::Failed);
    assert_eq!(by_id(&c).attempts, 3);

    // Exactly one notification for the pass, with success=false
    assert_eq!(sync_rx.recv().await.unwrap(), false);
    assert!(matches!(
      sync_rx.try_recv(),
      Err(broadcast::error::TryRecvError::Empty)
    ));
  }

  #[tokio::test]
  async fn test_sync_complete_true_when_all_succeed() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls, 0);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();

    let mut sync_rx = queue.on_sync_complete();
    source.set_online(true);
    queue.process_queue().await.unwrap();

    assert_eq!(sync_rx.recv().await.unwrap(), true);
  }

  #[tokio::test]
  async fn test_enqueue_while_online_triggers_drain() {
    let store = Arc::new(MemoryStore::new());
    let (_source, monitor) = manual_monitor(true);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls.clone(), 0);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.status().unwrap().done, 1);
  }

  #[tokio::test]
  async fn test_connectivity_flip_triggers_drain() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls.clone(), 0);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    let _listener = queue.watch_connectivity();

    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();
    assert_eq!(queue.status().unwrap().pending, 2);

    source.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.status().unwrap().done, 2);
  }

  #[tokio::test]
  async fn test_fallback_monitor_still_drains() {
    // No connectivity facility at all: fail-open defaults to online
    let store = Arc::new(MemoryStore::new());
    let monitor = ConnectivityMonitor::new(None);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls.clone(), 0);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();
    queue.process_queue().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.status().unwrap().done, 2);
  }

  #[tokio::test]
  async fn test_foreground_notify_drains_when_online() {
    let store = Arc::new(MemoryStore::new());
    let (source, monitor) = manual_monitor(false);
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(calls.clone(), 0);

    let queue = OfflineQueue::new(store, registry, monitor, test_config()).unwrap();
    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();

    queue.notify_foregrounded().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    source.set_online(true);
    queue.notify_foregrounded().await.unwrap();
    assert_eq!(queue.status().unwrap().done, 1);
  }

  #[tokio::test]
  async fn test_status_pushed_on_mutation() {
    let store = Arc::new(MemoryStore::new());
    let (_source, monitor) = manual_monitor(false);

    let queue =
      OfflineQueue::new(store, HandlerRegistry::new(), monitor, test_config()).unwrap();
    let mut rx = queue.subscribe_status();

    queue.enqueue(MutationKind::RecordEvent, json!({})).unwrap();
    rx.changed().await.unwrap();
    let status = *rx.borrow();
    assert_eq!(status.pending, 1);
    assert!(!status.online);
  }
}
