//! Queue item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed tag identifying the mutation category.
///
/// Used for handler dispatch and diagnostics; the queue itself never
/// inspects payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
  CreateRecord,
  UpdateRecord,
  DeleteRecord,
  RecordEvent,
}

impl std::fmt::Display for MutationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      MutationKind::CreateRecord => "create-record",
      MutationKind::UpdateRecord => "update-record",
      MutationKind::DeleteRecord => "delete-record",
      MutationKind::RecordEvent => "record-event",
    };
    f.write_str(s)
  }
}

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueItemStatus {
  /// Waiting for a drain pass. The only state eligible for execution.
  Pending,
  /// Currently being executed by a drain pass.
  InFlight,
  /// Executed successfully. Pruned after the retention window.
  Done,
  /// Attempts exhausted or no handler available; kept for inspection.
  Failed,
}

impl QueueItemStatus {
  /// Settled items (done or failed) are eligible for capacity trimming.
  pub fn is_settled(&self) -> bool {
    matches!(self, QueueItemStatus::Done | QueueItemStatus::Failed)
  }
}

/// A durable, pending mutation.
///
/// The runnable operation is reconstructed at drain time from `kind` and
/// `payload` via the handler registry, so items survive process restarts
/// intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
  /// Opaque unique identifier, generated at enqueue time. Immutable.
  pub id: String,
  pub kind: MutationKind,
  /// Serializable description of the intended mutation; handler input.
  pub payload: serde_json::Value,
  pub enqueued_at: DateTime<Utc>,
  /// Execution attempts so far.
  pub attempts: u32,
  /// Attempt ceiling before permanent failure.
  pub max_attempts: u32,
  pub status: QueueItemStatus,
  /// Most recent failure message, if any.
  pub last_error: Option<String>,
  /// When the item reached `Done` or `Failed`.
  pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
  pub fn new(kind: MutationKind, payload: serde_json::Value, max_attempts: u32) -> Self {
    Self {
      id: generate_id(),
      kind,
      payload,
      enqueued_at: Utc::now(),
      attempts: 0,
      max_attempts,
      status: QueueItemStatus::Pending,
      last_error: None,
      completed_at: None,
    }
  }
}

/// Millisecond timestamp plus a random suffix. Unique enough for a
/// single-client queue; not a distributed id.
fn generate_id() -> String {
  format!("{}-{:04x}", Utc::now().timestamp_millis(), rand::random::<u16>())
}
