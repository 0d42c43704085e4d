//! Key/value byte storage surviving process restarts.
//!
//! The queue and cache both persist through this narrow interface: string
//! keys, opaque byte values. `MemoryStore` backs tests and ephemeral use;
//! `SqliteStore` is the durable implementation.

mod sqlite;

pub use sqlite::SqliteStore;

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Well-known key for the serialized offline write queue.
pub const QUEUE_KEY: &str = "@offline_queue";

/// Persistent key/value storage backend.
///
/// Values are opaque JSON blobs owned by the caller; the store never
/// interprets them. No schema versioning is implemented; a format change
/// requires a migration strategy on top of this interface.
pub trait PersistentStore: Send + Sync {
  /// Get the value for a key, or `None` if absent.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  /// Set the value for a key, replacing any previous value.
  fn set(&self, key: &str, value: &[u8]) -> Result<()>;

  /// Remove a key. Removing an absent key is not an error.
  fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl PersistentStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }
}
