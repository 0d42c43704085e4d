//! Stale-while-revalidate read cache for remote collections.
//!
//! A read returns the last-known value synchronously and, when the entry is
//! missing or past its TTL, starts a background refresh that reconciles the
//! entry and notifies subscribers. Entries are never evicted for age alone:
//! stale data keeps rendering until something better arrives, including
//! across fetch failures.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::store::PersistentStore;

/// Where the data in an [`SwrState`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// No entry yet; serving the caller-provided initial value.
  Initial,
  /// Cached data within its freshness window.
  CacheFresh,
  /// Cached data past its freshness window; a refresh may be in flight.
  CacheStale,
  /// Fresh data from the network (or a realtime push).
  Network,
}

/// Snapshot handed to the consuming view on every change.
#[derive(Debug, Clone)]
pub struct SwrState<T> {
  pub data: T,
  pub source: DataSource,
  pub is_loading: bool,
  /// Most recent fetch failure. Combined with `source`, callers distinguish
  /// a first-load failure (no data + error) from a refresh failure
  /// (stale data + error).
  pub error: Option<String>,
}

/// Persisted shape of a cache entry. The cache is the sole writer; readers
/// always receive clones.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
  value: serde_json::Value,
  cached_at: DateTime<Utc>,
}

enum Cmd {
  Refresh,
}

enum Msg<T> {
  Cmd(Option<Cmd>),
  Update(Option<T>),
}

/// Live view of one cached collection.
///
/// Dropping the handle ends the background driver (and any realtime
/// subscription), mirroring the consuming view unmounting. Handles for the
/// same key share one state channel, so every handle observes any handle's
/// successful fetch or realtime push.
pub struct SwrHandle<T> {
  rx: watch::Receiver<SwrState<T>>,
  cmd_tx: mpsc::UnboundedSender<Cmd>,
}

impl<T: Clone> SwrHandle<T> {
  /// Current state snapshot.
  pub fn state(&self) -> SwrState<T> {
    self.rx.borrow().clone()
  }

  pub fn data(&self) -> T {
    self.rx.borrow().data.clone()
  }

  /// Wait for the next state change (the re-render signal).
  pub async fn changed(&mut self) -> Result<()> {
    self
      .rx
      .changed()
      .await
      .map_err(|_| eyre!("cache driver ended"))
  }

  /// Force an immediate refresh, bypassing the freshness check. The cached
  /// value is not cleared first, so the view never flashes empty.
  pub fn mutate(&self) {
    let _ = self.cmd_tx.send(Cmd::Refresh);
  }
}

/// Stale-while-revalidate cache over a persistent store.
///
/// Cheap to clone; clones share the store, the per-key state channels, and
/// the refresh-deduplication set.
#[derive(Clone)]
pub struct CollectionCache {
  store: Arc<dyn PersistentStore>,
  default_ttl: Duration,
  /// Keys with a staleness-triggered refresh currently in flight.
  refreshing: Arc<Mutex<HashSet<String>>>,
  /// One state channel per key, shared by every live handle for that key.
  /// Values are `Arc<watch::Sender<SwrState<T>>>` behind `Any`, since each
  /// key fixes its own `T`.
  channels: Arc<Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>>,
}

impl CollectionCache {
  pub fn new(store: Arc<dyn PersistentStore>) -> Self {
    Self {
      store,
      default_ttl: Duration::from_secs(300),
      refreshing: Arc::new(Mutex::new(HashSet::new())),
      channels: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Override the TTL used by [`CollectionCache::read_with_default_ttl`],
  /// typically from [`crate::config::CacheConfig::default_ttl`].
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Read a collection with stale-while-revalidate semantics.
  ///
  /// Returns synchronously with the cached value (or `initial` when the key
  /// has never been fetched). If the entry is missing or stale, a background
  /// refresh starts; the handle's watch fires when it resolves.
  pub fn read<T, F, Fut>(&self, key: &str, ttl: Duration, initial: T, fetcher: F) -> SwrHandle<T>
  where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let (state, needs_fetch) = self.initial_state(key, ttl, initial);
    let tx = self.channel_for(key, state);
    self.spawn_driver(key, tx, needs_fetch, fetcher, None)
  }

  /// [`CollectionCache::read`] with the cache-wide default TTL.
  pub fn read_with_default_ttl<T, F, Fut>(&self, key: &str, initial: T, fetcher: F) -> SwrHandle<T>
  where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    self.read(key, self.default_ttl, initial, fetcher)
  }

  /// Read with a realtime push subscription instead of staleness-triggered
  /// fetches. Each delivered update is treated exactly like a successful
  /// fetch: it replaces the entry and resets the freshness clock. `mutate()`
  /// still forces a one-shot fetch.
  pub fn read_realtime<T, F, Fut>(
    &self,
    key: &str,
    initial: T,
    fetcher: F,
    updates: mpsc::UnboundedReceiver<T>,
  ) -> SwrHandle<T>
  where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    // The push stream replaces the one-shot fetch entirely.
    let (state, _) = self.initial_state(key, Duration::MAX, initial);
    let tx = self.channel_for(key, state);
    self.spawn_driver(key, tx, false, fetcher, Some(updates))
  }

  fn initial_state<T>(&self, key: &str, ttl: Duration, initial: T) -> (SwrState<T>, bool)
  where
    T: DeserializeOwned,
  {
    match self.load_entry::<T>(key) {
      Some((value, cached_at)) => {
        let ttl_chrono = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let stale = Utc::now() - cached_at >= ttl_chrono;
        let state = SwrState {
          data: value,
          source: if stale {
            DataSource::CacheStale
          } else {
            DataSource::CacheFresh
          },
          is_loading: stale,
          error: None,
        };
        (state, stale)
      }
      None => (
        SwrState {
          data: initial,
          source: DataSource::Initial,
          is_loading: true,
          error: None,
        },
        true,
      ),
    }
  }

  /// Shared state channel for `key`, created on first use. A repeated read
  /// reuses the existing channel and pushes the freshly computed snapshot
  /// into it, so provenance always reflects the latest read of the entry.
  fn channel_for<T>(&self, key: &str, state: SwrState<T>) -> Arc<watch::Sender<SwrState<T>>>
  where
    T: Clone + Send + Sync + 'static,
  {
    let mut channels = match self.channels.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };

    if let Some(existing) = channels.get(key) {
      if let Some(tx) = existing.downcast_ref::<Arc<watch::Sender<SwrState<T>>>>() {
        let tx = tx.clone();
        drop(channels);
        tx.send_replace(state);
        return tx;
      }
      warn!("cache: key '{}' reused with a different value type", key);
    }

    let (tx, _) = watch::channel(state);
    let tx = Arc::new(tx);
    channels.insert(key.to_string(), Box::new(tx.clone()));
    tx
  }

  fn spawn_driver<T, F, Fut>(
    &self,
    key: &str,
    tx: Arc<watch::Sender<SwrState<T>>>,
    needs_fetch: bool,
    fetcher: F,
    updates: Option<mpsc::UnboundedReceiver<T>>,
  ) -> SwrHandle<T>
  where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let rx = tx.subscribe();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

    let store = self.store.clone();
    let refreshing = self.refreshing.clone();
    let key = key.to_string();

    tokio::spawn(async move {
      let mut updates = updates;

      if needs_fetch {
        // Deduplicate staleness-triggered refreshes across handles for the
        // same key. Forced refreshes via mutate() always run.
        match RefreshSlot::acquire(&refreshing, &key) {
          Some(_slot) => fetch_and_apply(&store, &key, &tx, &fetcher).await,
          None => debug!("cache: refresh of '{}' already in flight, sharing its result", key),
        }
      }

      loop {
        let msg = if let Some(up) = updates.as_mut() {
          tokio::select! {
            cmd = cmd_rx.recv() => Msg::Cmd(cmd),
            update = up.recv() => Msg::Update(update),
          }
        } else {
          Msg::Cmd(cmd_rx.recv().await)
        };

        match msg {
          // Handle dropped; the view unmounted.
          Msg::Cmd(None) => break,
          Msg::Cmd(Some(Cmd::Refresh)) => {
            fetch_and_apply(&store, &key, &tx, &fetcher).await;
          }
          Msg::Update(Some(value)) => {
            apply_value(&store, &key, &tx, value);
          }
          // Push stream ended; keep serving the last value.
          Msg::Update(None) => updates = None,
        }
      }
    });

    SwrHandle { rx, cmd_tx }
  }

  fn load_entry<T: DeserializeOwned>(&self, key: &str) -> Option<(T, DateTime<Utc>)> {
    let bytes = match self.store.get(key) {
      Ok(Some(bytes)) => bytes,
      Ok(None) => return None,
      Err(e) => {
        // A broken store must not take reads down; treat as a miss.
        warn!("cache: failed to read entry '{}': {}", key, e);
        return None;
      }
    };

    let entry: StoredEntry = match serde_json::from_slice(&bytes) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("cache: discarding unreadable entry '{}': {}", key, e);
        return None;
      }
    };

    match serde_json::from_value(entry.value) {
      Ok(value) => Some((value, entry.cached_at)),
      Err(e) => {
        warn!("cache: discarding mistyped entry '{}': {}", key, e);
        None
      }
    }
  }
}

/// Exclusive claim on a key's staleness-triggered refresh. Released on drop,
/// so a fetcher panic cannot wedge the key out of ever refreshing again.
struct RefreshSlot {
  refreshing: Arc<Mutex<HashSet<String>>>,
  key: String,
}

impl RefreshSlot {
  fn acquire(refreshing: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<Self> {
    let mut set = match refreshing.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    if set.insert(key.to_string()) {
      Some(Self {
        refreshing: refreshing.clone(),
        key: key.to_string(),
      })
    } else {
      None
    }
  }
}

impl Drop for RefreshSlot {
  fn drop(&mut self) {
    let mut set = match self.refreshing.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    set.remove(&self.key);
  }
}

async fn fetch_and_apply<T, F, Fut>(
  store: &Arc<dyn PersistentStore>,
  key: &str,
  tx: &watch::Sender<SwrState<T>>,
  fetcher: &F,
) where
  T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
  F: Fn() -> Fut + Sync,
  Fut: Future<Output = Result<T>>,
{
  tx.send_modify(|state| state.is_loading = true);

  match fetcher().await {
    Ok(value) => apply_value(store, key, tx, value),
    Err(e) => {
      debug!("cache: refresh of '{}' failed: {}", key, e);
      // Keep the current data and source untouched; only surface the error.
      tx.send_modify(|state| {
        state.is_loading = false;
        state.error = Some(e.to_string());
      });
    }
  }
}

/// Treat `value` as a successful fetch: replace the entry, reset the
/// freshness clock, and notify with `source = Network`.
fn apply_value<T>(
  store: &Arc<dyn PersistentStore>,
  key: &str,
  tx: &watch::Sender<SwrState<T>>,
  value: T,
) where
  T: Clone + Serialize,
{
  if let Err(e) = write_entry(store, key, &value) {
    warn!("cache: failed to persist entry '{}': {}", key, e);
  }
  tx.send_replace(SwrState {
    data: value,
    source: DataSource::Network,
    is_loading: false,
    error: None,
  });
}

fn write_entry<T: Serialize>(
  store: &Arc<dyn PersistentStore>,
  key: &str,
  value: &T,
) -> Result<()> {
  let entry = StoredEntry {
    value: serde_json::to_value(value)
      .map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?,
    cached_at: Utc::now(),
  };
  let bytes =
    serde_json::to_vec(&entry).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;
  store.set(key, &bytes)
}

/// Builder for `<domain>:<ownerId>:<filterSignature>` cache keys.
///
/// The filter portion is hashed so arbitrary query descriptions produce
/// stable, fixed-length keys.
#[derive(Debug, Clone)]
pub struct CacheKey {
  pub domain: String,
  pub owner: String,
  pub filter: String,
}

impl CacheKey {
  pub fn new(domain: &str, owner: &str, filter: &str) -> Self {
    Self {
      domain: domain.to_string(),
      owner: owner.to_string(),
      filter: filter.to_string(),
    }
  }

  fn filter_signature(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.filter.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}:{}", self.domain, self.owner, self.filter_signature())
  }
}
