//! Connectivity monitoring with a fail-open fallback.
//!
//! The monitor wraps a [`ConnectivitySource`] chosen at construction time:
//! either a real source fed by the platform's network facility, or
//! [`AssumeOnlineSource`] when no facility is available. The fallback always
//! reports online, so the rest of the system degrades to "always try" rather
//! than "never try".

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Network transport reported by the platform facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
  Wifi,
  Cellular,
  Ethernet,
  #[default]
  Unknown,
}

/// Snapshot of connectivity state, recomputed on every monitor event.
/// Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSnapshot {
  /// Whether a network interface is up.
  pub is_connected: bool,
  /// Whether the wider internet is reachable, if the platform can tell.
  pub is_reachable: Option<bool>,
  pub transport: Transport,
}

impl NetworkSnapshot {
  /// Snapshot used when no connectivity facility is available.
  pub fn assume_online() -> Self {
    Self {
      is_connected: true,
      is_reachable: None,
      transport: Transport::Unknown,
    }
  }

  pub fn offline() -> Self {
    Self {
      is_connected: false,
      is_reachable: Some(false),
      transport: Transport::Unknown,
    }
  }

  /// Online means connected and not known to be unreachable.
  pub fn is_online(&self) -> bool {
    self.is_connected && self.is_reachable != Some(false)
  }
}

impl Default for NetworkSnapshot {
  fn default() -> Self {
    Self::assume_online()
  }
}

/// Capability interface for a connectivity facility.
///
/// Implementations publish snapshots through a watch channel so that every
/// offline→online transition is observable by subscribers.
pub trait ConnectivitySource: Send + Sync {
  /// The most recent snapshot.
  fn current(&self) -> NetworkSnapshot;

  /// Subscribe to snapshot changes.
  fn watch(&self) -> watch::Receiver<NetworkSnapshot>;
}

/// Fail-open source used when no platform facility is available.
/// Always reports online and never emits a change.
pub struct AssumeOnlineSource {
  tx: watch::Sender<NetworkSnapshot>,
}

impl AssumeOnlineSource {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(NetworkSnapshot::assume_online());
    Self { tx }
  }
}

impl Default for AssumeOnlineSource {
  fn default() -> Self {
    Self::new()
  }
}

impl ConnectivitySource for AssumeOnlineSource {
  fn current(&self) -> NetworkSnapshot {
    NetworkSnapshot::assume_online()
  }

  fn watch(&self) -> watch::Receiver<NetworkSnapshot> {
    self.tx.subscribe()
  }
}

/// Push-driven source the embedding app feeds platform events into.
///
/// The host bridges its network-change callbacks to [`ManualSource::publish`];
/// tests drive connectivity flips the same way.
pub struct ManualSource {
  tx: watch::Sender<NetworkSnapshot>,
}

impl ManualSource {
  pub fn new(initial: NetworkSnapshot) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx }
  }

  /// Publish a new snapshot from a platform event.
  pub fn publish(&self, snapshot: NetworkSnapshot) {
    let was_online = self.tx.borrow().is_online();
    if was_online != snapshot.is_online() {
      if snapshot.is_online() {
        info!("connectivity: back online ({:?})", snapshot.transport);
      } else {
        info!("connectivity: went offline");
      }
    }
    // send_replace delivers even when only transport changed
    self.tx.send_replace(snapshot);
  }

  /// Convenience for tests and simple hosts.
  pub fn set_online(&self, online: bool) {
    let snapshot = if online {
      NetworkSnapshot {
        is_connected: true,
        is_reachable: Some(true),
        transport: Transport::Unknown,
      }
    } else {
      NetworkSnapshot::offline()
    };
    self.publish(snapshot);
  }
}

impl ConnectivitySource for ManualSource {
  fn current(&self) -> NetworkSnapshot {
    *self.tx.borrow()
  }

  fn watch(&self) -> watch::Receiver<NetworkSnapshot> {
    self.tx.subscribe()
  }
}

/// Monitor handed to the queue and status surface.
///
/// Performs one immediate probe of the source at construction; afterwards all
/// updates arrive through the source's watch channel.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  source: Arc<dyn ConnectivitySource>,
  rx: watch::Receiver<NetworkSnapshot>,
}

impl ConnectivityMonitor {
  /// Create a monitor over the given source, or fall back to
  /// [`AssumeOnlineSource`] when the platform facility is absent.
  pub fn new(source: Option<Arc<dyn ConnectivitySource>>) -> Self {
    let source = source.unwrap_or_else(|| {
      info!("connectivity: no platform facility, assuming online");
      Arc::new(AssumeOnlineSource::new())
    });
    let rx = source.watch();
    Self { source, rx }
  }

  /// Current connectivity snapshot.
  pub fn current_status(&self) -> NetworkSnapshot {
    self.source.current()
  }

  pub fn is_online(&self) -> bool {
    self.current_status().is_online()
  }

  /// Subscribe to connectivity changes.
  pub fn subscribe(&self) -> watch::Receiver<NetworkSnapshot> {
    self.rx.clone()
  }
}
