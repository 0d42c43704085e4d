//! Handler registry mapping mutation kinds to runnable operations.
//!
//! Queue items persist only data (`kind` + `payload`); the registry turns
//! that data back into a runnable future at drain time. This is what makes
//! rehydrated items executable after a process restart.

use color_eyre::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::item::MutationKind;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A registered mutation handler. Receives the item's payload and performs
/// the remote write; any error is treated as a failed attempt.
pub type Handler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Registry of mutation handlers, populated once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
  handlers: HashMap<MutationKind, Handler>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register the handler for a mutation kind, replacing any previous one.
  pub fn register<F, Fut>(&mut self, kind: MutationKind, handler: F)
  where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    self
      .handlers
      .insert(kind, Arc::new(move |payload| Box::pin(handler(payload))));
  }

  /// Look up the handler for a kind.
  pub fn get(&self, kind: MutationKind) -> Option<Handler> {
    self.handlers.get(&kind).cloned()
  }
}

impl std::fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HandlerRegistry")
      .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
      .finish()
  }
}
