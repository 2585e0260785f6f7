//! Remote-apply handlers, keyed by mutation kind.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::ApplyError;
use crate::queue::{MutationKind, PendingMutation};

/// Replays one queued mutation against whatever remote owns it.
///
/// `Ok(())` removes the mutation from the queue; any error counts against its
/// retry budget.
#[async_trait]
pub trait MutationHandler: Send + Sync {
  async fn apply(&self, mutation: &PendingMutation) -> Result<(), ApplyError>;
}

type HandlerFn = dyn Fn(PendingMutation) -> BoxFuture<'static, Result<(), ApplyError>> + Send + Sync;

/// Handler backed by a closure. Build one with [`handler_fn`].
pub struct FnHandler {
  f: Box<HandlerFn>,
}

/// Wrap an async closure as a [`MutationHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler
where
  F: Fn(PendingMutation) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), ApplyError>> + Send + 'static,
{
  FnHandler {
    f: Box::new(move |mutation| f(mutation).boxed()),
  }
}

#[async_trait]
impl MutationHandler for FnHandler {
  async fn apply(&self, mutation: &PendingMutation) -> Result<(), ApplyError> {
    (self.f)(mutation.clone()).await
  }
}

/// Kind -> handler table, filled once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
  handlers: HashMap<MutationKind, Arc<dyn MutationHandler>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `handler` for `kind`, replacing any previous one.
  pub fn register<H>(mut self, kind: MutationKind, handler: H) -> Self
  where
    H: MutationHandler + 'static,
  {
    self.insert(kind, Arc::new(handler));
    self
  }

  /// Register one shared handler for every kind.
  pub fn register_all(mut self, handler: Arc<dyn MutationHandler>) -> Self {
    for kind in MutationKind::ALL {
      self.insert(kind, Arc::clone(&handler));
    }
    self
  }

  pub fn insert(&mut self, kind: MutationKind, handler: Arc<dyn MutationHandler>) {
    self.handlers.insert(kind, handler);
  }

  pub fn contains(&self, kind: MutationKind) -> bool {
    self.handlers.contains_key(&kind)
  }

  /// Route `mutation` to its handler. A missing handler is a failure like any other.
  pub async fn dispatch(&self, mutation: &PendingMutation) -> Result<(), ApplyError> {
    match self.handlers.get(&mutation.kind) {
      Some(handler) => handler.apply(mutation).await,
      None => Err(ApplyError::MissingHandler(mutation.kind)),
    }
  }
}

impl fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut kinds: Vec<_> = self.handlers.keys().map(|k| k.as_str()).collect();
    kinds.sort_unstable();
    f.debug_struct("HandlerRegistry")
      .field("kinds", &kinds)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::MutationOperation;
  use chrono::Utc;
  use serde_json::json;

  fn mutation(kind: MutationKind) -> PendingMutation {
    PendingMutation {
      id: "m-1".to_string(),
      kind,
      operation: MutationOperation::Update,
      payload: json!({ "style": "casual" }),
      enqueued_at: Utc::now(),
      retry_count: 0,
      max_retries: 3,
      last_error: None,
    }
  }

  #[tokio::test]
  async fn test_dispatch_routes_by_kind() {
    let registry = HandlerRegistry::new()
      .register(
        MutationKind::Preference,
        handler_fn(|_| async { Ok(()) }),
      )
      .register(
        MutationKind::Schedule,
        handler_fn(|m| async move { Err(ApplyError::Rejected(format!("{} refused", m.id))) }),
      );

    assert_eq!(registry.dispatch(&mutation(MutationKind::Preference)).await, Ok(()));
    assert_eq!(
      registry.dispatch(&mutation(MutationKind::Schedule)).await,
      Err(ApplyError::Rejected("m-1 refused".to_string()))
    );
  }

  #[tokio::test]
  async fn test_missing_handler_is_an_error() {
    let registry = HandlerRegistry::new();
    assert_eq!(
      registry.dispatch(&mutation(MutationKind::Weather)).await,
      Err(ApplyError::MissingHandler(MutationKind::Weather))
    );
  }

  #[test]
  fn test_register_all_covers_every_kind() {
    let handler: Arc<dyn MutationHandler> = Arc::new(handler_fn(|_| async { Ok(()) }));
    let registry = HandlerRegistry::new().register_all(handler);
    for kind in MutationKind::ALL {
      assert!(registry.contains(kind));
    }
  }
}
