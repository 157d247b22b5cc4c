//! Application-owned set of "refresh everything" callbacks.

use futures::future::{join_all, BoxFuture};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

use super::realtime::TriggerReason;

type Callback = Arc<dyn Fn(TriggerReason) -> BoxFuture<'static, ()> + Send + Sync>;
type Callbacks = Mutex<BTreeMap<u64, Callback>>;

/// Callbacks run together on focus or reconnect. Owned by the composition
/// root and handed out by reference.
#[derive(Default)]
pub struct RefetchRegistry {
  callbacks: Arc<Callbacks>,
  next_id: AtomicU64,
}

/// Keeps a callback registered until dropped.
#[must_use = "dropping a Registration unregisters its callback"]
pub struct Registration {
  callbacks: Weak<Callbacks>,
  id: u64,
}

impl Drop for Registration {
  fn drop(&mut self) {
    if let Some(callbacks) = self.callbacks.upgrade() {
      lock(&callbacks).remove(&self.id);
    }
  }
}

impl RefetchRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F>(&self, callback: F) -> Registration
  where
    F: Fn(TriggerReason) -> BoxFuture<'static, ()> + Send + Sync + 'static,
  {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    lock(&self.callbacks).insert(id, Arc::new(callback));
    Registration {
      callbacks: Arc::downgrade(&self.callbacks),
      id,
    }
  }

  pub fn len(&self) -> usize {
    lock(&self.callbacks).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Run every registered callback concurrently and wait for all of them.
  /// Returns how many ran.
  pub async fn refetch_all(&self, reason: TriggerReason) -> usize {
    // Cloned out so callbacks may register or unregister while running
    let callbacks: Vec<Callback> = lock(&self.callbacks).values().cloned().collect();
    debug!(count = callbacks.len(), ?reason, "Refetching all registered views");
    let count = callbacks.len();
    join_all(callbacks.iter().map(|callback| callback(reason))).await;
    count
  }
}

fn lock(callbacks: &Callbacks) -> MutexGuard<'_, BTreeMap<u64, Callback>> {
  callbacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;
  use std::sync::atomic::AtomicUsize;

  fn counting(
    counter: &Arc<AtomicUsize>,
  ) -> impl Fn(TriggerReason) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    let counter = counter.clone();
    move |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_refetch_all_runs_every_callback() {
    let registry = RefetchRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let _a = registry.register(counting(&counter));
    let _b = registry.register(counting(&counter));

    assert_eq!(registry.refetch_all(TriggerReason::Reconnect).await, 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_drop_unregisters() {
    let registry = RefetchRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let kept = registry.register(counting(&counter));
    drop(registry.register(counting(&counter)));

    assert_eq!(registry.len(), 1);
    registry.refetch_all(TriggerReason::Focus).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    drop(kept);
    assert!(registry.is_empty());
  }

  #[test]
  fn test_registration_outliving_registry() {
    let registry = RefetchRegistry::new();
    let registration = registry.register(|_| async {}.boxed());
    drop(registry);
    drop(registration);
  }
}
