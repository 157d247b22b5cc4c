//! Request coalescing: at most one in-flight operation per key.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::SyncResult;
use crate::telemetry::{SyncEvent, SyncEventSink};

type SharedRequest<R> = Shared<BoxFuture<'static, SyncResult<R>>>;
type InFlight<R> = Arc<Mutex<HashMap<String, (u64, SharedRequest<R>)>>>;

/// De-duplicates concurrent requests sharing a cache key.
///
/// Every caller that arrives while a request is registered under its key
/// awaits that same request and receives the same value or the same error.
/// The registration is removed as soon as the request settles.
pub struct RequestCoalescer<R> {
  in_flight: InFlight<R>,
  next_id: AtomicU64,
  events: Option<Arc<dyn SyncEventSink>>,
}

impl<R: Clone + Send + Sync + 'static> RequestCoalescer<R> {
  pub fn new() -> Self {
    Self {
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      next_id: AtomicU64::new(0),
      events: None,
    }
  }

  pub fn with_events(mut self, events: Arc<dyn SyncEventSink>) -> Self {
    self.events = Some(events);
    self
  }

  /// Run `producer` unless a request for `key` is already in flight, in
  /// which case join it instead.
  pub async fn run_deduped<F, Fut>(&self, key: &str, producer: F) -> SyncResult<R>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<R>> + Send + 'static,
  {
    let request = {
      let mut in_flight = lock(&self.in_flight);
      match in_flight.get(key) {
        Some((_, existing)) => {
          debug!(key, "Joining in-flight request");
          if let Some(events) = &self.events {
            events.emit(&SyncEvent::CoalescedJoin {
              key: key.to_string(),
            });
          }
          existing.clone()
        }
        None => {
          let id = self.next_id.fetch_add(1, Ordering::Relaxed);
          let guard = Unregister {
            in_flight: Arc::clone(&self.in_flight),
            key: key.to_string(),
            id,
          };
          let fut = producer();
          let request = async move {
            let _guard = guard;
            fut.await
          }
          .boxed()
          .shared();
          in_flight.insert(key.to_string(), (id, request.clone()));
          request
        }
      }
    };

    request.await
  }

  /// Number of keys with a request currently registered.
  #[cfg(test)]
  pub fn in_flight_count(&self) -> usize {
    lock(&self.in_flight).len()
  }
}

impl<R: Clone + Send + Sync + 'static> Default for RequestCoalescer<R> {
  fn default() -> Self {
    Self::new()
  }
}

/// Removes a registration when its request settles.
struct Unregister<R> {
  in_flight: InFlight<R>,
  key: String,
  id: u64,
}

impl<R> Drop for Unregister<R> {
  fn drop(&mut self) {
    let removed = {
      let mut in_flight = lock(&self.in_flight);
      match in_flight.get(&self.key) {
        Some((id, _)) if *id == self.id => in_flight.remove(&self.key),
        _ => None,
      }
    };
    // Dropped outside the lock
    drop(removed);
  }
}

fn lock<R>(
  in_flight: &InFlight<R>,
) -> std::sync::MutexGuard<'_, HashMap<String, (u64, SharedRequest<R>)>> {
  in_flight
    .lock()
    .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::SyncError;
  use crate::telemetry::SyncStats;
  use std::sync::atomic::AtomicU32;
  use tokio::sync::Notify;

  #[tokio::test]
  async fn test_concurrent_callers_share_one_request() {
    let stats = Arc::new(SyncStats::new());
    let coalescer: RequestCoalescer<Vec<u32>> = RequestCoalescer::new().with_events(stats.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Notify::new());

    let run = || {
      let calls = calls.clone();
      let gate = gate.clone();
      coalescer.run_deduped("api/animals", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        gate.notified().await;
        Ok(vec![1, 2, 3])
      })
    };

    let all = futures::future::join_all((0..5).map(|_| run()));
    let release = async {
      tokio::task::yield_now().await;
      gate.notify_one();
    };
    let (results, _) = tokio::join!(all, release);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.as_ref() == Ok(&vec![1, 2, 3])));
    assert_eq!(stats.snapshot().coalesced_joins, 4);
    assert_eq!(coalescer.in_flight_count(), 0);
  }

  #[tokio::test]
  async fn test_rejection_is_shared_and_unregistered() {
    let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
    let gate = Arc::new(Notify::new());

    let first = {
      let gate = gate.clone();
      coalescer.run_deduped("k", move || async move {
        gate.notified().await;
        Err(SyncError::Transport("connection reset".into()))
      })
    };
    let second = coalescer.run_deduped("k", || async { Ok(7) });
    let release = async {
      tokio::task::yield_now().await;
      gate.notify_one();
    };

    let (a, b, _) = tokio::join!(first, second, release);
    assert_eq!(a, Err(SyncError::Transport("connection reset".into())));
    assert_eq!(a, b);
    assert_eq!(coalescer.in_flight_count(), 0);

    // The next request runs fresh
    assert_eq!(coalescer.run_deduped("k", || async { Ok(7) }).await, Ok(7));
  }

  #[tokio::test]
  async fn test_distinct_keys_are_not_serialized() {
    let coalescer: RequestCoalescer<&'static str> = RequestCoalescer::new();
    let (a, b) = tokio::join!(
      coalescer.run_deduped("a", || async { Ok("a") }),
      coalescer.run_deduped("b", || async { Ok("b") }),
    );
    assert_eq!((a, b), (Ok("a"), Ok("b")));
  }

  #[tokio::test]
  async fn test_abandoned_request_can_be_rejoined() {
    let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
    let gate = Arc::new(Notify::new());

    {
      let gate = gate.clone();
      let abandoned = coalescer.run_deduped("k", move || async move {
        gate.notified().await;
        Ok(1)
      });
      // Poll once so the request registers, then drop the caller
      let _ = futures::poll!(Box::pin(abandoned));
    }
    assert_eq!(coalescer.in_flight_count(), 1);

    gate.notify_one();
    let joined = coalescer.run_deduped("k", || async { Ok(2) }).await;
    assert_eq!(joined, Ok(1));
    assert_eq!(coalescer.in_flight_count(), 0);
  }
}
