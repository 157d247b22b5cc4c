//! One-shot async work polled from the UI tick.
//!
//! Key handlers are synchronous, so views hand controller calls to a
//! `Query<T>` which runs them on the runtime and is polled each tick for
//! the result. Starting a new run drops and aborts the previous one.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Where a [`Query`] stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState<T> {
  Idle,
  Running,
  Done(T),
}

pub struct Query<T> {
  state: QueryState<T>,
  receiver: Option<oneshot::Receiver<T>>,
  task: Option<JoinHandle<()>>,
}

impl<T> Default for Query<T> {
  fn default() -> Self {
    Self {
      state: QueryState::Idle,
      receiver: None,
      task: None,
    }
  }
}

impl<T: Send + 'static> Query<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `future`, replacing whatever was running.
  pub fn start<F>(&mut self, future: F)
  where
    F: Future<Output = T> + Send + 'static,
  {
    self.cancel();
    let (tx, rx) = oneshot::channel();
    self.receiver = Some(rx);
    self.state = QueryState::Running;
    self.task = Some(tokio::spawn(async move {
      // The receiver is gone when the view moved on
      let _ = tx.send(future.await);
    }));
  }

  #[cfg(test)]
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn is_running(&self) -> bool {
    matches!(self.state, QueryState::Running)
  }

  /// Take a finished result, leaving the query idle.
  pub fn take(&mut self) -> Option<T> {
    match std::mem::replace(&mut self.state, QueryState::Idle) {
      QueryState::Done(value) => Some(value),
      other => {
        self.state = other;
        None
      }
    }
  }

  /// Check for a result without blocking. Returns `true` when the state
  /// changed.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = self.receiver.as_mut() else {
      return false;
    };

    match receiver.try_recv() {
      Ok(value) => {
        self.state = QueryState::Done(value);
        self.receiver = None;
        self.task = None;
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.state = QueryState::Idle;
        self.receiver = None;
        self.task = None;
        true
      }
    }
  }

  fn cancel(&mut self) {
    self.receiver = None;
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  async fn settle<T: Send + 'static>(query: &mut Query<T>) -> bool {
    for _ in 0..100 {
      if query.poll() {
        return true;
      }
      tokio::task::yield_now().await;
    }
    false
  }

  #[tokio::test]
  async fn test_query_result_arrives_on_poll() {
    let mut query = Query::new();
    assert_eq!(query.state(), &QueryState::Idle);

    query.start(async { vec![1, 2, 3] });
    assert!(query.is_running());

    assert!(settle(&mut query).await);
    assert_eq!(query.state(), &QueryState::Done(vec![1, 2, 3]));
    assert_eq!(query.take(), Some(vec![1, 2, 3]));
    assert_eq!(query.state(), &QueryState::Idle);
  }

  #[tokio::test]
  async fn test_take_while_running_keeps_state() {
    let mut query = Query::new();
    query.start(async {
      tokio::time::sleep(Duration::from_secs(60)).await;
      1
    });

    assert_eq!(query.take(), None);
    assert!(query.is_running());
    assert!(!query.poll());
  }

  #[tokio::test]
  async fn test_restart_replaces_pending_run() {
    let mut query = Query::new();
    query.start(async {
      tokio::time::sleep(Duration::from_secs(60)).await;
      "stale"
    });
    query.start(async { "fresh" });

    assert!(settle(&mut query).await);
    assert_eq!(query.take(), Some("fresh"));
  }
}
