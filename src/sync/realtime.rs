//! Timer and focus/reconnect driven refetches.

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::controller::{ResourceController, SyncItem};

/// Polls faster than this are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Refetch triggers. Polling is off unless `poll_interval_ms` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
  pub enabled: bool,
  pub poll_interval_ms: Option<u64>,
  pub refetch_on_focus: bool,
  pub refetch_on_reconnect: bool,
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      poll_interval_ms: None,
      refetch_on_focus: true,
      refetch_on_reconnect: true,
    }
  }
}

impl RealtimeConfig {
  /// Effective poll interval, `None` when polling is off.
  pub fn poll_interval(&self) -> Option<Duration> {
    if !self.enabled {
      return None;
    }
    self
      .poll_interval_ms
      .map(|ms| Duration::from_millis(ms).max(MIN_POLL_INTERVAL))
  }

  fn allows(&self, reason: TriggerReason) -> bool {
    self.enabled
      && match reason {
        TriggerReason::Poll => self.poll_interval_ms.is_some(),
        TriggerReason::Focus => self.refetch_on_focus,
        TriggerReason::Reconnect => self.refetch_on_reconnect,
      }
  }
}

/// Why a refetch was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
  Poll,
  Focus,
  Reconnect,
}

/// Drives a controller's refetch from a timer and focus/reconnect signals.
///
/// Every triggered refetch first opens the realtime bypass window so it
/// reaches the network. Triggers are skipped while the controller has a
/// mutation in flight or is backing off after a rate limit. Dropping the
/// trigger stops its timer and any refetch it started.
pub struct RealtimeTrigger<T: SyncItem> {
  controller: ResourceController<T>,
  config: RealtimeConfig,
  bypass: Duration,
  poller: Option<JoinHandle<()>>,
  pending: Option<JoinHandle<()>>,
}

impl<T: SyncItem> RealtimeTrigger<T> {
  /// Start the poll timer (when configured) for `controller`.
  pub fn start(controller: ResourceController<T>, config: RealtimeConfig, bypass: Duration) -> Self {
    let poller = config.poll_interval().map(|every| {
      let controller = controller.clone();
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
          ticker.tick().await;
          if should_run(&controller, TriggerReason::Poll) {
            run(&controller, bypass, TriggerReason::Poll).await;
          }
        }
      })
    });

    Self {
      controller,
      config,
      bypass,
      poller,
      pending: None,
    }
  }

  pub fn is_polling(&self) -> bool {
    self.poller.is_some()
  }

  /// Signal a focus or reconnect event. Returns the started refetch, or
  /// `None` when the trigger is configured off or currently suppressed.
  pub fn notify(&mut self, reason: TriggerReason) -> Option<&mut JoinHandle<()>> {
    self.spawn(reason)
  }

  /// Callback form of the trigger, for a [`RefetchRegistry`](super::RefetchRegistry).
  pub fn handler(&self) -> impl Fn(TriggerReason) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    let controller = self.controller.clone();
    let config = self.config.clone();
    let bypass = self.bypass;
    move |reason| {
      let controller = controller.clone();
      let allowed = config.allows(reason) && should_run(&controller, reason);
      async move {
        if allowed {
          run(&controller, bypass, reason).await;
        }
      }
      .boxed()
    }
  }

  fn spawn(&mut self, reason: TriggerReason) -> Option<&mut JoinHandle<()>> {
    if !self.config.allows(reason) || !should_run(&self.controller, reason) {
      return None;
    }
    let controller = self.controller.clone();
    let bypass = self.bypass;
    if let Some(previous) = self.pending.take() {
      previous.abort();
    }
    let task = tokio::spawn(async move { run(&controller, bypass, reason).await });
    Some(self.pending.insert(task))
  }
}

impl<T: SyncItem> Drop for RealtimeTrigger<T> {
  fn drop(&mut self) {
    if let Some(poller) = self.poller.take() {
      poller.abort();
    }
    if let Some(pending) = self.pending.take() {
      pending.abort();
    }
  }
}

fn should_run<T: SyncItem>(controller: &ResourceController<T>, reason: TriggerReason) -> bool {
  if controller.is_mutating() {
    debug!(resource = controller.resource(), ?reason, "Mutation in flight, skipping refetch");
    return false;
  }
  if controller.is_backing_off() {
    debug!(resource = controller.resource(), ?reason, "Backing off, skipping refetch");
    return false;
  }
  true
}

async fn run<T: SyncItem>(controller: &ResourceController<T>, bypass: Duration, reason: TriggerReason) {
  debug!(resource = controller.resource(), ?reason, "Realtime refetch");
  controller.open_bypass_window(bypass);
  // Failures are already published on the controller's snapshot
  let _ = controller.refetch(None).await;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::controller::tests::{context, controller, herd, MockService};
  use crate::telemetry::SyncStats;
  use serde_json::json;
  use std::sync::Arc;
  use tokio::sync::Notify;

  const BYPASS: Duration = Duration::from_secs(5);

  fn enabled(poll_interval_ms: Option<u64>) -> RealtimeConfig {
    RealtimeConfig {
      enabled: true,
      poll_interval_ms,
      ..Default::default()
    }
  }

  #[test]
  fn test_poll_interval_is_floored() {
    assert_eq!(enabled(Some(500)).poll_interval(), Some(MIN_POLL_INTERVAL));
    assert_eq!(
      enabled(Some(15_000)).poll_interval(),
      Some(Duration::from_secs(15))
    );
    assert_eq!(enabled(None).poll_interval(), None);
    let disabled = RealtimeConfig {
      enabled: false,
      poll_interval_ms: Some(5_000),
      ..Default::default()
    };
    assert_eq!(disabled.poll_interval(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_polls_on_interval_past_fresh_cache() {
    let service = Arc::new(MockService::with_rows(herd(1..=3)));
    let ctl = controller(service.clone(), context(Arc::new(SyncStats::new())));
    ctl.refetch(None).await.unwrap();

    let trigger = RealtimeTrigger::start(ctl.clone(), enabled(Some(2_000)), BYPASS);
    assert!(trigger.is_polling());
    tokio::time::sleep(Duration::from_millis(4_500)).await;

    assert_eq!(service.calls(), 3);

    drop(trigger);
    tokio::time::sleep(Duration::from_millis(10_000)).await;
    assert_eq!(service.calls(), 3);
  }

  #[tokio::test]
  async fn test_focus_refetches_past_fresh_cache() {
    let service = Arc::new(MockService::with_rows(herd(1..=3)));
    let ctl = controller(service.clone(), context(Arc::new(SyncStats::new())));
    ctl.refetch(None).await.unwrap();
    service.rows.lock().unwrap().push(herd([4]).remove(0));

    let mut trigger = RealtimeTrigger::start(ctl.clone(), enabled(None), BYPASS);
    trigger.notify(TriggerReason::Focus).unwrap().await.unwrap();

    assert_eq!(service.calls(), 2);
    assert_eq!(ctl.snapshot().items.len(), 4);
  }

  #[tokio::test]
  async fn test_focus_respects_config() {
    let service = Arc::new(MockService::with_rows(herd(1..=3)));
    let ctl = controller(service, context(Arc::new(SyncStats::new())));

    let config = RealtimeConfig {
      refetch_on_focus: false,
      ..enabled(None)
    };
    let mut trigger = RealtimeTrigger::start(ctl.clone(), config, BYPASS);
    assert!(trigger.notify(TriggerReason::Focus).is_none());
    assert!(trigger.notify(TriggerReason::Reconnect).is_some());

    let config = RealtimeConfig {
      enabled: false,
      ..Default::default()
    };
    let mut disabled = RealtimeTrigger::start(ctl, config, BYPASS);
    assert!(disabled.notify(TriggerReason::Reconnect).is_none());
  }

  #[tokio::test]
  async fn test_handler_runs_through_registry() {
    let service = Arc::new(MockService::with_rows(herd(1..=3)));
    let ctl = controller(service.clone(), context(Arc::new(SyncStats::new())));
    ctl.refetch(None).await.unwrap();
    let config = RealtimeConfig {
      refetch_on_reconnect: false,
      ..Default::default()
    };
    let trigger = RealtimeTrigger::start(ctl, config, BYPASS);

    let registry = crate::sync::RefetchRegistry::new();
    let _registration = registry.register(trigger.handler());

    registry.refetch_all(TriggerReason::Reconnect).await;
    assert_eq!(service.calls(), 1);
    registry.refetch_all(TriggerReason::Focus).await;
    assert_eq!(service.calls(), 2);
  }

  #[tokio::test]
  async fn test_skipped_while_mutating() {
    let service = Arc::new(MockService::with_rows(herd(1..=3)));
    let gate = Arc::new(Notify::new());
    *service.create_gate.lock().unwrap() = Some(gate.clone());
    let ctl = controller(service.clone(), context(Arc::new(SyncStats::new())));
    let mut trigger = RealtimeTrigger::start(ctl.clone(), enabled(None), BYPASS);

    let creating = {
      let ctl = ctl.clone();
      tokio::spawn(async move { ctl.create_item(&json!({ "name": "calf" })).await })
    };
    while !ctl.is_mutating() {
      tokio::task::yield_now().await;
    }

    assert!(trigger.notify(TriggerReason::Focus).is_none());

    gate.notify_one();
    assert!(creating.await.unwrap().is_some());
    assert!(trigger.notify(TriggerReason::Focus).is_some());
  }
}
