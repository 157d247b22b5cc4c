//! Structured sync events and counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observable decision points in the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  CacheHit { key: String },
  CacheMiss { key: String },
  /// A caller joined a request already in flight for the same key
  CoalescedJoin { key: String },
  /// Locally written rows re-inserted into a lagging server response
  Reinstated { resource: String, count: usize },
  /// Rows hidden because they were recently deleted
  Suppressed { resource: String, count: usize },
  BackgroundRefreshFailed { key: String, message: String },
  RateLimited { resource: String },
}

/// Receiver for sync events.
pub trait SyncEventSink: Send + Sync {
  fn emit(&self, event: &SyncEvent);
}

/// Atomic counters over the sync event stream.
#[derive(Debug, Default)]
pub struct SyncStats {
  cache_hits: AtomicU64,
  cache_misses: AtomicU64,
  coalesced_joins: AtomicU64,
  reinstated: AtomicU64,
  suppressed: AtomicU64,
  refresh_failures: AtomicU64,
  rate_limited: AtomicU64,
}

/// Point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
  pub cache_hits: u64,
  pub cache_misses: u64,
  pub coalesced_joins: u64,
  pub reinstated: u64,
  pub suppressed: u64,
  pub refresh_failures: u64,
  pub rate_limited: u64,
}

impl SyncStats {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      cache_hits: self.cache_hits.load(Ordering::Relaxed),
      cache_misses: self.cache_misses.load(Ordering::Relaxed),
      coalesced_joins: self.coalesced_joins.load(Ordering::Relaxed),
      reinstated: self.reinstated.load(Ordering::Relaxed),
      suppressed: self.suppressed.load(Ordering::Relaxed),
      refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
      rate_limited: self.rate_limited.load(Ordering::Relaxed),
    }
  }
}

impl SyncEventSink for SyncStats {
  fn emit(&self, event: &SyncEvent) {
    let (counter, amount) = match event {
      SyncEvent::CacheHit { .. } => (&self.cache_hits, 1),
      SyncEvent::CacheMiss { .. } => (&self.cache_misses, 1),
      SyncEvent::CoalescedJoin { .. } => (&self.coalesced_joins, 1),
      SyncEvent::Reinstated { count, .. } => (&self.reinstated, *count as u64),
      SyncEvent::Suppressed { count, .. } => (&self.suppressed, *count as u64),
      SyncEvent::BackgroundRefreshFailed { .. } => (&self.refresh_failures, 1),
      SyncEvent::RateLimited { .. } => (&self.rate_limited, 1),
    };
    counter.fetch_add(amount, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stats_count_events() {
    let stats = SyncStats::new();
    stats.emit(&SyncEvent::CacheHit { key: "k".into() });
    stats.emit(&SyncEvent::CacheHit { key: "k".into() });
    stats.emit(&SyncEvent::Reinstated {
      resource: "animals".into(),
      count: 3,
    });

    let snap = stats.snapshot();
    assert_eq!(snap.cache_hits, 2);
    assert_eq!(snap.reinstated, 3);
    assert_eq!(snap.cache_misses, 0);
  }
}
