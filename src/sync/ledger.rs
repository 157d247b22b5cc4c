//! Short-lived bookkeeping of recent local writes.
//!
//! Servers behind read replicas can return list responses that do not yet
//! reflect a create, update or delete this client just made. The ledger
//! remembers those writes for a bounded window so responses can be
//! reconciled against them.

use std::collections::HashMap;
use std::time::Duration;

/// Kind of local write being remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecencyKind {
  Created,
  Updated,
  Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecencyRecord<T> {
  pub id: String,
  pub item: Option<T>,
  /// Epoch milliseconds
  pub recorded_at: i64,
  pub kind: RecencyKind,
}

/// How long each kind of record stays live.
#[derive(Debug, Clone, Copy)]
pub struct LedgerWindows {
  pub written: Duration,
  pub deleted: Duration,
}

impl Default for LedgerWindows {
  fn default() -> Self {
    Self {
      written: Duration::from_secs(120),
      deleted: Duration::from_secs(10),
    }
  }
}

impl LedgerWindows {
  fn ttl_ms(&self, kind: RecencyKind) -> i64 {
    let ttl = match kind {
      RecencyKind::Created | RecencyKind::Updated => self.written,
      RecencyKind::Deleted => self.deleted,
    };
    ttl.as_millis() as i64
  }
}

/// At most one live record per id; a newer write replaces the older one.
#[derive(Debug, Clone)]
pub struct RecencyLedger<T> {
  records: HashMap<String, RecencyRecord<T>>,
  windows: LedgerWindows,
}

impl<T: Clone> RecencyLedger<T> {
  pub fn new(windows: LedgerWindows) -> Self {
    Self {
      records: HashMap::new(),
      windows,
    }
  }

  /// Upsert a record, evicting every record past its window first.
  pub fn remember(&mut self, id: &str, item: Option<T>, kind: RecencyKind, now: i64) {
    self.evict_expired(now);
    self.records.insert(
      id.to_string(),
      RecencyRecord {
        id: id.to_string(),
        item,
        recorded_at: now,
        kind,
      },
    );
  }

  pub fn forget(&mut self, id: &str) {
    self.records.remove(id);
  }

  pub fn is_live(&self, id: &str, kind: RecencyKind, now: i64) -> bool {
    self
      .records
      .get(id)
      .is_some_and(|r| r.kind == kind && self.live(r, now))
  }

  /// Ids with a live record of `kind`.
  pub fn all_live(&self, kind: RecencyKind, now: i64) -> Vec<String> {
    self
      .live_records(kind, now)
      .map(|r| r.id.clone())
      .collect()
  }

  /// Live created/updated records, most recent first.
  pub fn live_writes(&self, now: i64) -> Vec<&RecencyRecord<T>> {
    let mut writes: Vec<_> = self
      .live_records(RecencyKind::Created, now)
      .chain(self.live_records(RecencyKind::Updated, now))
      .collect();
    writes.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(a.id.cmp(&b.id)));
    writes
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  fn live_records(
    &self,
    kind: RecencyKind,
    now: i64,
  ) -> impl Iterator<Item = &RecencyRecord<T>> + '_ {
    self
      .records
      .values()
      .filter(move |r| r.kind == kind && self.live(r, now))
  }

  fn live(&self, record: &RecencyRecord<T>, now: i64) -> bool {
    now - record.recorded_at <= self.windows.ttl_ms(record.kind)
  }

  fn evict_expired(&mut self, now: i64) {
    let windows = self.windows;
    self
      .records
      .retain(|_, r| now - r.recorded_at <= windows.ttl_ms(r.kind));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ledger() -> RecencyLedger<&'static str> {
    RecencyLedger::new(LedgerWindows::default())
  }

  #[test]
  fn test_new_write_replaces_prior_record() {
    let mut ledger = ledger();
    ledger.remember("7", Some("v1"), RecencyKind::Created, 0);
    ledger.remember("7", Some("v2"), RecencyKind::Updated, 10);

    assert_eq!(ledger.len(), 1);
    assert!(!ledger.is_live("7", RecencyKind::Created, 10));
    assert!(ledger.is_live("7", RecencyKind::Updated, 10));
    assert_eq!(ledger.live_writes(10)[0].item, Some("v2"));
  }

  #[test]
  fn test_windows_differ_by_kind() {
    let mut ledger = ledger();
    ledger.remember("1", Some("a"), RecencyKind::Created, 0);
    ledger.remember("2", None, RecencyKind::Deleted, 0);

    assert!(ledger.is_live("2", RecencyKind::Deleted, 10_000));
    assert!(!ledger.is_live("2", RecencyKind::Deleted, 10_001));
    assert!(ledger.is_live("1", RecencyKind::Created, 120_000));
    assert!(!ledger.is_live("1", RecencyKind::Created, 120_001));
  }

  #[test]
  fn test_remember_evicts_lazily() {
    let mut ledger = ledger();
    ledger.remember("old", None, RecencyKind::Deleted, 0);
    assert_eq!(ledger.len(), 1);

    ledger.remember("new", Some("n"), RecencyKind::Created, 60_000);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.all_live(RecencyKind::Created, 60_000), vec!["new"]);
  }

  #[test]
  fn test_forget_removes_record() {
    let mut ledger = ledger();
    ledger.remember("5", Some("x"), RecencyKind::Created, 0);
    ledger.forget("5");
    ledger.forget("5");
    assert!(ledger.all_live(RecencyKind::Created, 0).is_empty());
  }

  #[test]
  fn test_live_writes_most_recent_first() {
    let mut ledger = ledger();
    ledger.remember("a", Some("a"), RecencyKind::Created, 100);
    ledger.remember("b", Some("b"), RecencyKind::Updated, 200);
    ledger.remember("c", None, RecencyKind::Deleted, 300);

    let ids: Vec<_> = ledger.live_writes(300).iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
  }
}
