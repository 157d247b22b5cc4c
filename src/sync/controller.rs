//! Per-resource coordinator between the UI, the cache and a data service.
//!
//! A [`ResourceController`] owns the list a view shows for one resource. It
//! decides when to serve the cache, when to go to the network, how to fold
//! recent local writes into lagging server responses, and how mutations
//! invalidate what is cached.

use futures::future::{AbortHandle, Abortable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::service::{merge_patch, DataService, Identified, Page};
use crate::cache::{cache_key, item_key, CacheStore};
use crate::cache::store::now_ms;
use crate::error::{SyncError, SyncResult};
use crate::telemetry::{SyncEvent, SyncEventSink};

use super::coalescer::RequestCoalescer;
use super::ledger::{LedgerWindows, RecencyKind, RecencyLedger};
use super::params::{effective_params, ParamSource, QueryParams};
use super::tombstones::TombstoneStore;

/// Bounds every row type the controller can manage.
pub trait SyncItem:
  Identified + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> SyncItem for T where
  T: Identified + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Pagination metadata of a list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
  pub page: u32,
  pub limit: u32,
  pub total: u64,
  pub total_pages: u32,
  pub has_next_page: Option<bool>,
  pub has_previous_page: Option<bool>,
}

impl PageMeta {
  pub fn from_page<T>(page: &Page<T>) -> Self {
    let limit = page.limit.max(1);
    let page_no = page.page.max(1);
    Self {
      page: page_no,
      limit,
      total: page.total,
      total_pages: page
        .total_pages
        .unwrap_or_else(|| u32::try_from(page.total.div_ceil(limit as u64)).unwrap_or(u32::MAX)),
      has_next_page: page.has_next_page,
      has_previous_page: page.has_previous_page,
    }
  }

  pub fn has_next(&self) -> bool {
    self.has_next_page.unwrap_or(self.page < self.total_pages)
  }

  pub fn has_previous(&self) -> bool {
    self.has_previous_page.unwrap_or(self.page > 1)
  }
}

/// Items in server order, unique by id, with optional page metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceList<T> {
  pub items: Vec<T>,
  pub meta: Option<PageMeta>,
}

impl<T> Default for ResourceList<T> {
  fn default() -> Self {
    Self {
      items: Vec::new(),
      meta: None,
    }
  }
}

impl<T: Identified> ResourceList<T> {
  pub fn from_page(page: Page<T>) -> Self {
    let meta = PageMeta::from_page(&page);
    Self {
      items: dedupe(page.data),
      meta: Some(meta),
    }
  }

  pub fn from_items(items: Vec<T>) -> Self {
    Self {
      items: dedupe(items),
      meta: None,
    }
  }
}

fn dedupe<T: Identified>(items: Vec<T>) -> Vec<T> {
  let mut seen = HashSet::new();
  items.into_iter().filter(|item| seen.insert(item.id())).collect()
}

/// Lifecycle of the controller's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
  Idle,
  Fetching,
  Ready,
  Errored,
}

/// What a view renders. `loading` blocks, `refreshing` does not.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot<T> {
  pub items: Vec<T>,
  pub meta: Option<PageMeta>,
  pub state: LoadState,
  pub loading: bool,
  pub refreshing: bool,
  pub error: Option<String>,
  /// Message from the last failed create/update
  pub mutation_error: Option<String>,
}

/// Result of a successful delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
  Deleted,
  /// The server no longer had the row; local cleanup still happened
  AlreadyDeleted,
}

/// Timing policy of a controller.
#[derive(Debug, Clone, Copy)]
pub struct SyncWindows {
  /// Cache entries younger than this are served without a blocking fetch
  pub fresh: Duration,
  pub cache_ttl: Option<Duration>,
  pub create_bypass: Duration,
  pub update_bypass: Duration,
  pub delete_bypass: Duration,
  pub realtime_bypass: Duration,
  pub ledger: LedgerWindows,
  pub tombstone: Duration,
}

impl Default for SyncWindows {
  fn default() -> Self {
    Self {
      fresh: Duration::from_secs(30),
      cache_ttl: None,
      create_bypass: Duration::from_secs(30),
      update_bypass: Duration::from_secs(30),
      delete_bypass: Duration::from_secs(15),
      realtime_bypass: Duration::from_secs(5),
      ledger: LedgerWindows::default(),
      tombstone: Duration::from_secs(60),
    }
  }
}

/// Shared collaborators for every controller of one row type.
pub struct SyncContext<T> {
  pub cache: Arc<CacheStore>,
  pub tombstones: Arc<TombstoneStore>,
  pub lists: Arc<RequestCoalescer<ResourceList<T>>>,
  pub details: Arc<RequestCoalescer<T>>,
  pub events: Arc<dyn SyncEventSink>,
}

impl<T: SyncItem> SyncContext<T> {
  pub fn new(
    cache: Arc<CacheStore>,
    tombstones: Arc<TombstoneStore>,
    events: Arc<dyn SyncEventSink>,
  ) -> Self {
    Self {
      cache,
      tombstones,
      lists: Arc::new(RequestCoalescer::new().with_events(events.clone())),
      details: Arc::new(RequestCoalescer::new().with_events(events.clone())),
      events,
    }
  }
}

impl<T> Clone for SyncContext<T> {
  fn clone(&self) -> Self {
    Self {
      cache: Arc::clone(&self.cache),
      tombstones: Arc::clone(&self.tombstones),
      lists: Arc::clone(&self.lists),
      details: Arc::clone(&self.details),
      events: Arc::clone(&self.events),
    }
  }
}

/// Identity and defaults of one controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
  /// Leading part of cache keys, usually the API base URL
  pub base: String,
  /// Endpoint name of the resource
  pub resource: String,
  pub defaults: QueryParams,
  pub windows: SyncWindows,
}

impl ControllerOptions {
  pub fn new(base: impl Into<String>, resource: impl Into<String>) -> Self {
    Self {
      base: base.into(),
      resource: resource.into(),
      defaults: QueryParams::new(),
      windows: SyncWindows::default(),
    }
  }

  pub fn with_defaults(mut self, defaults: QueryParams) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn with_windows(mut self, windows: SyncWindows) -> Self {
    self.windows = windows;
    self
  }
}

struct ControllerState<T> {
  list: ResourceList<T>,
  load: LoadState,
  refreshing: bool,
  error: Option<String>,
  mutation_error: Option<String>,
  ledger: RecencyLedger<T>,
  location: ParamSource,
  last_params: QueryParams,
  /// Cache is skipped until this instant (epoch ms)
  bypass_until: i64,
  /// Network refreshes are skipped until this instant (epoch ms)
  backoff_until: i64,
  generation: u64,
  /// Whether a server list has been published since creation
  published: bool,
  in_flight: Option<AbortHandle>,
  background: Option<JoinHandle<()>>,
  mutations: usize,
}

struct Inner<T> {
  service: Arc<dyn DataService<T>>,
  ctx: SyncContext<T>,
  options: ControllerOptions,
  state: Mutex<ControllerState<T>>,
  publisher: watch::Sender<ResourceSnapshot<T>>,
}

impl<T> Drop for Inner<T> {
  fn drop(&mut self) {
    let state = self
      .state
      .get_mut()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = state.in_flight.take() {
      handle.abort();
    }
    if let Some(task) = state.background.take() {
      task.abort();
    }
  }
}

/// Coordinator for one resource's list. Cheap to clone; clones share state.
pub struct ResourceController<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for ResourceController<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

/// Outcome of folding local writes into a server list.
struct Reconciled<T> {
  list: ResourceList<T>,
  reinstated: usize,
  suppressed: usize,
}

/// Merge remembered writes missing from `server` in front of it, cap the
/// result at the page limit (dropping server rows first), then hide ids in
/// `hidden`.
fn reconcile<T: Identified + Clone>(
  server: &ResourceList<T>,
  writes: &[T],
  hidden: &HashSet<String>,
) -> Reconciled<T> {
  let present: HashSet<String> = server.items.iter().map(Identified::id).collect();

  let mut seen = HashSet::new();
  let missing: Vec<T> = writes
    .iter()
    .filter(|item| {
      let id = item.id();
      !present.contains(&id) && seen.insert(id)
    })
    .cloned()
    .collect();
  let reinstated = missing.len();

  let mut items = missing;
  items.extend(server.items.iter().cloned());

  if let Some(meta) = &server.meta {
    let cap = (meta.limit as usize).max(reinstated);
    if items.len() > cap {
      items.truncate(cap);
    }
  }

  let before = items.len();
  items.retain(|item| !hidden.contains(&item.id()));
  let suppressed = before - items.len();

  Reconciled {
    list: ResourceList {
      items,
      meta: server.meta,
    },
    reinstated,
    suppressed,
  }
}

/// Load state to fall back to when a fetch ends without a result. A
/// `Fetching` left behind by a superseded fetch settles on whether a list
/// was ever published.
fn settled_load<T>(state: &ControllerState<T>) -> LoadState {
  match state.load {
    LoadState::Fetching if state.published => LoadState::Ready,
    LoadState::Fetching => LoadState::Idle,
    other => other,
  }
}

/// Decrements the mutation counter when a mutation settles.
struct MutationGuard<'a, T: SyncItem> {
  controller: &'a ResourceController<T>,
}

impl<T: SyncItem> Drop for MutationGuard<'_, T> {
  fn drop(&mut self) {
    let mut state = self.controller.lock();
    state.mutations = state.mutations.saturating_sub(1);
  }
}

impl<T: SyncItem> ResourceController<T> {
  pub fn new(
    service: Arc<dyn DataService<T>>,
    ctx: SyncContext<T>,
    options: ControllerOptions,
  ) -> Self {
    let state = ControllerState {
      list: ResourceList::default(),
      load: LoadState::Idle,
      refreshing: false,
      error: None,
      mutation_error: None,
      ledger: RecencyLedger::new(options.windows.ledger),
      location: ParamSource::new(),
      last_params: QueryParams::new(),
      bypass_until: 0,
      backoff_until: 0,
      generation: 0,
      published: false,
      in_flight: None,
      background: None,
      mutations: 0,
    };
    let (publisher, _) = watch::channel(snapshot_of(&state));

    Self {
      inner: Arc::new(Inner {
        service,
        ctx,
        options,
        state: Mutex::new(state),
        publisher,
      }),
    }
  }

  pub fn resource(&self) -> &str {
    &self.inner.options.resource
  }

  /// Receiver that observes every published snapshot.
  pub fn subscribe(&self) -> watch::Receiver<ResourceSnapshot<T>> {
    self.inner.publisher.subscribe()
  }

  pub fn snapshot(&self) -> ResourceSnapshot<T> {
    snapshot_of(&self.lock())
  }

  pub fn location(&self) -> ParamSource {
    self.lock().location.clone()
  }

  /// Whether a create/update/delete is awaiting the server.
  pub fn is_mutating(&self) -> bool {
    self.lock().mutations > 0
  }

  /// Whether a rate-limit backoff window is open.
  pub fn is_backing_off(&self) -> bool {
    now_ms() < self.lock().backoff_until
  }

  /// Make fetches skip the cache for `window`.
  pub fn open_bypass_window(&self, window: Duration) {
    let until = now_ms() + window.as_millis() as i64;
    let mut state = self.lock();
    state.bypass_until = state.bypass_until.max(until);
    debug!(resource = self.resource(), ?window, "Cache bypass window opened");
  }

  /// Cache key of the list query `params` would produce right now.
  #[cfg(test)]
  pub fn cache_key_for(&self, params: &QueryParams) -> String {
    let state = self.lock();
    let effective = effective_params(params, &state.location, &self.inner.options.defaults);
    cache_key(&self.inner.options.base, self.resource(), &effective)
  }

  /// Fetch the list, from cache when fresh and from the network otherwise.
  ///
  /// `None` reuses the params of the previous call. A newer call cancels
  /// this controller's previous in-flight fetch, which then resolves to the
  /// current items instead of failing.
  pub async fn refetch(&self, params: Option<QueryParams>) -> SyncResult<Vec<T>> {
    let now = now_ms();
    let resource = self.resource().to_string();

    let (effective, key, generation, registration, bypass) = {
      let mut state = self.lock();
      if let Some(params) = params {
        state.last_params = params;
      }
      let effective =
        effective_params(&state.last_params, &state.location, &self.inner.options.defaults);
      let key = cache_key(&self.inner.options.base, &resource, &effective);

      if let Some(previous) = state.in_flight.take() {
        previous.abort();
      }
      state.generation += 1;

      if now < state.backoff_until {
        self.inner.ctx.events.emit(&SyncEvent::RateLimited {
          resource: resource.clone(),
        });
        if state.load == LoadState::Ready {
          debug!(resource, "Rate limited, serving current list");
          return Ok(state.list.items.clone());
        }
        return Err(SyncError::RateLimited {
          retry_after: Duration::from_millis((state.backoff_until - now) as u64),
        });
      }

      let (handle, registration) = AbortHandle::new_pair();
      state.in_flight = Some(handle);
      let bypass = now < state.bypass_until;
      (effective, key, state.generation, registration, bypass)
    };

    if bypass {
      debug!(key, "Cache bypass window active, fetching fresh");
    } else if let Some(entry) = self
      .inner
      .ctx
      .cache
      .get_entry_at::<ResourceList<T>>(&key, now)
    {
      if entry.age_at(now) < self.inner.options.windows.fresh.as_millis() as i64 {
        debug!(key, "Cache hit");
        self.inner.ctx.events.emit(&SyncEvent::CacheHit { key: key.clone() });
        let items = self.publish_server_list(&entry.data, generation, now);
        if let Some(items) = items {
          self.spawn_background_refresh(key, effective, generation);
          return Ok(items);
        }
        return Ok(self.lock().list.items.clone());
      }
    }

    self.inner.ctx.events.emit(&SyncEvent::CacheMiss { key: key.clone() });
    let prior = self.update(|state| {
      let prior = (settled_load(state), state.error.take());
      state.load = LoadState::Fetching;
      prior
    });

    let request = self
      .inner
      .ctx
      .lists
      .run_deduped(&key, self.producer(effective));
    let result = Abortable::new(request, registration).await;

    let now = now_ms();
    match result {
      Err(_aborted) => {
        debug!(key, "Superseded fetch discarded");
        Ok(self.lock().list.items.clone())
      }
      Ok(Err(e)) if e.is_cancelled() => {
        debug!(key, "Fetch cancelled, keeping previous state");
        let restored = {
          let mut state = self.lock();
          if state.generation != generation {
            return Ok(state.list.items.clone());
          }
          let (load, error) = prior;
          state.in_flight = None;
          state.load = load;
          state.error = error;
          snapshot_of(&state)
        };
        let items = restored.items.clone();
        self.inner.publisher.send_replace(restored);
        Ok(items)
      }
      Ok(Ok(server)) => {
        self.inner.ctx.cache.set_at(
          &key,
          &server,
          self.inner.options.windows.cache_ttl,
          now,
        );
        match self.publish_server_list(&server, generation, now) {
          Some(items) => Ok(items),
          None => Ok(self.lock().list.items.clone()),
        }
      }
      Ok(Err(e)) => {
        warn!(key, error = %e, "List fetch failed");
        let current = {
          let mut state = self.lock();
          if state.generation != generation {
            return Ok(state.list.items.clone());
          }
          state.in_flight = None;
          self.note_rate_limit(&mut state, &e, now);
          state.load = LoadState::Errored;
          state.error = Some(e.to_string());
          snapshot_of(&state)
        };
        self.inner.publisher.send_replace(current);
        Err(e)
      }
    }
  }

  /// Move to `page` and refetch.
  pub async fn set_page(&self, page: u32) -> SyncResult<Vec<T>> {
    self.relocate(|location| location.set_page(page)).await
  }

  /// Change the page size and refetch from the first page.
  pub async fn set_limit(&self, limit: u32) -> SyncResult<Vec<T>> {
    self.relocate(|location| location.set_limit(limit)).await
  }

  /// Change the search term and refetch from the first page.
  pub async fn set_search(&self, search: &str) -> SyncResult<Vec<T>> {
    self.relocate(|location| location.set_search(search)).await
  }

  pub async fn set_sort(&self, sort: Option<&str>) -> SyncResult<Vec<T>> {
    self.relocate(|location| location.set_sort(sort)).await
  }

  /// Restrict the returned columns, e.g. `id,name,breed`.
  pub async fn set_fields(&self, fields: Option<&str>) -> SyncResult<Vec<T>> {
    self.relocate(|location| location.set_fields(fields)).await
  }

  /// Replace the whole location source (e.g. when navigating) and refetch.
  pub async fn set_location(&self, location: ParamSource) -> SyncResult<Vec<T>> {
    self.relocate(|current| *current = location).await
  }

  /// Apply `change` to the location and refetch. While backing off the
  /// location is left as is, so it keeps describing the list on screen.
  async fn relocate(&self, change: impl FnOnce(&mut ParamSource)) -> SyncResult<Vec<T>> {
    {
      let mut state = self.lock();
      let now = now_ms();
      if now < state.backoff_until {
        debug!(resource = self.resource(), "Rate limited, location unchanged");
        return Err(SyncError::RateLimited {
          retry_after: Duration::from_millis((state.backoff_until - now) as u64),
        });
      }
      change(&mut state.location);
    }
    self.refetch(None).await
  }

  /// Create a row. `None` when the request failed or was cancelled.
  pub async fn create_item(&self, payload: &Value) -> Option<T> {
    let _guard = self.begin_mutation();

    let created = match self.inner.service.create(payload).await {
      Ok(created) => created,
      Err(e) => return self.mutation_failed("create", e),
    };

    let now = now_ms();
    let id = created.id();
    info!(resource = self.resource(), id, "Created");
    self.invalidate_resource();
    self.update(|state| {
      state
        .ledger
        .remember(&id, Some(created.clone()), RecencyKind::Created, now);
      extend_bypass(state, now, self.inner.options.windows.create_bypass);
      state.list.items.retain(|item| item.id() != id);
      state.list.items.insert(0, created.clone());
      if let Some(meta) = state.list.meta.as_mut() {
        meta.total += 1;
      }
      state.mutation_error = None;
    });

    Some(created)
  }

  /// Update a row. `None` when the request failed or was cancelled.
  pub async fn update_item(&self, id: &str, payload: &Value) -> Option<T> {
    let _guard = self.begin_mutation();

    let updated = match self.inner.service.update(id, payload).await {
      Ok(updated) => updated,
      Err(e) => return self.mutation_failed("update", e),
    };

    let now = now_ms();
    info!(resource = self.resource(), id, "Updated");
    self.invalidate_resource();
    let server_fields = serde_json::to_value(&updated).unwrap_or(Value::Null);
    let merged = self.update(|state| {
      let mut merged = updated.clone();
      if let Some(local) = state.list.items.iter_mut().find(|item| item.id() == id) {
        merged = merge_patch(&merge_patch(local, payload), &server_fields);
        *local = merged.clone();
      }
      state
        .ledger
        .remember(id, Some(merged.clone()), RecencyKind::Updated, now);
      extend_bypass(state, now, self.inner.options.windows.update_bypass);
      state.mutation_error = None;
      merged
    });

    Some(merged)
  }

  /// Delete a row, removing it locally right away.
  ///
  /// A not-found response still cleans up and yields
  /// [`DeleteOutcome::AlreadyDeleted`]. Other failures are returned as is and
  /// local state is left untouched.
  pub async fn delete_item(&self, id: &str) -> SyncResult<DeleteOutcome> {
    let _guard = self.begin_mutation();

    let outcome = match self.inner.service.delete(id).await {
      Ok(_) => DeleteOutcome::Deleted,
      Err(e) if e.is_not_found() => {
        info!(resource = self.resource(), id, "Row was already deleted upstream");
        DeleteOutcome::AlreadyDeleted
      }
      Err(e) => {
        warn!(resource = self.resource(), id, error = %e, "Delete failed");
        return Err(e);
      }
    };

    let now = now_ms();
    let windows = self.inner.options.windows;
    self
      .inner
      .ctx
      .tombstones
      .add_at(self.resource(), id, windows.tombstone, now);
    self.invalidate_resource();
    self.update(|state| {
      if state.ledger.is_live(id, RecencyKind::Created, now) {
        debug!(resource = self.resource(), id, "Dropping local create of deleted row");
      }
      state.ledger.forget(id);
      state.ledger.remember(id, None, RecencyKind::Deleted, now);
      extend_bypass(state, now, windows.delete_bypass);
      let before = state.list.items.len();
      state.list.items.retain(|item| item.id() != id);
      if state.list.items.len() < before {
        if let Some(meta) = state.list.meta.as_mut() {
          meta.total = meta.total.saturating_sub(1);
        }
      }
    });

    Ok(outcome)
  }

  /// Fetch one row through the cache, for detail views.
  pub async fn fetch_one(&self, id: &str) -> SyncResult<T> {
    let now = now_ms();
    let key = item_key(&self.inner.options.base, self.resource(), id);
    let bypass = now < self.lock().bypass_until;

    if !bypass {
      if let Some(entry) = self.inner.ctx.cache.get_entry_at::<T>(&key, now) {
        if entry.age_at(now) < self.inner.options.windows.fresh.as_millis() as i64 {
          self.inner.ctx.events.emit(&SyncEvent::CacheHit { key });
          return Ok(entry.data);
        }
      }
    }

    self.inner.ctx.events.emit(&SyncEvent::CacheMiss { key: key.clone() });
    let service = Arc::clone(&self.inner.service);
    let id_owned = id.to_string();
    let item = self
      .inner
      .ctx
      .details
      .run_deduped(&key, move || async move { service.get_by_id(&id_owned).await })
      .await?;

    self
      .inner
      .ctx
      .cache
      .set(&key, &item, self.inner.options.windows.cache_ttl);
    Ok(item)
  }

  /// Wait for a pending background refresh to finish.
  #[cfg(test)]
  pub async fn settle(&self) {
    let task = self.lock().background.take();
    if let Some(task) = task {
      let _ = task.await;
    }
  }

  fn producer(
    &self,
    effective: QueryParams,
  ) -> impl FnOnce() -> futures::future::BoxFuture<'static, SyncResult<ResourceList<T>>> {
    let service = Arc::clone(&self.inner.service);
    move || {
      Box::pin(async move {
        if effective.is_paged() {
          let page = service.list_paged(&effective).await?;
          Ok(ResourceList::from_page(page))
        } else {
          let items = service.list_all(&effective).await?;
          Ok(ResourceList::from_items(items))
        }
      })
    }
  }

  /// Reconcile a server list and publish it if `generation` is still current.
  /// Returns the published items.
  fn publish_server_list(
    &self,
    server: &ResourceList<T>,
    generation: u64,
    now: i64,
  ) -> Option<Vec<T>> {
    let resource = self.resource();
    let hidden = self.inner.ctx.tombstones.hidden_ids_at(resource, now);

    let (reconciled, snapshot) = {
      let mut state = self.lock();
      if state.generation != generation {
        return None;
      }

      let mut hidden = hidden;
      hidden.extend(state.ledger.all_live(RecencyKind::Deleted, now));
      let writes: Vec<T> = state
        .ledger
        .live_writes(now)
        .into_iter()
        .filter_map(|record| record.item.clone())
        .collect();

      let reconciled = reconcile(server, &writes, &hidden);
      state.list = reconciled.list.clone();
      state.load = LoadState::Ready;
      state.published = true;
      state.error = None;
      state.in_flight = None;
      (reconciled, snapshot_of(&state))
    };

    if reconciled.reinstated > 0 {
      debug!(resource, count = reconciled.reinstated, "Reinstated recent writes");
      self.inner.ctx.events.emit(&SyncEvent::Reinstated {
        resource: resource.to_string(),
        count: reconciled.reinstated,
      });
    }
    if reconciled.suppressed > 0 {
      debug!(resource, count = reconciled.suppressed, "Hid recently deleted rows");
      self.inner.ctx.events.emit(&SyncEvent::Suppressed {
        resource: resource.to_string(),
        count: reconciled.suppressed,
      });
    }

    self.inner.publisher.send_replace(snapshot);
    Some(reconciled.list.items)
  }

  /// Refresh `key` in the background after serving it from cache.
  fn spawn_background_refresh(&self, key: String, effective: QueryParams, generation: u64) {
    let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
    let producer = self.producer(effective);
    let lists = Arc::clone(&self.inner.ctx.lists);

    self.update(|state| state.refreshing = true);

    let task = tokio::spawn(async move {
      let result = lists.run_deduped(&key, producer).await;
      let Some(inner) = weak.upgrade() else {
        return;
      };
      let controller = ResourceController { inner };
      let now = now_ms();

      match result {
        Ok(server) => {
          controller
            .inner
            .ctx
            .cache
            .set_at(&key, &server, controller.inner.options.windows.cache_ttl, now);
          controller.publish_server_list(&server, generation, now);
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
          warn!(key, error = %e, "Background refresh failed");
          controller
            .inner
            .ctx
            .events
            .emit(&SyncEvent::BackgroundRefreshFailed {
              key: key.clone(),
              message: e.to_string(),
            });
          controller.update(|state| controller.note_rate_limit(state, &e, now));
        }
      }
      controller.update(|state| state.refreshing = false);
    });

    let mut state = self.lock();
    if let Some(previous) = state.background.replace(task) {
      previous.abort();
    }
  }

  fn note_rate_limit(&self, state: &mut ControllerState<T>, error: &SyncError, now: i64) {
    if let SyncError::RateLimited { retry_after } = error {
      state.backoff_until = now + retry_after.as_millis() as i64;
      warn!(resource = self.resource(), ?retry_after, "Backing off after rate limit");
      self.inner.ctx.events.emit(&SyncEvent::RateLimited {
        resource: self.resource().to_string(),
      });
    }
  }

  fn begin_mutation(&self) -> MutationGuard<'_, T> {
    self.lock().mutations += 1;
    MutationGuard { controller: self }
  }

  fn mutation_failed<R>(&self, action: &str, error: SyncError) -> Option<R> {
    if error.is_cancelled() {
      debug!(resource = self.resource(), action, "Mutation cancelled");
      return None;
    }
    warn!(resource = self.resource(), action, error = %error, "Mutation failed");
    self.update(|state| state.mutation_error = Some(error.to_string()));
    None
  }

  fn invalidate_resource(&self) {
    self
      .inner
      .ctx
      .cache
      .invalidate_by_endpoint(&self.inner.options.base, self.resource());
  }

  /// Mutate state and publish the resulting snapshot.
  fn update<R>(&self, change: impl FnOnce(&mut ControllerState<T>) -> R) -> R {
    let (result, snapshot) = {
      let mut state = self.lock();
      let result = change(&mut state);
      (result, snapshot_of(&state))
    };
    self.inner.publisher.send_replace(snapshot);
    result
  }

  fn lock(&self) -> MutexGuard<'_, ControllerState<T>> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

fn extend_bypass<T>(state: &mut ControllerState<T>, now: i64, window: Duration) {
  state.bypass_until = state.bypass_until.max(now + window.as_millis() as i64);
}

fn snapshot_of<T: Clone>(state: &ControllerState<T>) -> ResourceSnapshot<T> {
  ResourceSnapshot {
    items: state.list.items.clone(),
    meta: state.list.meta,
    state: state.load,
    loading: state.load == LoadState::Fetching,
    refreshing: state.refreshing,
    error: state.error.clone(),
    mutation_error: state.mutation_error.clone(),
  }
}
