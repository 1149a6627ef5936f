//! In-memory query cache: `QueryKey -> QueryRecord`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::key::{QueryKey, Resource};
use super::mutation::{InvalidationPlan, InvalidationTarget};
use crate::api::error::ApiError;

/// How responses for the same key that resolve out of order are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrdering {
  /// Whatever completes last wins, even if it was issued first
  #[default]
  LastCompleted,
  /// Responses older than the newest applied one are dropped
  LastIssued,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Age after which a record is considered stale
  pub stale_time: Duration,
  /// How long an unobserved record survives before garbage collection
  pub gc_time: Duration,
  pub ordering: ResponseOrdering,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      gc_time: Duration::from_secs(300),
      ordering: ResponseOrdering::LastCompleted,
    }
  }
}

/// Change notifications broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// A new value or error was stored
  Updated(QueryKey),
  /// The record was marked stale while observed; observers should refetch
  Invalidated(QueryKey),
  /// The record was dropped (its entity no longer exists)
  Removed(QueryKey),
}

impl CacheEvent {
  pub fn key(&self) -> &QueryKey {
    match self {
      CacheEvent::Updated(k) | CacheEvent::Invalidated(k) | CacheEvent::Removed(k) => k,
    }
  }
}

/// Cached value plus freshness and fetch metadata for one key.
#[derive(Debug, Clone)]
pub struct QueryRecord {
  value: Option<Value>,
  updated_at: Option<Instant>,
  invalidated: bool,
  /// Latest issued fetch at the time of the last invalidation
  invalidated_at_seq: u64,
  error: Option<ApiError>,
  in_flight: usize,
  idle_since: Option<Instant>,
  issued_seq: u64,
  applied_seq: u64,
}

impl QueryRecord {
  fn new() -> Self {
    Self {
      value: None,
      updated_at: None,
      invalidated: false,
      invalidated_at_seq: 0,
      error: None,
      in_flight: 0,
      idle_since: Some(Instant::now()),
      issued_seq: 0,
      applied_seq: 0,
    }
  }

  fn is_stale(&self, stale_time: Duration) -> bool {
    self.invalidated
      || self
        .updated_at
        .map(|t| t.elapsed() >= stale_time)
        .unwrap_or(true)
  }
}

/// What a consumer sees when reading a key.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
  pub data: Option<T>,
  pub is_stale: bool,
  /// Stale because of an explicit invalidation (not just age)
  pub is_invalidated: bool,
  pub is_fetching: bool,
  pub error: Option<ApiError>,
  /// A write to the same entity (or collection) has not resolved yet
  pub mutation_pending: bool,
  pub updated_at: Option<Instant>,
}

impl<T> Snapshot<T> {
  /// Data is present and nothing suggests it is outdated
  pub fn is_fresh(&self) -> bool {
    self.data.is_some() && !self.is_stale && !self.mutation_pending
  }
}

/// Handle to a fetch started with `begin_fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
  key: QueryKey,
  seq: u64,
}

#[derive(Debug, Clone)]
struct PendingMutation {
  resource: Resource,
  id: Option<u64>,
}

#[derive(Default)]
struct CacheInner {
  records: HashMap<QueryKey, QueryRecord>,
  observers: HashMap<QueryKey, usize>,
  mutations: HashMap<u64, PendingMutation>,
  next_mutation: u64,
}

impl CacheInner {
  fn mutation_pending(&self, key: &QueryKey) -> bool {
    let resource = key.resource();
    let entity = key.entity_id();
    self.mutations.values().any(|m| {
      m.resource == resource
        && match (m.id, entity) {
          (Some(a), Some(b)) => a == b,
          _ => true,
        }
    })
  }
}

/// Shared query cache. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Mutex<CacheInner>>,
  events: broadcast::Sender<CacheEvent>,
  config: CacheConfig,
}

impl QueryCache {
  pub fn new(config: CacheConfig) -> Self {
    let (events, _rx) = broadcast::channel(256);
    Self {
      inner: Arc::new(Mutex::new(CacheInner::default())),
      events,
      config,
    }
  }

  fn lock(&self) -> MutexGuard<'_, CacheInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, event: CacheEvent) {
    trace!(?event, "Cache event");
    // No receivers is fine
    let _ = self.events.send(event);
  }

  /// Read a record. `None` if the key was never fetched or set.
  pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<Snapshot<T>>, ApiError> {
    let inner = self.lock();
    let Some(record) = inner.records.get(key) else {
      return Ok(None);
    };

    let data = match &record.value {
      Some(value) => Some(serde_json::from_value(value.clone())?),
      None => None,
    };

    Ok(Some(Snapshot {
      data,
      is_stale: record.is_stale(self.config.stale_time),
      is_invalidated: record.invalidated,
      is_fetching: record.in_flight > 0,
      error: record.error.clone(),
      mutation_pending: inner.mutation_pending(key),
      updated_at: record.updated_at,
    }))
  }

  /// Replace the value for a key.
  pub fn set<T: Serialize + ?Sized>(&self, key: &QueryKey, value: &T) -> Result<(), ApiError> {
    let value = serde_json::to_value(value)?;
    {
      let mut inner = self.lock();
      let record = inner
        .records
        .entry(key.clone())
        .or_insert_with(QueryRecord::new);
      record.value = Some(value);
      record.updated_at = Some(Instant::now());
      record.invalidated = false;
      record.error = None;
    }
    self.emit(CacheEvent::Updated(key.clone()));
    Ok(())
  }

  /// Mark a key stale. Observed keys get an `Invalidated` event so their
  /// consumers refetch; unobserved ones refresh on next mount.
  ///
  /// Returns whether a record existed.
  pub fn invalidate(&self, key: &QueryKey) -> bool {
    let observed = {
      let mut inner = self.lock();
      let observed = inner.observers.get(key).copied().unwrap_or(0) > 0;
      let Some(record) = inner.records.get_mut(key) else {
        return false;
      };
      record.invalidated = true;
      record.invalidated_at_seq = record.issued_seq;
      observed
    };

    debug!(key = %key, observed, "Invalidated");
    if observed {
      self.emit(CacheEvent::Invalidated(key.clone()));
    }
    true
  }

  /// Invalidate every key matching `predicate`, returning those keys.
  pub fn invalidate_where<F>(&self, predicate: F) -> Vec<QueryKey>
  where
    F: Fn(&QueryKey) -> bool,
  {
    let mut keys: Vec<QueryKey> = self
      .lock()
      .records
      .keys()
      .filter(|k| predicate(k))
      .cloned()
      .collect();
    keys.sort();

    keys.retain(|k| self.invalidate(k));
    keys
  }

  /// Drop a record entirely.
  pub fn remove(&self, key: &QueryKey) -> bool {
    let removed = self.lock().records.remove(key).is_some();
    if removed {
      debug!(key = %key, "Removed");
      self.emit(CacheEvent::Removed(key.clone()));
    }
    removed
  }

  /// Apply a mutation's invalidation plan. Returns the keys touched.
  pub fn apply(&self, plan: &InvalidationPlan) -> Vec<QueryKey> {
    let mut touched = Vec::new();

    for key in plan.removals() {
      if self.remove(key) {
        touched.push(key.clone());
      }
    }

    for target in plan.invalidations() {
      match target {
        InvalidationTarget::Key(key) => {
          if self.invalidate(key) {
            touched.push(key.clone());
          }
        }
        InvalidationTarget::FilteredLists(resource) => {
          let resource = *resource;
          touched.extend(self.invalidate_where(|k| k.is_filtered_list_of(resource)));
        }
      }
    }

    touched.sort();
    touched.dedup();
    touched
  }

  /// Register a consumer of `key`. The record is created if missing.
  pub fn subscribe(&self, key: &QueryKey) -> Subscription {
    {
      let mut inner = self.lock();
      *inner.observers.entry(key.clone()).or_insert(0) += 1;
      let record = inner
        .records
        .entry(key.clone())
        .or_insert_with(QueryRecord::new);
      record.idle_since = None;
    }

    Subscription {
      key: key.clone(),
      cache: self.clone(),
      events: self.events.subscribe(),
    }
  }

  fn unsubscribe(&self, key: &QueryKey) {
    let mut inner = self.lock();
    let remaining = match inner.observers.get_mut(key) {
      Some(count) => {
        *count = count.saturating_sub(1);
        *count
      }
      None => return,
    };

    if remaining == 0 {
      inner.observers.remove(key);
      if let Some(record) = inner.records.get_mut(key) {
        record.idle_since = Some(Instant::now());
      }
    }
  }

  #[cfg(test)]
  pub fn observer_count(&self, key: &QueryKey) -> usize {
    self.lock().observers.get(key).copied().unwrap_or(0)
  }

  /// Note that a fetch for `key` was issued.
  pub fn begin_fetch(&self, key: &QueryKey) -> FetchTicket {
    let mut inner = self.lock();
    let record = inner
      .records
      .entry(key.clone())
      .or_insert_with(QueryRecord::new);
    record.issued_seq += 1;
    record.in_flight += 1;

    FetchTicket {
      key: key.clone(),
      seq: record.issued_seq,
    }
  }

  /// Store the outcome of a fetch. Returns whether it was applied.
  ///
  /// Results for records that were removed in the meantime are ignored.
  /// Under `LastIssued` ordering, results older than the newest applied
  /// one are dropped as well.
  pub fn complete_fetch(&self, ticket: FetchTicket, result: Result<Value, ApiError>) -> bool {
    {
      let mut inner = self.lock();
      let Some(record) = inner.records.get_mut(&ticket.key) else {
        return false;
      };
      record.in_flight = record.in_flight.saturating_sub(1);

      if self.config.ordering == ResponseOrdering::LastIssued && ticket.seq < record.applied_seq {
        debug!(key = %ticket.key, seq = ticket.seq, "Dropping out-of-order response");
        return false;
      }

      match result {
        Ok(value) => {
          record.value = Some(value);
          record.updated_at = Some(Instant::now());
          record.error = None;
          // A fetch issued before the last invalidation cannot clear it
          record.invalidated = record.invalidated && ticket.seq <= record.invalidated_at_seq;
        }
        Err(error) => {
          record.error = Some(error);
        }
      }
      record.applied_seq = record.applied_seq.max(ticket.seq);
    }

    self.emit(CacheEvent::Updated(ticket.key));
    true
  }

  /// Forget a fetch whose result will never be delivered.
  pub fn abandon_fetch(&self, ticket: FetchTicket) {
    if let Some(record) = self.lock().records.get_mut(&ticket.key) {
      record.in_flight = record.in_flight.saturating_sub(1);
    }
  }

  /// Drop unobserved records idle for longer than `gc_time`.
  pub fn collect_garbage(&self) -> usize {
    let gc_time = self.config.gc_time;
    let mut inner = self.lock();
    let before = inner.records.len();

    let observers = inner.observers.clone();
    inner.records.retain(|key, record| {
      if observers.get(key).copied().unwrap_or(0) > 0 {
        return true;
      }
      match record.idle_since {
        Some(since) => since.elapsed() < gc_time,
        None => true,
      }
    });

    let collected = before - inner.records.len();
    if collected > 0 {
      debug!(collected, "Collected idle cache records");
    }
    collected
  }

  /// Mark a write as in flight until the returned guard is dropped.
  pub fn begin_mutation(&self, resource: Resource, id: Option<u64>) -> PendingMutationGuard {
    let mut inner = self.lock();
    inner.next_mutation += 1;
    let token = inner.next_mutation;
    inner
      .mutations
      .insert(token, PendingMutation { resource, id });

    PendingMutationGuard {
      token,
      cache: self.clone(),
    }
  }

  #[cfg(test)]
  pub fn contains(&self, key: &QueryKey) -> bool {
    self.lock().records.contains_key(key)
  }

  /// All keys currently held, sorted
  #[cfg(test)]
  pub fn keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self.lock().records.keys().cloned().collect();
    keys.sort();
    keys
  }

  /// Drop everything, e.g. on logout.
  pub fn clear(&self) {
    let keys = {
      let mut inner = self.lock();
      let keys: Vec<QueryKey> = inner.records.keys().cloned().collect();
      inner.records.clear();
      keys
    };
    for key in keys {
      self.emit(CacheEvent::Removed(key));
    }
  }
}

/// Keeps a key observed; dropping it unsubscribes.
pub struct Subscription {
  key: QueryKey,
  cache: QueryCache,
  events: broadcast::Receiver<CacheEvent>,
}

impl Subscription {
  /// Next pending event for this key, without waiting.
  pub fn try_next(&mut self) -> Option<CacheEvent> {
    loop {
      match self.events.try_recv() {
        Ok(event) if event.key() == &self.key => return Some(event),
        Ok(_) => continue,
        // Missed events: ask the consumer to resync
        Err(broadcast::error::TryRecvError::Lagged(_)) => {
          return Some(CacheEvent::Invalidated(self.key.clone()))
        }
        Err(_) => return None,
      }
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.cache.unsubscribe(&self.key);
  }
}

/// Clears a pending-mutation mark when dropped.
pub struct PendingMutationGuard {
  token: u64,
  cache: QueryCache,
}

impl Drop for PendingMutationGuard {
  fn drop(&mut self) {
    self.cache.lock().mutations.remove(&self.token);
  }
}
