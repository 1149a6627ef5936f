//! Async query bound to a cache key.
//!
//! Inspired by TanStack Query: a `Query<T>` is a mounted consumer of one
//! `QueryKey`. It serves fresh data straight from the `QueryCache`, fetches
//! otherwise, and follows the cache's events so that an invalidation
//! caused by some mutation elsewhere refetches while the view is open.
//!
//! # Example
//!
//! ```ignore
//! let mut query = client.tasks_for_project(42);
//!
//! // Serve from cache or start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(tasks) => render_tasks(tasks),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::trace;

use super::key::QueryKey;
use super::store::{CacheEvent, FetchTicket, QueryCache, Snapshot, Subscription};
use crate::api::error::ApiError;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Nothing cached and no fetch started
  Idle,
  /// First fetch in flight, no data to show yet
  Loading,
  /// Data available; a background refetch may be running
  Success(T),
  /// The last fetch failed and there is no data
  Error(ApiError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }
}

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

struct PendingFetch {
  ticket: FetchTicket,
  receiver: mpsc::UnboundedReceiver<Result<Value, ApiError>>,
}

/// A mounted consumer of one cache key.
///
/// Query is not Clone: it owns its subscription, and dropping it
/// unsubscribes. A response still in flight at that point is discarded.
pub struct Query<T> {
  key: QueryKey,
  cache: QueryCache,
  state: QueryState<T>,
  last_error: Option<ApiError>,
  fetcher: FetcherFn<T>,
  pending: Option<PendingFetch>,
  subscription: Subscription,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Mount a query for `key`. Cached data, fresh or not, is shown
  /// immediately; call `fetch()` to revalidate.
  pub fn new<F, Fut>(cache: &QueryCache, key: QueryKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let subscription = cache.subscribe(&key);
    let mut query = Self {
      key,
      cache: cache.clone(),
      state: QueryState::Idle,
      last_error: None,
      fetcher: Box::new(move || fetcher().boxed()),
      pending: None,
      subscription,
    };
    query.reload();
    query
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// A fetch is running, including background refetches
  pub fn is_fetching(&self) -> bool {
    self.pending.is_some()
  }

  /// Error of the last fetch, also when older data is still shown.
  pub fn error(&self) -> Option<&ApiError> {
    match &self.state {
      QueryState::Error(e) => Some(e),
      _ => self.last_error.as_ref(),
    }
  }

  fn meta(&self) -> Option<Snapshot<IgnoredAny>> {
    self.cache.get::<IgnoredAny>(&self.key).ok().flatten()
  }

  /// Data is older than the stale time or was invalidated.
  pub fn is_stale(&self) -> bool {
    self.meta().map(|s| s.is_stale).unwrap_or(true)
  }

  /// A write touching this key has not resolved yet.
  pub fn mutation_pending(&self) -> bool {
    self.meta().map(|s| s.mutation_pending).unwrap_or(false)
  }

  /// Serve fresh cached data, or start fetching if not already.
  pub fn fetch(&mut self) {
    if self.pending.is_some() {
      return;
    }

    if let Ok(Some(snapshot)) = self.cache.get::<T>(&self.key) {
      if snapshot.is_fresh() {
        if let Some(data) = snapshot.data {
          trace!(key = %self.key, "Serving from cache");
          self.state = QueryState::Success(data);
          return;
        }
      }
    }
    self.start_fetch();
  }

  /// Force a refetch, dropping any pending one.
  pub fn refetch(&mut self) {
    self.abandon();
    self.start_fetch();
  }

  /// Poll for fetch results and cache events.
  ///
  /// Returns `true` if the state changed. Call this in your event loop
  /// tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    let outcome = match self.pending.as_mut().map(|p| p.receiver.try_recv()) {
      None | Some(Err(mpsc::error::TryRecvError::Empty)) => None,
      Some(Ok(result)) => Some(result),
      Some(Err(mpsc::error::TryRecvError::Disconnected)) => {
        Some(Err(ApiError::Transport("Query was cancelled".to_string())))
      }
    };

    if let Some(result) = outcome {
      if let Some(pending) = self.pending.take() {
        self.cache.complete_fetch(pending.ticket, result);
        self.reload();
        changed = true;
      }
    }

    while let Some(event) = self.subscription.try_next() {
      match event {
        CacheEvent::Updated(_) => {
          self.reload();
        }
        CacheEvent::Invalidated(_) => {
          trace!(key = %self.key, "Refetching after invalidation");
          self.refetch();
        }
        CacheEvent::Removed(_) => {
          self.abandon();
          self.state = QueryState::Idle;
          self.last_error = None;
        }
      }
      changed = true;
    }

    changed
  }

  /// Mirror the cache record into the query state.
  fn reload(&mut self) {
    match self.cache.get::<T>(&self.key) {
      Ok(Some(snapshot)) => {
        self.last_error = snapshot.error.clone();
        self.state = match (snapshot.data, snapshot.error) {
          (Some(data), _) => QueryState::Success(data),
          (None, Some(e)) if self.pending.is_none() => QueryState::Error(e),
          (None, _) if self.pending.is_some() => QueryState::Loading,
          (None, _) => QueryState::Idle,
        };
      }
      Ok(None) => {
        if self.pending.is_none() {
          self.state = QueryState::Idle;
        }
      }
      Err(e) => {
        self.state = QueryState::Error(e);
      }
    }
  }

  fn start_fetch(&mut self) {
    let ticket = self.cache.begin_fetch(&self.key);
    let (tx, rx) = mpsc::unbounded_channel();
    self.pending = Some(PendingFetch {
      ticket,
      receiver: rx,
    });
    if !self.state.is_success() {
      self.state = QueryState::Loading;
    }

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future
        .await
        .and_then(|data| serde_json::to_value(&data).map_err(ApiError::from));
      // Ignore send errors - the query may have been dropped
      let _ = tx.send(result);
    });
  }

  fn abandon(&mut self) {
    if let Some(pending) = self.pending.take() {
      self.cache.abandon_fetch(pending.ticket);
    }
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if let Some(pending) = self.pending.take() {
      self.cache.abandon_fetch(pending.ticket);
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("fetching", &self.pending.is_some())
      .finish_non_exhaustive()
  }
}
