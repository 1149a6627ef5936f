//! Mutation intents and the keys they invalidate.
//!
//! Every write declares, deterministically, which cached reads it may have
//! made wrong. The tables below are exhaustive over `Resource`, so a new
//! collection cannot be added without deciding its invalidation rules.

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::key::{QueryKey, Resource};
use super::store::QueryCache;
use crate::api::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Create,
  Update,
  Delete,
}

/// Identifier of a parent entity supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentRef {
  pub resource: Resource,
  pub id: u64,
}

impl ParentRef {
  pub fn new(resource: Resource, id: u64) -> Self {
    Self { resource, id }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvalidationTarget {
  Key(QueryKey),
  /// Every filtered list of a resource; the writer cannot know which
  /// filters consumers used
  FilteredLists(Resource),
}

/// Keys to mark stale and keys to drop after a successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
  invalidate: Vec<InvalidationTarget>,
  remove: Vec<QueryKey>,
}

impl InvalidationPlan {
  fn invalidate(&mut self, target: InvalidationTarget) {
    if let InvalidationTarget::Key(key) = &target {
      if self.remove.contains(key) {
        return;
      }
    }
    if !self.invalidate.contains(&target) {
      self.invalidate.push(target);
    }
  }

  fn invalidate_key(&mut self, key: QueryKey) {
    self.invalidate(InvalidationTarget::Key(key));
  }

  fn remove(&mut self, key: QueryKey) {
    self
      .invalidate
      .retain(|t| !matches!(t, InvalidationTarget::Key(k) if *k == key));
    if !self.remove.contains(&key) {
      self.remove.push(key);
    }
  }

  pub fn invalidations(&self) -> &[InvalidationTarget] {
    &self.invalidate
  }

  pub fn removals(&self) -> &[QueryKey] {
    &self.remove
  }

  #[cfg(test)]
  pub fn invalidates(&self, key: &QueryKey) -> bool {
    self
      .invalidate
      .iter()
      .any(|t| matches!(t, InvalidationTarget::Key(k) if k == key))
  }

  #[cfg(test)]
  pub fn removes(&self, key: &QueryKey) -> bool {
    self.remove.contains(key)
  }
}

/// A list scope: lists of a resource narrowed to one parent.
struct Scope {
  parent: Resource,
  /// Field on the child that holds the parent id
  field: &'static str,
  /// The parent's `details` record embeds these children
  embedded: bool,
}

fn scopes(resource: Resource) -> &'static [Scope] {
  match resource {
    Resource::Tasks => &[
      Scope { parent: Resource::Projects, field: "project_id", embedded: true },
      Scope { parent: Resource::Users, field: "assignee_id", embedded: false },
    ],
    Resource::Projects => &[Scope { parent: Resource::Teams, field: "team_id", embedded: false }],
    Resource::Teams => &[Scope {
      parent: Resource::Departments,
      field: "department_id",
      embedded: false,
    }],
    Resource::Departments => &[Scope {
      parent: Resource::Companies,
      field: "company_id",
      embedded: false,
    }],
    Resource::Companies => &[],
    Resource::Comments => &[Scope { parent: Resource::Tasks, field: "task_id", embedded: true }],
    Resource::TimeLogs => &[
      Scope { parent: Resource::Tasks, field: "task_id", embedded: true },
      Scope { parent: Resource::Users, field: "user_id", embedded: false },
    ],
    Resource::LeaveRequests => &[Scope {
      parent: Resource::Users,
      field: "user_id",
      embedded: false,
    }],
    Resource::Notifications => &[Scope {
      parent: Resource::Users,
      field: "user_id",
      embedded: false,
    }],
    Resource::Roles => &[],
    Resource::Permissions => &[],
    Resource::Invoices => &[
      Scope { parent: Resource::Projects, field: "project_id", embedded: false },
      Scope { parent: Resource::Companies, field: "company_id", embedded: false },
    ],
    Resource::TenantUsers => &[Scope {
      parent: Resource::Users,
      field: "user_id",
      embedded: false,
    }],
    Resource::Users => &[],
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Cascade {
  /// Only when the entity is deleted
  OnDelete,
  /// On every write, because the dependent embeds this entity
  Always,
}

/// Collections whose lists reference this resource.
fn dependents(resource: Resource) -> &'static [(Resource, Cascade)] {
  match resource {
    Resource::Tasks => &[
      (Resource::Comments, Cascade::OnDelete),
      (Resource::TimeLogs, Cascade::OnDelete),
    ],
    Resource::Projects => &[
      (Resource::Tasks, Cascade::OnDelete),
      (Resource::Invoices, Cascade::OnDelete),
    ],
    Resource::Teams => &[(Resource::Projects, Cascade::OnDelete)],
    Resource::Departments => &[(Resource::Teams, Cascade::OnDelete)],
    Resource::Companies => &[
      (Resource::Departments, Cascade::OnDelete),
      (Resource::Projects, Cascade::OnDelete),
      (Resource::Invoices, Cascade::OnDelete),
    ],
    Resource::Comments => &[],
    Resource::TimeLogs => &[],
    Resource::LeaveRequests => &[],
    Resource::Notifications => &[],
    Resource::Roles => &[
      (Resource::Users, Cascade::OnDelete),
      (Resource::TenantUsers, Cascade::OnDelete),
    ],
    Resource::Permissions => &[(Resource::Roles, Cascade::Always)],
    Resource::Invoices => &[],
    Resource::TenantUsers => &[(Resource::Users, Cascade::Always)],
    Resource::Users => &[(Resource::TenantUsers, Cascade::OnDelete)],
  }
}

/// One-shot description of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationIntent {
  pub kind: MutationKind,
  pub resource: Resource,
  pub id: Option<u64>,
  /// Parent ids known at the call site. Deleted records cannot report
  /// their former parents, so deletes depend on these.
  pub hints: Vec<ParentRef>,
}

impl MutationIntent {
  pub fn create(resource: Resource) -> Self {
    Self {
      kind: MutationKind::Create,
      resource,
      id: None,
      hints: Vec::new(),
    }
  }

  pub fn update(resource: Resource, id: u64) -> Self {
    Self {
      kind: MutationKind::Update,
      resource,
      id: Some(id),
      hints: Vec::new(),
    }
  }

  pub fn delete(resource: Resource, id: u64) -> Self {
    Self {
      kind: MutationKind::Delete,
      resource,
      id: Some(id),
      hints: Vec::new(),
    }
  }

  pub fn with_parent(mut self, resource: Resource, id: u64) -> Self {
    let parent = ParentRef { resource, id };
    if !self.hints.contains(&parent) {
      self.hints.push(parent);
    }
    self
  }

  pub fn with_hints(self, hints: &[ParentRef]) -> Self {
    hints
      .iter()
      .fold(self, |intent, hint| intent.with_parent(hint.resource, hint.id))
  }

  /// Compute what to invalidate once the write succeeded.
  ///
  /// `payload` is the success response for creates and updates; parent
  /// ids found in it are combined with the caller's hints. When a parent
  /// is unknown only the global list is refreshed for that scope.
  pub fn invalidations(&self, payload: Option<&Value>) -> InvalidationPlan {
    let resource = self.resource;
    let mut plan = InvalidationPlan::default();

    let id = self
      .id
      .or_else(|| payload.and_then(|p| p.get("id")).and_then(Value::as_u64));

    plan.invalidate_key(QueryKey::all(resource));
    plan.invalidate(InvalidationTarget::FilteredLists(resource));

    if let Some(id) = id {
      match self.kind {
        MutationKind::Create => {}
        MutationKind::Update => {
          plan.invalidate_key(QueryKey::detail(resource, id));
          plan.invalidate_key(QueryKey::details(resource, id));
        }
        MutationKind::Delete => {
          plan.remove(QueryKey::detail(resource, id));
          plan.remove(QueryKey::details(resource, id));
        }
      }
    }

    for scope in scopes(resource) {
      for parent_id in self.parent_ids(scope, payload) {
        plan.invalidate_key(QueryKey::scoped(resource, scope.parent, parent_id));
        if scope.embedded {
          plan.invalidate_key(QueryKey::details(scope.parent, parent_id));
        }
      }
    }

    for &(dependent, cascade) in dependents(resource) {
      if cascade == Cascade::OnDelete && self.kind != MutationKind::Delete {
        continue;
      }
      plan.invalidate_key(QueryKey::all(dependent));
      plan.invalidate(InvalidationTarget::FilteredLists(dependent));

      if let (MutationKind::Delete, Some(id)) = (self.kind, id) {
        if scopes(dependent).iter().any(|s| s.parent == resource) {
          plan.remove(QueryKey::scoped(dependent, resource, id));
        }
      }
    }

    if resource == Resource::Users && self.kind != MutationKind::Create {
      plan.invalidate_key(QueryKey::CurrentUser);
    }

    plan
  }

  fn parent_ids(&self, scope: &Scope, payload: Option<&Value>) -> Vec<u64> {
    let mut ids: Vec<u64> = self
      .hints
      .iter()
      .filter(|p| p.resource == scope.parent)
      .map(|p| p.id)
      .collect();

    if let Some(id) = payload
      .and_then(|p| p.get(scope.field))
      .and_then(Value::as_u64)
    {
      if !ids.contains(&id) {
        ids.push(id);
      }
    }
    ids
  }
}

/// Run a write, then apply its invalidation plan.
///
/// The intent is registered as pending for the duration, so readers of
/// affected keys are told their data may be outdated. The pending mark is
/// cleared after the invalidations were dispatched, or on failure.
pub async fn execute<T, Fut>(
  cache: &QueryCache,
  intent: MutationIntent,
  request: Fut,
) -> Result<T, ApiError>
where
  T: Serialize,
  Fut: Future<Output = Result<T, ApiError>>,
{
  let _pending = cache.begin_mutation(intent.resource, intent.id);

  match request.await {
    Ok(value) => {
      let payload = match serde_json::to_value(&value) {
        Ok(payload) => Some(payload),
        Err(e) => {
          warn!(error = %e, "Could not inspect mutation payload, using hints only");
          None
        }
      };
      let plan = intent.invalidations(payload.as_ref());
      let touched = cache.apply(&plan);
      debug!(
        resource = %intent.resource,
        kind = ?intent.kind,
        touched = touched.len(),
        "Mutation applied"
      );
      Ok(value)
    }
    Err(e) => {
      debug!(resource = %intent.resource, kind = ?intent.kind, error = %e, "Mutation failed");
      Err(e)
    }
  }
}

#[derive(Debug, Clone)]
pub enum MutationState<T> {
  Idle,
  Pending,
  Success(T),
  Error(ApiError),
}

/// UI-side handle for a write, polled from the tick like `Query`.
pub struct Mutation<T> {
  state: MutationState<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, ApiError>>>,
}

impl<T: Serialize + Send + 'static> Mutation<T> {
  pub fn new() -> Self {
    Self {
      state: MutationState::Idle,
      receiver: None,
    }
  }

  pub fn state(&self) -> &MutationState<T> {
    &self.state
  }

  pub fn is_pending(&self) -> bool {
    matches!(self.state, MutationState::Pending)
  }

  /// Track a write in the background. The future applies its own
  /// invalidations, as `execute` and the `CachedClient` write methods do.
  pub fn spawn<Fut>(&mut self, future: Fut)
  where
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = MutationState::Pending;

    tokio::spawn(async move {
      let result = future.await;
      // The view may be gone; the cache was updated regardless
      let _ = tx.send(result);
    });
  }

  /// Returns the outcome once, when the write resolves.
  pub fn poll(&mut self) -> Option<Result<&T, &ApiError>> {
    let receiver = self.receiver.as_mut()?;

    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        self.state = match result {
          Ok(value) => MutationState::Success(value),
          Err(e) => MutationState::Error(e),
        };
      }
      Err(mpsc::error::TryRecvError::Empty) => return None,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.receiver = None;
        self.state = MutationState::Error(ApiError::Transport("Mutation was cancelled".to_string()));
      }
    }

    match &self.state {
      MutationState::Success(value) => Some(Ok(value)),
      MutationState::Error(e) => Some(Err(e)),
      _ => None,
    }
  }
}

impl<T: Serialize + Send + 'static> Default for Mutation<T> {
  fn default() -> Self {
    Self::new()
  }
}
