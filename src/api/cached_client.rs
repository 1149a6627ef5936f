//! API client paired with the query cache.
//!
//! Reads are handed out as `Query<T>` bound to their key; writes go
//! through `mutation::execute`, which applies the invalidation plan of the
//! write once it succeeded.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::api_types::Page;
use super::client::ApiClient;
use super::error::ApiError;
use super::resources::Entity;
use super::session::SessionStore;
use super::transport::Transport;
use super::types::{Comment, NewTask, Notification, Project, Task, TaskDetails, TaskStatus, User};
use crate::cache::mutation::{self, MutationIntent, ParentRef};
use crate::cache::{CacheConfig, Filter, Query, QueryCache, QueryKey, Resource};

#[derive(Clone)]
pub struct CachedClient {
  api: ApiClient,
  cache: QueryCache,
}

impl CachedClient {
  pub fn new(api: ApiClient, cache: QueryCache) -> Self {
    Self { api, cache }
  }

  #[cfg(test)]
  pub fn with_transport(
    transport: Arc<dyn Transport>,
    session: SessionStore,
    config: CacheConfig,
  ) -> Self {
    Self::new(
      ApiClient::with_transport(transport, session),
      QueryCache::new(config),
    )
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn session(&self) -> &SessionStore {
    self.api.session()
  }

  /// Sign in and seed `(users, me)` when the login response carried the user.
  pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>, ApiError> {
    let user = self.api.login(username, password).await?;
    if let Some(user) = &user {
      self.cache.set(&QueryKey::CurrentUser, user)?;
    }
    Ok(user)
  }

  /// Sign out and drop every cached record of the old session.
  pub fn logout(&self) {
    self.api.logout();
    self.cache.clear();
  }

  // Queries

  /// `(resource)` or `(resource, {filter})`
  pub fn list<E: Entity>(&self, filter: Filter) -> Query<Page<E>> {
    let api = self.api.clone();
    let key = QueryKey::list(E::RESOURCE, filter.clone());
    Query::new(&self.cache, key, move || {
      let api = api.clone();
      let filter = filter.clone();
      async move { api.list::<E>(&filter).await }
    })
  }

  /// `(resource, <parent>, <parent_id>)`
  pub fn scoped<E: Entity>(&self, parent: Resource, parent_id: u64) -> Query<Page<E>> {
    let api = self.api.clone();
    let key = QueryKey::scoped(E::RESOURCE, parent, parent_id);
    Query::new(&self.cache, key, move || {
      let api = api.clone();
      async move { api.list_scoped::<E>(parent, parent_id, &Filter::new()).await }
    })
  }

  pub fn projects(&self) -> Query<Page<Project>> {
    self.list(Filter::new())
  }

  pub fn project_tasks(&self, project_id: u64) -> Query<Page<Task>> {
    self.scoped(Resource::Projects, project_id)
  }

  pub fn notifications(&self) -> Query<Page<Notification>> {
    self.list(Filter::new())
  }

  /// `(tasks, id, details)`
  pub fn task_details(&self, id: u64) -> Query<TaskDetails> {
    let api = self.api.clone();
    Query::new(&self.cache, QueryKey::details(Resource::Tasks, id), move || {
      let api = api.clone();
      async move { api.get_details::<TaskDetails>(Resource::Tasks, id).await }
    })
  }

  /// `(users, me)`
  pub fn current_user(&self) -> Query<User> {
    let api = self.api.clone();
    Query::new(&self.cache, QueryKey::CurrentUser, move || {
      let api = api.clone();
      async move { api.current_user().await }
    })
  }

  // Mutations

  pub async fn create<E, B>(&self, body: &B, hints: &[ParentRef]) -> Result<E, ApiError>
  where
    E: Entity,
    B: Serialize + Sync + ?Sized,
  {
    let intent = MutationIntent::create(E::RESOURCE).with_hints(hints);
    mutation::execute(&self.cache, intent, self.api.create::<E, B>(body)).await
  }

  pub async fn update<E, B>(&self, id: u64, body: &B, hints: &[ParentRef]) -> Result<E, ApiError>
  where
    E: Entity,
    B: Serialize + Sync + ?Sized,
  {
    let intent = MutationIntent::update(E::RESOURCE, id).with_hints(hints);
    mutation::execute(&self.cache, intent, self.api.update::<E, B>(id, body)).await
  }

  /// Delete a record. Parents cannot be read back from a deleted record,
  /// so scoped lists are only refreshed for the hints given.
  pub async fn delete(
    &self,
    resource: Resource,
    id: u64,
    hints: &[ParentRef],
  ) -> Result<(), ApiError> {
    let intent = MutationIntent::delete(resource, id).with_hints(hints);
    mutation::execute(&self.cache, intent, self.api.delete(resource, id)).await?;
    info!(resource = %resource, id, "Deleted");
    Ok(())
  }

  pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
    let hints: Vec<ParentRef> = task
      .project_id
      .map(|id| ParentRef::new(Resource::Projects, id))
      .into_iter()
      .collect();
    self.create(task, &hints).await
  }

  /// Replace a task with `PUT /tasks/{id}` and the full payload.
  pub async fn update_task(&self, task: &Task) -> Result<Task, ApiError> {
    self.update(task.id, task, &task_hints(task)).await
  }

  pub async fn delete_task(&self, id: u64, project_id: Option<u64>) -> Result<(), ApiError> {
    let hints: Vec<ParentRef> = project_id
      .map(|id| ParentRef::new(Resource::Projects, id))
      .into_iter()
      .collect();
    self.delete(Resource::Tasks, id, &hints).await
  }

  /// `PATCH /tasks/{id}/status`
  pub async fn set_task_status(&self, task: &Task, status: TaskStatus) -> Result<Task, ApiError> {
    let intent = MutationIntent::update(Resource::Tasks, task.id).with_hints(&task_hints(task));
    mutation::execute(
      &self.cache,
      intent,
      self.api.update_task_status(task.id, status),
    )
    .await
  }

  pub async fn add_comment(&self, task_id: u64, content: &str) -> Result<Comment, ApiError> {
    let body = json!({ "task_id": task_id, "content": content });
    self
      .create(&body, &[ParentRef::new(Resource::Tasks, task_id)])
      .await
  }

  pub async fn mark_notification_read(
    &self,
    notification: &Notification,
  ) -> Result<Notification, ApiError> {
    let body = Notification {
      is_read: true,
      ..notification.clone()
    };
    let hints: Vec<ParentRef> = notification
      .user_id
      .map(|id| ParentRef::new(Resource::Users, id))
      .into_iter()
      .collect();
    self.update(notification.id, &body, &hints).await
  }
}

/// Parents a task's lists are scoped by
fn task_hints(task: &Task) -> Vec<ParentRef> {
  let mut hints = Vec::new();
  if let Some(project) = task.project_id {
    hints.push(ParentRef::new(Resource::Projects, project));
  }
  if let Some(assignee) = task.assignee_id {
    hints.push(ParentRef::new(Resource::Users, assignee));
  }
  hints
}
