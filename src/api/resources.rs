//! Typed REST endpoints on top of `ApiClient::execute`.

use serde::{de::DeserializeOwned, Serialize};

use super::api_types::{Page, StatusPatch};
use super::client::ApiClient;
use super::error::ApiError;
use super::transport::HttpRequest;
use super::types::{
  Comment, Company, Department, Invoice, LeaveRequest, Notification, Permission, Project, Role,
  Task, TaskStatus, Team, TenantUser, TimeLog, User,
};
use crate::cache::{Filter, Resource};

/// A record of one REST collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
  const RESOURCE: Resource;

  fn id(&self) -> u64;
}

macro_rules! entity {
  ($($ty:ty => $resource:ident),* $(,)?) => {
    $(
      impl Entity for $ty {
        const RESOURCE: Resource = Resource::$resource;

        fn id(&self) -> u64 {
          self.id
        }
      }
    )*
  };
}

entity! {
  Task => Tasks,
  Project => Projects,
  Team => Teams,
  Department => Departments,
  Company => Companies,
  Comment => Comments,
  TimeLog => TimeLogs,
  LeaveRequest => LeaveRequests,
  Notification => Notifications,
  Role => Roles,
  Permission => Permissions,
  Invoice => Invoices,
  TenantUser => TenantUsers,
  User => Users,
}

fn entity_path(resource: Resource, id: u64) -> String {
  format!("{}/{}", resource.path(), id)
}

impl ApiClient {
  /// `GET /<resource>` with pagination and filters as query parameters
  pub async fn list<E: Entity>(&self, filter: &Filter) -> Result<Page<E>, ApiError> {
    let request = HttpRequest::get(E::RESOURCE.path()).with_query(filter.query_pairs());
    self.execute_json(request).await
  }

  /// `GET /<resource>?<parent>_id=<id>`
  pub async fn list_scoped<E: Entity>(
    &self,
    parent: Resource,
    parent_id: u64,
    filter: &Filter,
  ) -> Result<Page<E>, ApiError> {
    let filter = filter.clone().with(parent.id_field(), parent_id);
    self.list(&filter).await
  }

  pub async fn get<E: Entity>(&self, id: u64) -> Result<E, ApiError> {
    self
      .execute_json(HttpRequest::get(entity_path(E::RESOURCE, id)))
      .await
  }

  /// `GET /<resource>/<id>/details`, the record with its embedded children
  pub async fn get_details<D: DeserializeOwned>(
    &self,
    resource: Resource,
    id: u64,
  ) -> Result<D, ApiError> {
    let path = format!("{}/details", entity_path(resource, id));
    self.execute_json(HttpRequest::get(path)).await
  }

  pub async fn create<E: Entity, B: Serialize + ?Sized>(&self, body: &B) -> Result<E, ApiError> {
    let request = HttpRequest::post(E::RESOURCE.path()).with_json(body)?;
    self.execute_json(request).await
  }

  /// `PUT /<resource>/<id>` with the full record
  pub async fn update<E: Entity, B: Serialize + ?Sized>(
    &self,
    id: u64,
    body: &B,
  ) -> Result<E, ApiError> {
    let request = HttpRequest::put(entity_path(E::RESOURCE, id)).with_json(body)?;
    self.execute_json(request).await
  }

  /// `DELETE /<resource>/<id>`; whatever the body says is ignored.
  pub async fn delete(&self, resource: Resource, id: u64) -> Result<(), ApiError> {
    self
      .execute(HttpRequest::delete(entity_path(resource, id)))
      .await?;
    Ok(())
  }

  /// `PATCH /tasks/<id>/status`
  pub async fn update_task_status(&self, id: u64, status: TaskStatus) -> Result<Task, ApiError> {
    let path = format!("{}/status", entity_path(Resource::Tasks, id));
    let request = HttpRequest::patch(path).with_json(&StatusPatch { status })?;
    self.execute_json(request).await
  }

  /// `GET /users/me`
  pub async fn current_user(&self) -> Result<User, ApiError> {
    let user: User = self.execute_json(HttpRequest::get("/users/me")).await?;
    self.session().set_user(user.clone());
    Ok(user)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::session::SessionStore;
  use crate::api::testing::{json_response, ScriptedTransport};
  use crate::api::transport::{Body, Method};
  use serde_json::json;

  fn client(transport: std::sync::Arc<ScriptedTransport>) -> ApiClient {
    let session = SessionStore::in_memory(Some("acme".to_string()));
    session.sign_in("token".to_string(), None, None);
    ApiClient::with_transport(transport, session)
  }

  fn task_json(id: u64) -> serde_json::Value {
    json!({"id": id, "name": "Write report", "status": "todo", "project_id": 3})
  }

  #[tokio::test]
  async fn test_list_sends_pagination_and_filters() {
    let transport = ScriptedTransport::new(|_| {
      json_response(200, json!({"items": [task_json(1)], "total": 1, "page": 2, "size": 10}))
    });
    let api = client(transport.clone());

    let filter = Filter::new().page(2).page_size(10).with("status", "todo");
    let page: Page<Task> = api.list(&filter).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.page_size, 10);

    let sent = &transport.requests()[0];
    assert_eq!(sent.path, "/tasks");
    assert_eq!(
      sent.query,
      vec![
        ("page".to_string(), "2".to_string()),
        ("page_size".to_string(), "10".to_string()),
        ("status".to_string(), "todo".to_string()),
      ]
    );
  }

  #[tokio::test]
  async fn test_scoped_list_uses_parent_id_param() {
    let transport = ScriptedTransport::new(|_| json_response(200, json!([task_json(1)])));
    let api = client(transport.clone());

    let page: Page<Task> = api
      .list_scoped(Resource::Projects, 42, &Filter::new())
      .await
      .unwrap();
    assert_eq!(page.items[0].id, 1);

    let sent = &transport.requests()[0];
    assert_eq!(sent.query, vec![("project_id".to_string(), "42".to_string())]);
  }

  #[tokio::test]
  async fn test_entity_paths() {
    let transport = ScriptedTransport::new(|req| match (req.method, req.path.as_str()) {
      (Method::Delete, _) => json_response(200, json!({"message": "Deleted"})),
      (_, "/users/me") => json_response(200, json!({"id": 4, "email": "me@example.com"})),
      _ => json_response(200, task_json(7)),
    });
    let api = client(transport.clone());

    let task: Task = api.get(7).await.unwrap();
    api.update::<Task, _>(7, &task).await.unwrap();
    api.update_task_status(7, TaskStatus::Done).await.unwrap();
    api.delete(Resource::TimeLogs, 9).await.unwrap();
    let me = api.current_user().await.unwrap();

    let sent: Vec<(Method, String)> = transport
      .requests()
      .into_iter()
      .map(|r| (r.method, r.path))
      .collect();
    assert_eq!(
      sent,
      vec![
        (Method::Get, "/tasks/7".to_string()),
        (Method::Put, "/tasks/7".to_string()),
        (Method::Patch, "/tasks/7/status".to_string()),
        (Method::Delete, "/time_logs/9".to_string()),
        (Method::Get, "/users/me".to_string()),
      ]
    );
    assert_eq!(
      transport.requests()[2].body,
      Body::Json(json!({"status": "done"}))
    );
    assert_eq!(api.session().user().map(|u| u.id), Some(me.id));
  }

  #[tokio::test]
  async fn test_not_found_is_classified() {
    let transport =
      ScriptedTransport::new(|_| json_response(404, json!({"detail": "Task not found"})));
    let api = client(transport);

    let err = api.get::<Task>(99).await.unwrap_err();
    assert_eq!(err.kind(), crate::api::error::ErrorKind::NotFound);
    assert_eq!(err.to_string(), "Task not found (HTTP 404)");
  }
}
