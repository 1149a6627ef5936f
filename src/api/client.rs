use color_eyre::Result;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::api_types::{RefreshRequest, RefreshResponse, TokenResponse};
use crate::api::error::{ApiError, ErrorKind, FieldError};
use crate::api::session::{AuthState, SessionStore};
use crate::api::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::api::types::User;
use crate::config::Config;

const TENANT_HEADER: &str = "X-Tenant-ID";

/// Taskeri REST client.
///
/// Every request goes through `execute`, which attaches the bearer token
/// and tenant header from the session, and on a 401 refreshes the access
/// token once and replays the request.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  session: SessionStore,
  refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ApiClient {
  pub fn new(config: &Config, session: SessionStore) -> Result<Self> {
    let transport = ReqwestTransport::new(&config.api.url)?;
    Ok(Self::with_transport(Arc::new(transport), session))
  }

  pub fn with_transport(transport: Arc<dyn Transport>, session: SessionStore) -> Self {
    Self {
      transport,
      session,
      refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  pub fn session(&self) -> &SessionStore {
    &self.session
  }

  /// Exchange credentials for tokens (`POST /token`, form encoded).
  pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>, ApiError> {
    let mut missing = Vec::new();
    if username.trim().is_empty() {
      missing.push(FieldError::new("username", "Username is required"));
    }
    if password.is_empty() {
      missing.push(FieldError::new("password", "Password is required"));
    }
    if !missing.is_empty() {
      return Err(ApiError::Validation(missing));
    }

    let mut request =
      HttpRequest::post("/token").with_form(&[("username", username.trim()), ("password", password)]);
    self.attach_tenant(&mut request);

    let response = self.transport.send(&request).await?;
    if !response.is_success() {
      return Err(ApiError::from_response(response.status, &response.body));
    }

    let tokens: TokenResponse = response.json()?;
    self
      .session
      .sign_in(tokens.access_token, tokens.refresh_token, tokens.user.clone());
    info!(username = username.trim(), "Signed in");

    Ok(tokens.user)
  }

  /// Forget all credentials and publish `Unauthenticated`.
  pub fn logout(&self) {
    self.session.clear();
    info!("Signed out");
  }

  /// Send a request through the authentication chain.
  pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
    let mut request = request;

    loop {
      let token = self.authorize(&mut request);
      let response = self.transport.send(&request).await?;

      if response.status != 401 {
        return self.check_status(&request, response);
      }

      let rejected = ApiError::from_response(response.status, &response.body);

      if request.retried {
        warn!(path = %request.path, "Request rejected again after token refresh");
        return Err(rejected);
      }

      if let Err(e) = self.refresh_after_unauthorized(token.as_deref()).await {
        debug!(path = %request.path, error = %e, "Token refresh failed");
        return Err(rejected);
      }

      request.retried = true;
      debug!(path = %request.path, "Replaying request with refreshed token");
    }
  }

  /// Execute and decode a JSON response body.
  pub async fn execute_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ApiError> {
    let response = self.execute(request).await?;
    response.json()
  }

  /// Exchange the stored refresh token for a new access token.
  ///
  /// On any failure the session is cleared, which moves the state to
  /// `Unauthenticated`.
  pub async fn refresh(&self) -> Result<(), ApiError> {
    let Some(refresh_token) = self.session.refresh_token() else {
      warn!("No refresh token available, signing out");
      self.session.clear();
      return Err(ApiError::unauthorized());
    };

    let mut request = match HttpRequest::post("/token/refresh").with_json(&RefreshRequest {
      refresh_token: &refresh_token,
    }) {
      Ok(request) => request,
      Err(e) => {
        self.session.clear();
        return Err(e);
      }
    };
    self.attach_tenant(&mut request);

    self.session.set_state(AuthState::Refreshing);

    let result = match self.transport.send(&request).await {
      Ok(response) if response.is_success() => response.json::<RefreshResponse>(),
      Ok(response) => Err(ApiError::from_response(response.status, &response.body)),
      Err(e) => Err(e),
    };

    match result {
      Ok(tokens) => {
        self
          .session
          .replace_access_token(tokens.access_token, tokens.refresh_token);
        info!("Access token refreshed");
        Ok(())
      }
      Err(e) => {
        warn!(error = %e, "Refresh rejected, signing out");
        self.session.clear();
        Err(e)
      }
    }
  }

  async fn refresh_after_unauthorized(&self, rejected_token: Option<&str>) -> Result<(), ApiError> {
    let _guard = self.refresh_lock.lock().await;

    // Another request refreshed while this one waited for the lock
    if let Some(current) = self.session.access_token() {
      if rejected_token != Some(current.as_str()) {
        return Ok(());
      }
    }

    self.refresh().await
  }

  /// Attach auth headers from the current session. Returns the token used.
  fn authorize(&self, request: &mut HttpRequest) -> Option<String> {
    let token = self.session.access_token();
    match &token {
      Some(token) => request.set_header("Authorization", format!("Bearer {}", token)),
      None => request.remove_header("Authorization"),
    }
    self.attach_tenant(request);
    token
  }

  fn attach_tenant(&self, request: &mut HttpRequest) {
    match self.session.tenant_id() {
      Some(tenant) => request.set_header(TENANT_HEADER, tenant),
      None => request.remove_header(TENANT_HEADER),
    }
  }

  fn check_status(
    &self,
    request: &HttpRequest,
    response: HttpResponse,
  ) -> Result<HttpResponse, ApiError> {
    if response.is_success() {
      return Ok(response);
    }

    let error = ApiError::from_response(response.status, &response.body);
    if error.kind() == ErrorKind::Forbidden {
      warn!(path = %request.path, "Request forbidden");
    } else {
      debug!(path = %request.path, status = response.status, error = %error, "Request failed");
    }
    Err(error)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::{bearer, json_response, ScriptedTransport};
  use crate::api::transport::{Body, Method};
  use serde_json::json;
  use std::time::Duration;

  fn signed_in_session() -> SessionStore {
    let session = SessionStore::in_memory(Some("acme".to_string()));
    session.sign_in("old".to_string(), Some("refresh-1".to_string()), None);
    session
  }

  /// Backend that accepts only the `new` token and hands it out on refresh.
  fn rotating_backend() -> Arc<ScriptedTransport> {
    ScriptedTransport::new(|req| match req.path.as_str() {
      "/token/refresh" => json_response(200, json!({"access_token": "new"})),
      _ if bearer(req) == Some("new") => json_response(200, json!({"items": []})),
      _ => json_response(401, json!({"detail": "Token expired"})),
    })
  }

  #[tokio::test]
  async fn test_attaches_bearer_and_tenant() {
    let transport = ScriptedTransport::new(|_| json_response(200, json!([])));
    let client = ApiClient::with_transport(transport.clone(), signed_in_session());

    client.execute(HttpRequest::get("/tasks")).await.unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(bearer(sent), Some("old"));
    assert_eq!(sent.header("X-Tenant-ID"), Some("acme"));
  }

  #[tokio::test]
  async fn test_unauthorized_refreshes_and_replays_with_new_token() {
    let transport = rotating_backend();
    let session = signed_in_session();
    let client = ApiClient::with_transport(transport.clone(), session.clone());

    let response = client.execute(HttpRequest::get("/tasks")).await.unwrap();
    assert_eq!(response.status, 200);

    let task_requests = transport.requests_to(Method::Get, "/tasks");
    assert_eq!(task_requests.len(), 2);
    assert_eq!(bearer(&task_requests[0]), Some("old"));
    assert_eq!(bearer(&task_requests[1]), Some("new"));
    assert!(task_requests[1].retried);

    let refreshes = transport.requests_to(Method::Post, "/token/refresh");
    assert_eq!(refreshes.len(), 1);
    assert_eq!(
      refreshes[0].body,
      Body::Json(json!({"refresh_token": "refresh-1"}))
    );
    assert_eq!(session.state(), AuthState::Authenticated);
    assert_eq!(session.access_token().as_deref(), Some("new"));
  }

  #[tokio::test]
  async fn test_replay_is_attempted_at_most_once() {
    // Refresh succeeds but the new token is rejected as well
    let transport = ScriptedTransport::new(|req| match req.path.as_str() {
      "/token/refresh" => json_response(200, json!({"access_token": "still-bad"})),
      _ => json_response(401, json!({"detail": "Token expired"})),
    });
    let client = ApiClient::with_transport(transport.clone(), signed_in_session());

    let err = client.execute(HttpRequest::get("/tasks")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(transport.requests_to(Method::Get, "/tasks").len(), 2);
    assert_eq!(transport.requests_to(Method::Post, "/token/refresh").len(), 1);
  }

  #[tokio::test]
  async fn test_missing_refresh_token_signs_out() {
    let transport = rotating_backend();
    let session = SessionStore::in_memory(None);
    session.sign_in("old".to_string(), None, None);
    let client = ApiClient::with_transport(transport.clone(), session.clone());

    let err = client.execute(HttpRequest::get("/tasks")).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert!(session.access_token().is_none());
    assert!(transport.requests_to(Method::Post, "/token/refresh").is_empty());
  }

  #[tokio::test]
  async fn test_failed_refresh_propagates_original_error() {
    let transport = ScriptedTransport::new(|req| match req.path.as_str() {
      "/token/refresh" => json_response(401, json!({"detail": "Refresh token revoked"})),
      _ => json_response(401, json!({"detail": "Token expired"})),
    });
    let session = signed_in_session();
    let mut state = session.watch();
    let client = ApiClient::with_transport(transport.clone(), session.clone());

    let err = client.execute(HttpRequest::get("/tasks")).await.unwrap_err();
    assert_eq!(err.to_string(), "Token expired (HTTP 401)");
    assert_eq!(*state.borrow_and_update(), AuthState::Unauthenticated);
    assert!(session.refresh_token().is_none());
    assert_eq!(transport.requests_to(Method::Get, "/tasks").len(), 1);
  }

  #[tokio::test]
  async fn test_forbidden_is_not_retried() {
    let transport = ScriptedTransport::new(|_| json_response(403, json!({"detail": "Nope"})));
    let client = ApiClient::with_transport(transport.clone(), signed_in_session());

    let err = client.execute(HttpRequest::get("/roles")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(transport.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let transport = ScriptedTransport::delayed(Duration::from_millis(20), |req| {
      match req.path.as_str() {
        "/token/refresh" => json_response(200, json!({"access_token": "new"})),
        _ if bearer(req) == Some("new") => json_response(200, json!([])),
        _ => json_response(401, json!({})),
      }
    });
    let client = ApiClient::with_transport(transport.clone(), signed_in_session());

    let (a, b) = tokio::join!(
      client.execute(HttpRequest::get("/tasks")),
      client.execute(HttpRequest::get("/projects")),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(transport.requests_to(Method::Post, "/token/refresh").len(), 1);
  }

  #[tokio::test]
  async fn test_login_posts_form_and_stores_tokens() {
    let transport = ScriptedTransport::new(|_| {
      json_response(
        200,
        json!({
          "access_token": "a1",
          "refresh_token": "r1",
          "user": {"id": 1, "email": "ada@example.com"}
        }),
      )
    });
    let session = SessionStore::in_memory(Some("acme".to_string()));
    let client = ApiClient::with_transport(transport.clone(), session.clone());

    let user = client.login("ada@example.com", "secret").await.unwrap();
    assert_eq!(user.map(|u| u.id), Some(1));

    let sent = &transport.requests()[0];
    assert_eq!(sent.path, "/token");
    assert_eq!(sent.header("X-Tenant-ID"), Some("acme"));
    assert!(sent.header("Authorization").is_none());
    assert_eq!(
      sent.body,
      Body::Form(vec![
        ("username".to_string(), "ada@example.com".to_string()),
        ("password".to_string(), "secret".to_string()),
      ])
    );
    assert_eq!(session.state(), AuthState::Authenticated);
    assert_eq!(session.refresh_token().as_deref(), Some("r1"));
  }

  #[tokio::test]
  async fn test_login_validates_before_sending() {
    let transport = ScriptedTransport::new(|_| json_response(200, json!({})));
    let client = ApiClient::with_transport(transport.clone(), SessionStore::in_memory(None));

    let err = client.login("ada", "").await.unwrap_err();
    assert_eq!(err.field_message("password"), Some("Password is required"));
    assert!(transport.requests().is_empty());
  }

  #[tokio::test]
  async fn test_request_after_logout_carries_no_token() {
    let transport = ScriptedTransport::delayed(Duration::from_millis(30), |_| {
      json_response(200, json!([]))
    });
    let client = ApiClient::with_transport(transport.clone(), signed_in_session());

    let in_flight = {
      let client = client.clone();
      tokio::spawn(async move { client.execute(HttpRequest::get("/tasks")).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    client.logout();
    let _ = client.execute(HttpRequest::get("/tasks")).await;
    let _ = in_flight.await.unwrap();

    let sent = transport.requests_to(Method::Get, "/tasks");
    assert_eq!(sent.len(), 2);
    assert_eq!(bearer(&sent[0]), Some("old"));
    assert!(sent[1].header("Authorization").is_none());
  }
}
