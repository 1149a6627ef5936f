//! In-memory transport for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ApiError;
use super::transport::{HttpRequest, HttpResponse, Method, Transport};

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Transport that answers from a closure and records every request.
pub struct ScriptedTransport {
  handler: Handler,
  requests: Mutex<Vec<HttpRequest>>,
  delay: Option<Duration>,
}

impl ScriptedTransport {
  pub fn new<F>(handler: F) -> Arc<Self>
  where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
  {
    Arc::new(Self {
      handler: Box::new(handler),
      requests: Mutex::new(Vec::new()),
      delay: None,
    })
  }

  /// Like `new`, but every response is held back for `delay`.
  pub fn delayed<F>(delay: Duration, handler: F) -> Arc<Self>
  where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
  {
    Arc::new(Self {
      handler: Box::new(handler),
      requests: Mutex::new(Vec::new()),
      delay: Some(delay),
    })
  }

  pub fn requests(&self) -> Vec<HttpRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
    self
      .requests()
      .into_iter()
      .filter(|r| r.method == method && r.path == path)
      .collect()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
    self.requests.lock().unwrap().push(request.clone());
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    Ok((self.handler)(request))
  }
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
  HttpResponse {
    status,
    body: serde_json::to_vec(&body).unwrap(),
  }
}

pub fn bearer(request: &HttpRequest) -> Option<&str> {
  request
    .header("Authorization")
    .and_then(|v| v.strip_prefix("Bearer "))
}
