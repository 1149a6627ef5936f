//! HTTP transport seam.
//!
//! `ApiClient` only talks to a `Transport`, so the interceptor chain can be
//! exercised without a network. The production implementation wraps
//! `reqwest`.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  fn as_reqwest(self) -> reqwest::Method {
    match self {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
  Empty,
  Json(Value),
  Form(Vec<(String, String)>),
}

/// An outbound request, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub headers: Vec<(String, String)>,
  pub body: Body,
  /// Set once the request has been replayed after a token refresh
  pub retried: bool,
}

impl HttpRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      headers: Vec::new(),
      body: Body::Empty,
      retried: false,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::Post, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::Put, path)
  }

  pub fn patch(path: impl Into<String>) -> Self {
    Self::new(Method::Patch, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn with_query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<String>,
  {
    self
      .query
      .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
    self
  }

  pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
    let value = serde_json::to_value(body)
      .map_err(|e| ApiError::Decode(format!("Failed to encode request body: {}", e)))?;
    self.body = Body::Json(value);
    Ok(self)
  }

  pub fn with_form(mut self, pairs: &[(&str, &str)]) -> Self {
    self.body = Body::Form(
      pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    );
    self
  }

  /// Header value by case-insensitive name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Set a header, replacing any previous value.
  pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
    self.remove_header(name);
    self.headers.push((name.to_string(), value.into()));
  }

  pub fn remove_header(&mut self, name: &str) {
    self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
  }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
    // 204 and empty bodies decode as JSON null
    if self.body.is_empty() {
      return serde_json::from_value(Value::Null).map_err(ApiError::from);
    }
    serde_json::from_slice(&self.body).map_err(ApiError::from)
  }
}

/// Something that can deliver an `HttpRequest` to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;
}

/// `reqwest`-backed transport.
pub struct ReqwestTransport {
  client: reqwest::Client,
  base_url: String,
}

impl ReqwestTransport {
  pub fn new(base_url: &str) -> Result<Self> {
    // Validate once up front so per-request joins cannot fail on the base
    Url::parse(base_url).map_err(|e| eyre!("Invalid API URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  fn url_for(&self, path: &str) -> Result<Url, ApiError> {
    let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| ApiError::Transport(format!("Invalid URL {}: {}", joined, e)))
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
    let url = self.url_for(&request.path)?;

    let mut builder = self
      .client
      .request(request.method.as_reqwest(), url)
      .query(&request.query);

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    builder = match &request.body {
      Body::Empty => builder,
      Body::Json(value) => builder.json(value),
      Body::Form(pairs) => builder.form(pairs),
    };

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| ApiError::Transport(e.to_string()))?;

    Ok(HttpResponse {
      status,
      body: body.to_vec(),
    })
  }
}
