//! Normalized error shape for everything that crosses the REST boundary.

use serde::Deserialize;
use thiserror::Error;

/// A validation problem attached to one input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
  pub field: String,
  pub message: String,
}

impl FieldError {
  pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      message: message.into(),
    }
  }
}

/// Coarse classification used by callers to pick a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Transport,
  Unauthorized,
  Forbidden,
  Validation,
  NotFound,
  Server,
  Decode,
  Other,
}

/// Errors returned by the API client.
///
/// Transport failures and non-2xx responses are folded into this single
/// type at the boundary; callers decide whether to show a notice, an
/// inline field error or to switch to the login view.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  #[error("Network error: {0}")]
  Transport(String),

  #[error("{message} (HTTP {status})")]
  Http {
    status: u16,
    message: String,
    fields: Vec<FieldError>,
  },

  #[error("Failed to decode response: {0}")]
  Decode(String),

  /// Rejected locally before any request was sent.
  #[error("Invalid input: {}", summarize_fields(.0))]
  Validation(Vec<FieldError>),
}

impl ApiError {
  /// Build an error from a non-2xx response body.
  pub fn from_response(status: u16, body: &[u8]) -> Self {
    let (message, fields) = parse_error_body(body)
      .unwrap_or_else(|| (default_message(status).to_string(), Vec::new()));

    ApiError::Http {
      status,
      message,
      fields,
    }
  }

  pub fn unauthorized() -> Self {
    ApiError::Http {
      status: 401,
      message: default_message(401).to_string(),
      fields: Vec::new(),
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      ApiError::Transport(_) => ErrorKind::Transport,
      ApiError::Decode(_) => ErrorKind::Decode,
      ApiError::Validation(_) => ErrorKind::Validation,
      ApiError::Http { status, .. } => match status {
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        400 | 409 | 422 => ErrorKind::Validation,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Other,
      },
    }
  }

  /// Field-level details, if the backend (or local validation) gave any.
  pub fn field_errors(&self) -> &[FieldError] {
    match self {
      ApiError::Http { fields, .. } | ApiError::Validation(fields) => fields,
      _ => &[],
    }
  }

  /// Message for a given field, for rendering next to the input.
  pub fn field_message(&self, field: &str) -> Option<&str> {
    self
      .field_errors()
      .iter()
      .find(|f| f.field == field)
      .map(|f| f.message.as_str())
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(e: serde_json::Error) -> Self {
    ApiError::Decode(e.to_string())
  }
}

fn summarize_fields(fields: &[FieldError]) -> String {
  fields
    .iter()
    .map(|f| format!("{}: {}", f.field, f.message))
    .collect::<Vec<_>>()
    .join(", ")
}

fn default_message(status: u16) -> &'static str {
  match status {
    400 => "Bad request",
    401 => "Not authenticated",
    403 => "Permission denied",
    404 => "Not found",
    409 => "Conflict",
    422 => "Validation failed",
    500..=599 => "Server error",
    _ => "Request failed",
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
  Message(String),
  Fields(Vec<ApiFieldDetail>),
}

#[derive(Debug, Deserialize)]
struct ApiFieldDetail {
  #[serde(default)]
  loc: Vec<serde_json::Value>,
  msg: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  detail: Option<ErrorDetail>,
  message: Option<String>,
}

/// Extract a human message and field errors from a JSON error body.
///
/// Accepts `{"detail": "..."}`, `{"detail": [{"loc": [...], "msg": "..."}]}`
/// and `{"message": "..."}`.
fn parse_error_body(body: &[u8]) -> Option<(String, Vec<FieldError>)> {
  let parsed: ApiErrorBody = serde_json::from_slice(body).ok()?;

  match (parsed.detail, parsed.message) {
    (Some(ErrorDetail::Message(msg)), _) => Some((msg, Vec::new())),
    (Some(ErrorDetail::Fields(details)), _) => {
      let fields: Vec<FieldError> = details
        .into_iter()
        .map(|d| {
          // Last path segment names the field ("body" -> "name")
          let field = d
            .loc
            .last()
            .map(|v| match v {
              serde_json::Value::String(s) => s.clone(),
              other => other.to_string(),
            })
            .unwrap_or_default();
          FieldError::new(field, d.msg)
        })
        .collect();
      Some((default_message(422).to_string(), fields))
    }
    (None, Some(msg)) => Some((msg, Vec::new())),
    (None, None) => None,
  }
}
