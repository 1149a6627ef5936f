//! Domain types as returned by the Taskeri backend.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Todo,
  InProgress,
  Review,
  Done,
}

impl TaskStatus {
  pub fn label(&self) -> &'static str {
    match self {
      TaskStatus::Todo => "To Do",
      TaskStatus::InProgress => "In Progress",
      TaskStatus::Review => "Review",
      TaskStatus::Done => "Done",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
  Low,
  Medium,
  High,
  Urgent,
}

/// A task as it appears in lists and on the board.
///
/// Fields this client does not model are kept in `extra`, so writing a
/// task back sends everything the server returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  pub status: TaskStatus,
  #[serde(default)]
  pub priority: Option<TaskPriority>,
  #[serde(default)]
  pub project_id: Option<u64>,
  #[serde(default)]
  pub assignee_id: Option<u64>,
  #[serde(default)]
  pub due_date: Option<NaiveDate>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Payload for creating a task
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub project_id: Option<u64>,
  pub status: TaskStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<TaskPriority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assignee_id: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<NaiveDate>,
}

impl NewTask {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: None,
      project_id: None,
      status: TaskStatus::Todo,
      priority: None,
      assignee_id: None,
      due_date: None,
    }
  }

  pub fn in_project(mut self, project_id: u64) -> Self {
    self.project_id = Some(project_id);
    self
  }

  pub fn with_status(mut self, status: TaskStatus) -> Self {
    self.status = status;
    self
  }
}

/// Task with its comments and time logs (the `details` endpoint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
  #[serde(flatten)]
  pub task: Task,
  #[serde(default)]
  pub comments: Vec<Comment>,
  #[serde(default)]
  pub time_logs: Vec<TimeLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub team_id: Option<u64>,
  #[serde(default)]
  pub start_date: Option<NaiveDate>,
  #[serde(default)]
  pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub department_id: Option<u64>,
  #[serde(default)]
  pub member_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub company_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  pub id: u64,
  pub task_id: u64,
  #[serde(default)]
  pub user_id: Option<u64>,
  pub content: String,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeLog {
  pub id: u64,
  #[serde(default)]
  pub task_id: Option<u64>,
  pub user_id: u64,
  pub start_time: DateTime<Utc>,
  #[serde(default)]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub description: Option<String>,
}

impl TimeLog {
  /// Logged duration; open entries count up to `now`.
  pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
    self.end_time.unwrap_or(now) - self.start_time
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
  Pending,
  Approved,
  Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
  pub id: u64,
  pub user_id: u64,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  #[serde(default)]
  pub leave_type: Option<String>,
  #[serde(default)]
  pub reason: Option<String>,
  pub status: LeaveStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: u64,
  #[serde(default)]
  pub user_id: Option<u64>,
  pub message: String,
  #[serde(default)]
  pub is_read: bool,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
  Draft,
  Sent,
  Paid,
  Overdue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
  pub id: u64,
  #[serde(default)]
  pub number: Option<String>,
  #[serde(default)]
  pub project_id: Option<u64>,
  #[serde(default)]
  pub company_id: Option<u64>,
  /// Amount in minor currency units
  pub amount_cents: i64,
  #[serde(default)]
  pub currency: Option<String>,
  pub status: InvoiceStatus,
  #[serde(default)]
  pub due_date: Option<NaiveDate>,
}

/// Association of a user with a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantUser {
  pub id: u64,
  pub user_id: u64,
  pub tenant_id: String,
  #[serde(default)]
  pub role_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub email: String,
  #[serde(default)]
  pub first_name: Option<String>,
  #[serde(default)]
  pub last_name: Option<String>,
  #[serde(default)]
  pub role_id: Option<u64>,
  #[serde(default = "default_true")]
  pub is_active: bool,
}

fn default_true() -> bool {
  true
}

impl User {
  pub fn display_name(&self) -> String {
    match (&self.first_name, &self.last_name) {
      (Some(first), Some(last)) => format!("{} {}", first, last),
      (Some(first), None) => first.clone(),
      _ => self.email.clone(),
    }
  }
}
