//! Kanban columns and drag-and-drop status transitions.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::api::types::{Task, TaskStatus};

/// A drop zone on the board. Each column stands for exactly one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
  Todo,
  InProgress,
  Review,
  Done,
}

impl Column {
  pub const ALL: [Column; 4] = [Column::Todo, Column::InProgress, Column::Review, Column::Done];

  /// Drop zone id
  pub fn id(&self) -> &'static str {
    match self {
      Column::Todo => "todo",
      Column::InProgress => "inProgress",
      Column::Review => "review",
      Column::Done => "done",
    }
  }

  pub fn from_id(id: &str) -> Option<Column> {
    Column::ALL.into_iter().find(|c| c.id() == id)
  }

  pub fn status(&self) -> TaskStatus {
    match self {
      Column::Todo => TaskStatus::Todo,
      Column::InProgress => TaskStatus::InProgress,
      Column::Review => TaskStatus::Review,
      Column::Done => TaskStatus::Done,
    }
  }

  pub fn for_status(status: TaskStatus) -> Column {
    match status {
      TaskStatus::Todo => Column::Todo,
      TaskStatus::InProgress => Column::InProgress,
      TaskStatus::Review => Column::Review,
      TaskStatus::Done => Column::Done,
    }
  }

  pub fn title(&self) -> &'static str {
    self.status().label()
  }

  /// Columns left after hiding; `hidden` holds lowercase ids or titles.
  pub fn visible(hidden: &BTreeSet<String>) -> Vec<Column> {
    Column::ALL
      .into_iter()
      .filter(|c| {
        !hidden.contains(&c.id().to_lowercase()) && !hidden.contains(&c.title().to_lowercase())
      })
      .collect()
  }
}

/// Where a card was picked up or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTarget {
  pub column_id: String,
  /// Position inside the column; local ordering only
  pub index: usize,
}

impl DropTarget {
  pub fn new(column_id: impl Into<String>, index: usize) -> Self {
    Self {
      column_id: column_id.into(),
      index,
    }
  }

  pub fn column(column: Column, index: usize) -> Self {
    Self::new(column.id(), index)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
  /// Nothing to send
  Unchanged,
  /// The full task with its new status, ready for `PUT /tasks/{id}`
  Move(Task),
}

#[derive(Debug, Error)]
pub enum BoardError {
  #[error("Unknown column: {0}")]
  UnknownColumn(String),
}

/// Translate a drop into a status change.
///
/// Dropping outside any column, or inside the column the card came from,
/// changes nothing. A drop onto a column whose id is not known is an
/// error and also changes nothing.
pub fn resolve_drop(
  task: &Task,
  source: &DropTarget,
  destination: Option<&DropTarget>,
) -> Result<DropOutcome, BoardError> {
  let Some(destination) = destination else {
    return Ok(DropOutcome::Unchanged);
  };
  if destination.column_id == source.column_id {
    return Ok(DropOutcome::Unchanged);
  }

  let column = Column::from_id(&destination.column_id)
    .ok_or_else(|| BoardError::UnknownColumn(destination.column_id.clone()))?;

  let status = column.status();
  if status == task.status {
    return Ok(DropOutcome::Unchanged);
  }

  Ok(DropOutcome::Move(Task {
    status,
    ..task.clone()
  }))
}

/// Tasks of each visible column, in the order given.
pub fn group_tasks<'a>(tasks: &'a [Task], columns: &[Column]) -> Vec<(Column, Vec<&'a Task>)> {
  columns
    .iter()
    .map(|&column| {
      let cards = tasks
        .iter()
        .filter(|t| Column::for_status(t.status) == column)
        .collect();
      (column, cards)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::session::SessionStore;
  use crate::api::testing::{json_response, ScriptedTransport};
  use crate::api::transport::{Body, Method};
  use crate::api::CachedClient;
  use crate::cache::{CacheConfig, QueryKey, Resource};
  use serde_json::{json, Value};

  fn task() -> Task {
    serde_json::from_value(json!({
      "id": 7,
      "name": "Write report",
      "description": "All of it",
      "status": "todo",
      "priority": "high",
      "project_id": 3,
      "assignee_id": 2
    }))
    .unwrap()
  }

  fn client(transport: std::sync::Arc<ScriptedTransport>) -> CachedClient {
    let session = SessionStore::in_memory(Some("acme".to_string()));
    session.sign_in("token".to_string(), None, None);
    CachedClient::with_transport(transport, session, CacheConfig::default())
  }

  #[test]
  fn test_column_ids_map_to_statuses() {
    for column in Column::ALL {
      assert_eq!(Column::from_id(column.id()), Some(column));
      assert_eq!(Column::for_status(column.status()), column);
    }
    assert_eq!(Column::from_id("inProgress").map(|c| c.status()), Some(TaskStatus::InProgress));
    assert_eq!(Column::from_id("in_progress"), None);
  }

  #[test]
  fn test_same_column_is_unchanged() {
    let outcome = resolve_drop(
      &task(),
      &DropTarget::new("todo", 0),
      Some(&DropTarget::new("todo", 3)),
    )
    .unwrap();
    assert_eq!(outcome, DropOutcome::Unchanged);
  }

  #[test]
  fn test_drop_outside_is_unchanged() {
    let outcome = resolve_drop(&task(), &DropTarget::new("todo", 0), None).unwrap();
    assert_eq!(outcome, DropOutcome::Unchanged);
  }

  #[test]
  fn test_unknown_column_is_an_error() {
    let err = resolve_drop(
      &task(),
      &DropTarget::new("todo", 0),
      Some(&DropTarget::new("blocked", 0)),
    )
    .unwrap_err();
    assert!(matches!(err, BoardError::UnknownColumn(ref id) if id == "blocked"));
    assert_eq!(err.to_string(), "Unknown column: blocked");
  }

  #[test]
  fn test_move_keeps_every_other_field() {
    let original = task();
    let outcome = resolve_drop(
      &original,
      &DropTarget::column(Column::Todo, 0),
      Some(&DropTarget::column(Column::Done, 1)),
    )
    .unwrap();

    let DropOutcome::Move(moved) = outcome else {
      panic!("expected a move");
    };
    assert_eq!(moved.status, TaskStatus::Done);
    assert_eq!(
      Task {
        status: original.status,
        ..moved
      },
      original
    );
  }

  #[test]
  fn test_hidden_columns() {
    let hidden: BTreeSet<String> = ["review".to_string()].into_iter().collect();
    assert_eq!(
      Column::visible(&hidden),
      vec![Column::Todo, Column::InProgress, Column::Done]
    );

    let hidden: BTreeSet<String> = ["in progress".to_string()].into_iter().collect();
    assert!(!Column::visible(&hidden).contains(&Column::InProgress));
  }

  #[test]
  fn test_group_tasks_by_column() {
    let mut done = task();
    done.id = 8;
    done.status = TaskStatus::Done;
    let tasks = vec![task(), done];

    let groups = group_tasks(&tasks, &[Column::Todo, Column::Done]);
    assert_eq!(groups[0].1.iter().map(|t| t.id).collect::<Vec<_>>(), vec![7]);
    assert_eq!(groups[1].1.iter().map(|t| t.id).collect::<Vec<_>>(), vec![8]);
  }

  fn moved(task: &Task, from: &str, to: &str) -> Task {
    match resolve_drop(task, &DropTarget::new(from, 0), Some(&DropTarget::new(to, 0))) {
      Ok(DropOutcome::Move(moved)) => moved,
      other => panic!("expected a move, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_move_sends_one_full_put() {
    let transport = ScriptedTransport::new(|req| {
      let Body::Json(body) = &req.body else {
        return json_response(400, json!({}));
      };
      json_response(200, body.clone())
    });
    let client = client(transport.clone());
    let board_key = QueryKey::scoped(Resource::Tasks, Resource::Projects, 3);
    client.cache().set(&board_key, &json!({"items": []})).unwrap();

    let updated = client
      .update_task(&moved(&task(), "todo", "inProgress"))
      .await
      .unwrap();
    assert_eq!(updated.status, TaskStatus::InProgress);

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::Put);
    assert_eq!(sent[0].path, "/tasks/7");

    let mut expected = serde_json::to_value(task()).unwrap();
    expected["status"] = json!("in_progress");
    assert_eq!(sent[0].body, Body::Json(expected));

    assert!(client.cache().get::<Value>(&board_key).unwrap().unwrap().is_stale);
  }

  #[tokio::test]
  async fn test_move_keeps_fields_the_client_does_not_model() {
    let transport = ScriptedTransport::new(|req| {
      let Body::Json(body) = &req.body else {
        return json_response(400, json!({}));
      };
      json_response(200, body.clone())
    });
    let client = client(transport.clone());
    let task: Task = serde_json::from_value(json!({
      "id": 7,
      "name": "Write docs",
      "status": "todo",
      "project_id": 3,
      "estimated_hours": 5,
      "tags": ["docs"],
      "sprint_id": 2
    }))
    .unwrap();

    let updated = client.update_task(&moved(&task, "todo", "done")).await.unwrap();
    assert_eq!(updated.extra.get("sprint_id"), Some(&json!(2)));

    let Body::Json(body) = &transport.requests()[0].body else {
      panic!("expected a JSON body");
    };
    assert_eq!(body["status"], json!("done"));
    assert_eq!(body["estimated_hours"], json!(5));
    assert_eq!(body["tags"], json!(["docs"]));
    assert_eq!(body["sprint_id"], json!(2));
  }
}
