use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::api::types::{Comment, Task, TaskDetails, TaskStatus};
use crate::api::CachedClient;
use crate::cache::{Mutation, Query, QueryState};
use crate::ui::components::{InputResult, Notice, TextInput};
use crate::ui::renderfns::{priority_color, status_color};
use crate::ui::view::{ShortcutInfo, View, ViewAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Normal,
  Commenting,
  ConfirmDelete,
}

fn next_status(status: TaskStatus) -> TaskStatus {
  match status {
    TaskStatus::Todo => TaskStatus::InProgress,
    TaskStatus::InProgress => TaskStatus::Review,
    TaskStatus::Review => TaskStatus::Done,
    TaskStatus::Done => TaskStatus::Todo,
  }
}

/// One task with its comments and time logs
pub struct TaskDetailView {
  client: CachedClient,
  task_id: u64,
  project_id: Option<u64>,
  name: String,

  query: Query<TaskDetails>,
  comment_mutation: Mutation<Comment>,
  status_mutation: Mutation<Task>,
  delete_mutation: Mutation<()>,

  mode: Mode,
  comment: TextInput,
  scroll: u16,
}

impl TaskDetailView {
  pub fn new(client: CachedClient, task: &Task) -> Self {
    let mut query = client.task_details(task.id);
    query.fetch();

    Self {
      client,
      task_id: task.id,
      project_id: task.project_id,
      name: task.name.clone(),
      query,
      comment_mutation: Mutation::new(),
      status_mutation: Mutation::new(),
      delete_mutation: Mutation::new(),
      mode: Mode::Normal,
      comment: TextInput::new(),
      scroll: 0,
    }
  }

  fn task(&self) -> Option<&Task> {
    self.query.data().map(|d| &d.task)
  }

  fn submit_comment(&mut self, content: String) -> ViewAction {
    let content = content.trim().to_string();
    if content.is_empty() {
      return ViewAction::Notify(Notice::error("Comment cannot be empty"));
    }
    let client = self.client.clone();
    let task_id = self.task_id;
    self
      .comment_mutation
      .spawn(async move { client.add_comment(task_id, &content).await });
    self.comment.clear();
    self.mode = Mode::Normal;
    ViewAction::None
  }

  fn advance_status(&mut self) {
    let Some(task) = self.task().cloned() else {
      return;
    };
    if self.status_mutation.is_pending() {
      return;
    }
    let client = self.client.clone();
    let status = next_status(task.status);
    self
      .status_mutation
      .spawn(async move { client.set_task_status(&task, status).await });
  }

  fn delete(&mut self) {
    let client = self.client.clone();
    let (id, project_id) = (self.task_id, self.project_id);
    self
      .delete_mutation
      .spawn(async move { client.delete_task(id, project_id).await });
  }

  fn detail_lines(&self, details: &TaskDetails) -> Vec<Line<'static>> {
    let task = &details.task;
    let label = |s: &str| Span::styled(format!("{:<12}", s), Style::default().fg(Color::DarkGray));

    let mut lines = vec![
      Line::from(Span::styled(task.name.clone(), Style::default().bold())),
      Line::default(),
      Line::from(vec![
        label("Status"),
        Span::styled(task.status.label(), Style::default().fg(status_color(task.status))),
      ]),
      Line::from(vec![
        label("Priority"),
        Span::styled(
          task
            .priority
            .map(|p| format!("{:?}", p))
            .unwrap_or_else(|| "-".to_string()),
          Style::default().fg(priority_color(task.priority)),
        ),
      ]),
      Line::from(vec![
        label("Due"),
        Span::raw(
          task
            .due_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
        ),
      ]),
    ];

    let now = Utc::now();
    let minutes: i64 = details
      .time_logs
      .iter()
      .map(|log| log.duration(now).num_minutes())
      .sum();
    lines.push(Line::from(vec![
      label("Logged"),
      Span::raw(format!("{}h {:02}m", minutes / 60, minutes % 60)),
    ]));

    if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
      lines.push(Line::default());
      lines.extend(description.lines().map(|l| Line::from(l.to_string())));
    }

    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
      format!("Comments ({})", details.comments.len()),
      Style::default().fg(Color::Cyan).bold(),
    )));
    for comment in &details.comments {
      let when = comment
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
      lines.push(Line::from(vec![
        Span::styled(format!("{} ", when), Style::default().fg(Color::DarkGray)),
        Span::raw(comment.content.clone()),
      ]));
    }

    lines
  }
}

impl View for TaskDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.mode {
      Mode::Commenting => {
        match self.comment.handle_key(key) {
          InputResult::Submitted(content) => return self.submit_comment(content),
          InputResult::Cancelled => self.mode = Mode::Normal,
          InputResult::Consumed | InputResult::NotHandled => {}
        }
        return ViewAction::None;
      }
      Mode::ConfirmDelete => {
        self.mode = Mode::Normal;
        if key.code == KeyCode::Char('y') {
          self.delete();
        }
        return ViewAction::None;
      }
      Mode::Normal => {}
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.scroll = self.scroll.saturating_add(1),
      KeyCode::Char('k') | KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
      KeyCode::Char('c') => self.mode = Mode::Commenting,
      KeyCode::Char('s') => self.advance_status(),
      KeyCode::Char('d') if !self.delete_mutation.is_pending() => self.mode = Mode::ConfirmDelete,
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let title = match self.query.state() {
      QueryState::Loading => format!(" #{} (loading...) ", self.task_id),
      QueryState::Error(e) => format!(" #{} (error: {}) ", self.task_id, e),
      _ if self.query.mutation_pending() => format!(" #{} (saving...) ", self.task_id),
      _ => format!(" #{} ", self.task_id),
    };

    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([Constraint::Min(0), Constraint::Length(3)])
      .split(area);

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let lines = match self.query.data() {
      Some(details) => self.detail_lines(details),
      None if self.query.is_error() => vec![Line::from(Span::styled(
        "Failed to load the task. Press 'r' to retry.",
        Style::default().fg(Color::DarkGray),
      ))],
      None => Vec::new(),
    };
    let paragraph = Paragraph::new(lines)
      .block(block)
      .wrap(Wrap { trim: false })
      .scroll((self.scroll, 0));
    frame.render_widget(paragraph, chunks[0]);

    let (prompt, body) = match self.mode {
      Mode::Commenting => (" Comment (enter to send, esc to cancel) ", self.comment.line(true)),
      Mode::ConfirmDelete => (
        " Delete ",
        Line::from(Span::styled(
          format!("Delete '{}'? y to confirm", self.name),
          Style::default().fg(Color::Red),
        )),
      ),
      Mode::Normal => (
        "",
        Line::from(Span::styled(
          "c comment  s next status  d delete",
          Style::default().fg(Color::DarkGray),
        )),
      ),
    };
    let input = Paragraph::new(body).block(
      Block::default()
        .title(prompt)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if self.mode == Mode::Normal {
          Color::DarkGray
        } else {
          Color::Yellow
        })),
    );
    frame.render_widget(input, chunks[1]);
  }

  fn breadcrumb_label(&self) -> String {
    self
      .task()
      .map(|t| t.name.clone())
      .unwrap_or_else(|| self.name.clone())
  }

  fn captures_input(&self) -> bool {
    self.mode != Mode::Normal
  }

  fn tick(&mut self) -> Vec<ViewAction> {
    self.query.poll();

    let mut actions = Vec::new();
    match self.status_mutation.poll() {
      Some(Ok(task)) => actions.push(ViewAction::Notify(Notice::info(format!(
        "Status set to {}",
        task.status
      )))),
      Some(Err(e)) => actions.push(ViewAction::Notify(Notice::failed("Changing the status", e))),
      None => {}
    }
    match self.comment_mutation.poll() {
      Some(Ok(_)) => actions.push(ViewAction::Notify(Notice::info("Comment added"))),
      Some(Err(e)) => actions.push(ViewAction::Notify(Notice::failed("Adding the comment", e))),
      None => {}
    }
    match self.delete_mutation.poll() {
      Some(Ok(())) => {
        actions.push(ViewAction::Notify(Notice::info(format!("Deleted '{}'", self.name))));
        actions.push(ViewAction::Pop);
      }
      Some(Err(e)) => actions.push(ViewAction::Notify(Notice::failed("Deleting the task", e))),
      None => {}
    }
    actions
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("c", "comment").with_priority(20),
      ShortcutInfo::new("s", "status").with_priority(25),
      ShortcutInfo::new("d", "delete").with_priority(30),
      ShortcutInfo::new("q", "back").with_priority(40),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::{json_response, ScriptedTransport};
  use crate::api::transport::{Body, Method};
  use crate::api::SessionStore;
  use crate::cache::{CacheConfig, QueryKey, Resource};
  use crossterm::event::KeyModifiers;
  use serde_json::{json, Value};
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn task() -> Task {
    serde_json::from_value(json!({
      "id": 7, "name": "Write docs", "status": "todo", "project_id": 3
    }))
    .unwrap()
  }

  fn backend(comments: Arc<Mutex<Vec<Value>>>) -> Arc<ScriptedTransport> {
    ScriptedTransport::new(move |request| {
      let mut comments = comments.lock().unwrap();
      match (request.method, request.path.as_str()) {
        (Method::Get, "/tasks/7/details") => json_response(
          200,
          json!({
            "id": 7, "name": "Write docs", "status": "todo", "project_id": 3,
            "comments": *comments, "time_logs": []
          }),
        ),
        (Method::Post, "/comments") => {
          let Body::Json(body) = &request.body else {
            return json_response(400, json!({}));
          };
          let comment = json!({
            "id": comments.len() + 1,
            "task_id": body["task_id"],
            "content": body["content"]
          });
          comments.push(comment.clone());
          json_response(201, comment)
        }
        (Method::Delete, "/tasks/7") => json_response(500, json!({ "detail": "Database down" })),
        _ => json_response(404, json!({ "detail": "Not found" })),
      }
    })
  }

  fn view(transport: Arc<ScriptedTransport>) -> TaskDetailView {
    let session = SessionStore::in_memory(None);
    session.sign_in("token".to_string(), None, None);
    let client = CachedClient::with_transport(transport, session, CacheConfig::default());
    TaskDetailView::new(client, &task())
  }

  async fn settle(view: &mut TaskDetailView) -> Option<ViewAction> {
    for _ in 0..100 {
      if let Some(action) = view.tick().into_iter().next() {
        return Some(action);
      }
      let idle = !view.comment_mutation.is_pending()
        && !view.delete_mutation.is_pending()
        && !view.status_mutation.is_pending();
      if view.query.is_success() && !view.query.is_fetching() && idle {
        return None;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
  }

  #[tokio::test]
  async fn test_comment_appears_after_refetch() {
    let comments = Arc::new(Mutex::new(Vec::new()));
    let mut view = view(backend(comments));
    settle(&mut view).await;
    assert_eq!(view.query.data().map(|d| d.comments.len()), Some(0));

    view.handle_key(key(KeyCode::Char('c')));
    for c in "Looks good".chars() {
      view.handle_key(key(KeyCode::Char(c)));
    }
    view.handle_key(key(KeyCode::Enter));

    match settle(&mut view).await {
      Some(ViewAction::Notify(notice)) => assert_eq!(notice.message, "Comment added"),
      _ => panic!("expected a notice"),
    }

    // The comment write invalidated the task's details
    settle(&mut view).await;
    let contents: Vec<String> = view
      .query
      .data()
      .map(|d| d.comments.iter().map(|c| c.content.clone()).collect())
      .unwrap_or_default();
    assert_eq!(contents, vec!["Looks good"]);
  }

  #[tokio::test]
  async fn test_blank_comment_is_rejected_locally() {
    let transport = backend(Arc::new(Mutex::new(Vec::new())));
    let mut view = view(transport.clone());
    settle(&mut view).await;

    view.handle_key(key(KeyCode::Char('c')));
    view.handle_key(key(KeyCode::Char(' ')));
    assert!(matches!(view.handle_key(key(KeyCode::Enter)), ViewAction::Notify(_)));
    assert!(transport.requests_to(Method::Post, "/comments").is_empty());
  }

  #[tokio::test]
  async fn test_failed_delete_keeps_view_and_cache() {
    let transport = backend(Arc::new(Mutex::new(Vec::new())));
    let mut view = view(transport.clone());
    settle(&mut view).await;

    // Anything but 'y' cancels
    view.handle_key(key(KeyCode::Char('d')));
    view.handle_key(key(KeyCode::Char('n')));
    assert!(transport.requests_to(Method::Delete, "/tasks/7").is_empty());

    view.handle_key(key(KeyCode::Char('d')));
    view.handle_key(key(KeyCode::Char('y')));
    match settle(&mut view).await {
      Some(ViewAction::Notify(notice)) => {
        assert_eq!(notice.message, "Deleting the task failed: Database down (HTTP 500)")
      }
      _ => panic!("expected an error notice"),
    }
    let details = QueryKey::details(Resource::Tasks, 7);
    assert!(view.client.cache().contains(&details));
  }

  #[test]
  fn test_status_cycles_through_columns() {
    assert_eq!(next_status(TaskStatus::Todo), TaskStatus::InProgress);
    assert_eq!(next_status(TaskStatus::Review), TaskStatus::Done);
    assert_eq!(next_status(TaskStatus::Done), TaskStatus::Todo);
  }

  #[tokio::test]
  async fn test_outcomes_finishing_together_are_all_reported() {
    let transport = ScriptedTransport::new(|request| match (request.method, request.path.as_str()) {
      (Method::Get, "/tasks/7/details") => json_response(
        200,
        json!({ "id": 7, "name": "Write docs", "status": "todo", "project_id": 3 }),
      ),
      (Method::Patch, "/tasks/7/status") => json_response(
        200,
        json!({ "id": 7, "name": "Write docs", "status": "in_progress", "project_id": 3 }),
      ),
      (Method::Delete, "/tasks/7") => json_response(200, json!({})),
      _ => json_response(404, json!({ "detail": "Not found" })),
    });
    let mut view = view(transport);
    settle(&mut view).await;

    view.handle_key(key(KeyCode::Char('s')));
    view.handle_key(key(KeyCode::Char('d')));
    view.handle_key(key(KeyCode::Char('y')));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let actions = view.tick();
    let notices: Vec<String> = actions
      .iter()
      .filter_map(|a| match a {
        ViewAction::Notify(notice) => Some(notice.message.clone()),
        _ => None,
      })
      .collect();
    assert_eq!(notices, vec!["Status set to In Progress", "Deleted 'Write docs'"]);
    assert!(matches!(actions.last(), Some(ViewAction::Pop)));
  }
}
