use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use crate::api::types::User;
use crate::api::{ApiError, CachedClient};
use crate::cache::Mutation;
use crate::ui::components::{InputResult, TextInput};
use crate::ui::view::{ShortcutInfo, View, ViewAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
  Username,
  Password,
}

/// Sign-in form, shown at startup without a session and whenever the
/// session is lost
pub struct LoginView {
  client: CachedClient,
  username: TextInput,
  password: TextInput,
  focus: Field,
  login: Mutation<Option<User>>,
  error: Option<ApiError>,
}

impl LoginView {
  pub fn new(client: CachedClient, username: Option<&str>) -> Self {
    let mut input = TextInput::new();
    let focus = match username {
      Some(name) => {
        input.set_value(name);
        Field::Password
      }
      None => Field::Username,
    };

    Self {
      client,
      username: input,
      password: TextInput::masked(),
      focus,
      login: Mutation::new(),
      error: None,
    }
  }

  fn submit(&mut self) {
    if self.login.is_pending() {
      return;
    }
    self.error = None;
    let client = self.client.clone();
    let username = self.username.value().to_string();
    let password = self.password.value().to_string();
    self
      .login
      .spawn(async move { client.login(&username, &password).await });
  }

  fn field_error(&self, field: &str) -> Option<&str> {
    self.error.as_ref().and_then(|e| e.field_message(field))
  }

  fn field_widget<'a>(&'a self, title: &'a str, input: &TextInput, field: Field) -> Paragraph<'a> {
    let focused = self.focus == field;
    let name = match field {
      Field::Username => "username",
      Field::Password => "password",
    };
    let mut block = Block::default()
      .title(format!(" {} ", title))
      .borders(Borders::ALL)
      .border_style(Style::default().fg(if focused { Color::Yellow } else { Color::DarkGray }));
    if let Some(message) = self.field_error(name) {
      block = block.title_bottom(Line::from(Span::styled(
        format!(" {} ", message),
        Style::default().fg(Color::Red),
      )));
    }
    Paragraph::new(input.line(focused)).block(block)
  }
}

impl View for LoginView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
        self.focus = match self.focus {
          Field::Username => Field::Password,
          Field::Password => Field::Username,
        };
        return ViewAction::None;
      }
      KeyCode::Enter if self.focus == Field::Username => {
        self.focus = Field::Password;
        return ViewAction::None;
      }
      KeyCode::Enter => {
        self.submit();
        return ViewAction::None;
      }
      _ => {}
    }

    let input = match self.focus {
      Field::Username => &mut self.username,
      Field::Password => &mut self.password,
    };
    if input.handle_key(key) == InputResult::Cancelled {
      input.clear();
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let width = 50.min(area.width);
    let height = 12.min(area.height);
    let form = Rect::new(
      area.x + (area.width - width) / 2,
      area.y + (area.height - height) / 2,
      width,
      height,
    );
    frame.render_widget(Clear, form);

    let outer = Block::default()
      .title(" Sign in to Taskeri ")
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));
    let inner = outer.inner(form);
    frame.render_widget(outer, form);

    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Min(1),
      ])
      .split(inner);

    frame.render_widget(
      self.field_widget("Username", &self.username, Field::Username),
      chunks[0],
    );
    frame.render_widget(
      self.field_widget("Password", &self.password, Field::Password),
      chunks[1],
    );

    let status = if self.login.is_pending() {
      Line::from(Span::styled("Signing in...", Style::default().fg(Color::DarkGray)))
    } else {
      match &self.error {
        // Field problems are shown next to the fields
        Some(ApiError::Validation(_)) | None => Line::default(),
        Some(e) if !e.field_errors().is_empty() => Line::default(),
        Some(e) => Line::from(Span::styled(e.to_string(), Style::default().fg(Color::Red))),
      }
    };
    frame.render_widget(Paragraph::new(status).alignment(Alignment::Center), chunks[2]);
  }

  fn breadcrumb_label(&self) -> String {
    "Sign in".to_string()
  }

  fn captures_input(&self) -> bool {
    true
  }

  fn tick(&mut self) -> Vec<ViewAction> {
    let error = match self.login.poll() {
      Some(Ok(_)) => {
        self.password.clear();
        return vec![ViewAction::Home];
      }
      Some(Err(e)) => e.clone(),
      None => return Vec::new(),
    };
    self.password.clear();
    self.focus = if error.field_message("username").is_some() {
      Field::Username
    } else {
      Field::Password
    };
    self.error = Some(error);
    Vec::new()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new("tab", "next field").with_priority(10),
      ShortcutInfo::new("enter", "sign in").with_priority(20),
      ShortcutInfo::new("ctrl-c", "quit").with_priority(30),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::{json_response, ScriptedTransport};
  use crate::api::transport::Method;
  use crate::api::{AuthState, SessionStore};
  use crate::cache::CacheConfig;
  use crossterm::event::KeyModifiers;
  use serde_json::json;
  use std::sync::Arc;
  use std::time::Duration;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn type_str(view: &mut LoginView, s: &str) {
    for c in s.chars() {
      view.handle_key(key(KeyCode::Char(c)));
    }
  }

  fn client(transport: Arc<ScriptedTransport>) -> CachedClient {
    CachedClient::with_transport(transport, SessionStore::in_memory(None), CacheConfig::default())
  }

  async fn settle(view: &mut LoginView) -> ViewAction {
    for _ in 0..100 {
      let action = view.tick().into_iter().next();
      if action.is_some() || !view.login.is_pending() {
        return action.unwrap_or(ViewAction::None);
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    ViewAction::None
  }

  #[tokio::test]
  async fn test_successful_login_goes_home() {
    let transport = ScriptedTransport::new(|_| {
      json_response(200, json!({ "access_token": "a1", "refresh_token": "r1" }))
    });
    let client = client(transport.clone());
    let mut view = LoginView::new(client.clone(), Some("maija@example.com"));

    type_str(&mut view, "hunter2");
    view.handle_key(key(KeyCode::Enter));

    assert!(matches!(settle(&mut view).await, ViewAction::Home));
    assert_eq!(client.session().state(), AuthState::Authenticated);
    assert_eq!(transport.requests_to(Method::Post, "/token").len(), 1);
    assert!(view.password.is_empty());
  }

  #[tokio::test]
  async fn test_missing_fields_are_reported_per_field() {
    let transport = ScriptedTransport::new(|_| json_response(500, json!({})));
    let mut view = LoginView::new(client(transport.clone()), None);

    view.handle_key(key(KeyCode::Enter));
    view.handle_key(key(KeyCode::Enter));
    settle(&mut view).await;

    assert_eq!(view.field_error("username"), Some("Username is required"));
    assert_eq!(view.field_error("password"), Some("Password is required"));
    assert_eq!(view.focus, Field::Username);
    assert!(transport.requests().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_credentials_stay_on_form() {
    let transport = ScriptedTransport::new(|_| {
      json_response(401, json!({ "detail": "Incorrect username or password" }))
    });
    let mut view = LoginView::new(client(transport), Some("maija@example.com"));
    type_str(&mut view, "wrong");
    view.handle_key(key(KeyCode::Enter));

    assert!(matches!(settle(&mut view).await, ViewAction::None));
    assert_eq!(
      view.error.as_ref().map(|e| e.to_string()),
      Some("Incorrect username or password (HTTP 401)".to_string())
    );
    assert_eq!(view.focus, Field::Password);
  }
}
