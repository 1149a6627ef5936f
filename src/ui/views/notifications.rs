use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

use crate::api::api_types::Page;
use crate::api::types::Notification;
use crate::api::CachedClient;
use crate::cache::{Mutation, Query, QueryState};
use crate::ui::components::Notice;
use crate::ui::ensure_valid_selection;
use crate::ui::view::{ShortcutInfo, View, ViewAction};

pub struct NotificationsView {
  client: CachedClient,
  query: Query<Page<Notification>>,
  mark_read: Mutation<Notification>,
  list_state: ListState,
}

impl NotificationsView {
  pub fn new(client: CachedClient) -> Self {
    let mut query = client.notifications();
    query.fetch();

    Self {
      client,
      query,
      mark_read: Mutation::new(),
      list_state: ListState::default().with_selected(Some(0)),
    }
  }

  fn items(&self) -> &[Notification] {
    self
      .query
      .data()
      .map(|p| p.items.as_slice())
      .unwrap_or(&[])
  }

  fn unread(&self) -> usize {
    self.items().iter().filter(|n| !n.is_read).count()
  }

  fn mark_selected_read(&mut self) {
    let Some(notification) = self
      .list_state
      .selected()
      .and_then(|idx| self.items().get(idx))
      .filter(|n| !n.is_read)
      .cloned()
    else {
      return;
    };
    if self.mark_read.is_pending() {
      return;
    }
    let client = self.client.clone();
    self
      .mark_read
      .spawn(async move { client.mark_notification_read(&notification).await });
  }
}

impl View for NotificationsView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Enter | KeyCode::Char('m') => self.mark_selected_read(),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.items().len();
    ensure_valid_selection(&mut self.list_state, len);

    let title = match self.query.state() {
      QueryState::Loading => " Notifications (loading...) ".to_string(),
      QueryState::Error(e) => format!(" Notifications (error: {}) ", e),
      _ => format!(" Notifications ({} unread) ", self.unread()),
    };
    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 {
      let content = if self.query.is_loading() { "" } else { "Nothing new." };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let items: Vec<ListItem> = self
      .items()
      .iter()
      .map(|n| {
        let (marker, style) = if n.is_read {
          ("  ", Style::default().fg(Color::DarkGray))
        } else {
          ("● ", Style::default().fg(Color::White).bold())
        };
        let when = n
          .created_at
          .map(|t| t.format("%d.%m. %H:%M ").to_string())
          .unwrap_or_default();
        ListItem::new(Line::from(vec![
          Span::styled(marker, Style::default().fg(Color::Cyan)),
          Span::styled(when, Style::default().fg(Color::DarkGray)),
          Span::styled(n.message.clone(), style),
        ]))
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(Style::default().bg(Color::DarkGray))
      .highlight_symbol("> ");
    frame.render_stateful_widget(list, area, &mut self.list_state);
  }

  fn breadcrumb_label(&self) -> String {
    "Notifications".to_string()
  }

  fn tick(&mut self) -> Vec<ViewAction> {
    self.query.poll();
    match self.mark_read.poll() {
      Some(Err(e)) => vec![ViewAction::Notify(Notice::failed("Marking as read", e))],
      _ => Vec::new(),
    }
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("m", "mark read").with_priority(20),
      ShortcutInfo::new("q", "back").with_priority(30),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::{json_response, ScriptedTransport};
  use crate::api::transport::{Body, Method};
  use crate::api::SessionStore;
  use crate::cache::CacheConfig;
  use crossterm::event::KeyModifiers;
  use serde_json::json;
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn backend() -> Arc<ScriptedTransport> {
    let rows = Arc::new(Mutex::new(vec![
      json!({
        "id": 1, "user_id": 5, "message": "You were assigned 'Build'", "is_read": false,
        "link": "/tasks/2"
      }),
      json!({"id": 2, "user_id": 5, "message": "Leave approved", "is_read": true}),
    ]));
    ScriptedTransport::new(move |request| {
      let mut rows = rows.lock().unwrap();
      match (request.method, request.path.as_str()) {
        (Method::Get, "/notifications") => json_response(
          200,
          json!({ "items": *rows, "total": rows.len(), "page": 1, "page_size": 50 }),
        ),
        (Method::Put, "/notifications/1") => {
          let Body::Json(body) = &request.body else {
            return json_response(400, json!({}));
          };
          rows[0] = body.clone();
          json_response(200, body.clone())
        }
        _ => json_response(404, json!({ "detail": "Not found" })),
      }
    })
  }

  fn view(transport: Arc<ScriptedTransport>) -> NotificationsView {
    let session = SessionStore::in_memory(None);
    session.sign_in("token".to_string(), None, None);
    NotificationsView::new(CachedClient::with_transport(
      transport,
      session,
      CacheConfig::default(),
    ))
  }

  async fn settle(view: &mut NotificationsView) {
    for _ in 0..100 {
      view.tick();
      if view.query.is_success() && !view.query.is_fetching() && !view.mark_read.is_pending() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  #[tokio::test]
  async fn test_mark_read_updates_the_list() {
    let transport = backend();
    let mut view = view(transport.clone());
    settle(&mut view).await;
    assert_eq!(view.unread(), 1);

    view.handle_key(key(KeyCode::Char('m')));
    settle(&mut view).await;
    settle(&mut view).await;

    assert_eq!(view.unread(), 0);
    let puts = transport.requests_to(Method::Put, "/notifications/1");
    assert_eq!(puts.len(), 1);
    let Body::Json(body) = &puts[0].body else {
      panic!("expected a JSON body");
    };
    assert_eq!(body["is_read"], json!(true));
    assert_eq!(body["link"], json!("/tasks/2"));
  }

  #[tokio::test]
  async fn test_read_notification_is_not_sent_again() {
    let transport = backend();
    let mut view = view(transport.clone());
    settle(&mut view).await;

    view.handle_key(key(KeyCode::Char('j')));
    view.handle_key(key(KeyCode::Char('m')));
    settle(&mut view).await;

    assert!(transport.requests().iter().all(|r| r.method == Method::Get));
  }
}
