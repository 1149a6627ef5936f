use std::collections::BTreeSet;

use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

use super::BoardView;
use crate::api::api_types::Page;
use crate::api::types::Project;
use crate::api::CachedClient;
use crate::cache::{Query, QueryState};
use crate::ui::components::{KeyResult, SearchInput};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::truncate;
use crate::ui::view::{ShortcutInfo, View, ViewAction};

/// Home view: projects of the tenant, filtered with `/`
pub struct ProjectsView {
  client: CachedClient,
  hidden_columns: BTreeSet<String>,
  query: Query<Page<Project>>,
  list_state: ListState,
  search: SearchInput,
}

impl ProjectsView {
  pub fn new(client: CachedClient, hidden_columns: BTreeSet<String>) -> Self {
    let mut query = client.projects();
    query.fetch();

    Self {
      client,
      hidden_columns,
      query,
      list_state: ListState::default().with_selected(Some(0)),
      search: SearchInput::new(),
    }
  }

  fn filtered(&self) -> Vec<&Project> {
    self
      .query
      .data()
      .map(|page| {
        page
          .items
          .iter()
          .filter(|p| self.search.matches(&p.name))
          .collect()
      })
      .unwrap_or_default()
  }

  fn selected(&self) -> Option<&Project> {
    let idx = self.list_state.selected()?;
    self.filtered().get(idx).copied()
  }
}

impl View for ProjectsView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.search.handle_key(key) {
      KeyResult::Event(_) => {
        self.list_state.select(Some(0));
        return ViewAction::None;
      }
      KeyResult::Handled => return ViewAction::None,
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Enter => {
        if let Some(project) = self.selected() {
          let view = BoardView::new(
            self.client.clone(),
            project.id,
            project.name.clone(),
            &self.hidden_columns,
          );
          return ViewAction::Push(Box::new(view));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.filtered().len();
    ensure_valid_selection(&mut self.list_state, len);

    let total = self.query.data().map(|p| p.total).unwrap_or(0);
    let title = match self.query.state() {
      QueryState::Loading => " Projects (loading...) ".to_string(),
      QueryState::Error(e) => format!(" Projects (error: {}) ", e),
      _ if self.query.is_fetching() => format!(" Projects ({}) refreshing... ", total),
      _ if !self.search.query().is_empty() => {
        format!(" Projects ({}/{}) /{} ", len, total, self.search.query())
      }
      _ => format!(" Projects ({}) ", total),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 && !self.query.is_loading() {
      let content = if self.query.is_error() {
        "Failed to load projects. Press 'r' to retry."
      } else {
        "No projects found."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      self.search.render_overlay(frame, area);
      return;
    }

    let items: Vec<ListItem> = self
      .filtered()
      .iter()
      .map(|project| {
        let dates = match (project.start_date, project.end_date) {
          (Some(start), Some(end)) => format!("{} → {}", start, end),
          (Some(start), None) => format!("from {}", start),
          _ => String::new(),
        };
        ListItem::new(Line::from(vec![
          Span::styled(format!("{:>5} ", project.id), Style::default().fg(Color::Cyan)),
          Span::raw(format!("{:<40}", truncate(&project.name, 40))),
          Span::styled(dates, Style::default().fg(Color::DarkGray)),
        ]))
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(
        Style::default()
          .bg(Color::DarkGray)
          .add_modifier(Modifier::BOLD),
      )
      .highlight_symbol("> ");
    frame.render_stateful_widget(list, area, &mut self.list_state);

    self.search.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Projects".to_string()
  }

  fn captures_input(&self) -> bool {
    self.search.is_active()
  }

  fn tick(&mut self) -> Vec<ViewAction> {
    self.query.poll();
    Vec::new()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("/", "filter").with_priority(20),
      ShortcutInfo::new("enter", "board").with_priority(25),
      ShortcutInfo::new("r", "refresh").with_priority(40),
    ]
  }
}
