use std::collections::BTreeSet;

use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use tracing::debug;

use super::TaskDetailView;
use crate::api::api_types::Page;
use crate::api::types::{NewTask, Task};
use crate::api::CachedClient;
use crate::board::{group_tasks, resolve_drop, Column, DropOutcome, DropTarget};
use crate::cache::{Mutation, Query, QueryState};
use crate::ui::components::{InputResult, Notice, TextInput};
use crate::ui::renderfns::{priority_color, truncate};
use crate::ui::view::{ShortcutInfo, View, ViewAction};

/// A card lifted off the board, waiting to be dropped
struct Carry {
  task: Task,
  source: Column,
  source_index: usize,
  /// Column index the card hovers over
  over: usize,
}

/// Kanban board of one project. Cards are moved by picking them up with
/// space, steering with h/l and dropping with space or enter. `n` adds a
/// card to the selected column.
pub struct BoardView {
  client: CachedClient,
  project_id: u64,
  project_name: String,
  columns: Vec<Column>,

  query: Query<Page<Task>>,
  move_mutation: Mutation<Task>,
  moving: Option<u64>,
  create_mutation: Mutation<Task>,
  /// Name of the card being added, while typing it
  new_task: Option<TextInput>,

  selected_column: usize,
  selected_row: usize,
  carrying: Option<Carry>,
}

impl BoardView {
  pub fn new(
    client: CachedClient,
    project_id: u64,
    project_name: String,
    hidden_columns: &BTreeSet<String>,
  ) -> Self {
    let mut query = client.project_tasks(project_id);
    query.fetch();

    Self {
      client,
      project_id,
      project_name,
      columns: Column::visible(hidden_columns),
      query,
      move_mutation: Mutation::new(),
      moving: None,
      create_mutation: Mutation::new(),
      new_task: None,
      selected_column: 0,
      selected_row: 0,
      carrying: None,
    }
  }

  fn tasks(&self) -> &[Task] {
    self
      .query
      .data()
      .map(|page| page.items.as_slice())
      .unwrap_or(&[])
  }

  fn cards(&self, column: usize) -> Vec<&Task> {
    let Some(&column) = self.columns.get(column) else {
      return Vec::new();
    };
    group_tasks(self.tasks(), &[column])
      .into_iter()
      .next()
      .map(|(_, cards)| cards)
      .unwrap_or_default()
  }

  fn selected_task(&self) -> Option<&Task> {
    self.cards(self.selected_column).get(self.selected_row).copied()
  }

  fn move_horizontal(&mut self, direction: i32) {
    let count = self.columns.len();
    if count == 0 {
      return;
    }
    let step = |idx: usize| {
      if direction > 0 {
        (idx + 1).min(count - 1)
      } else {
        idx.saturating_sub(1)
      }
    };

    if let Some(carry) = self.carrying.as_mut() {
      carry.over = step(carry.over);
    } else {
      self.selected_column = step(self.selected_column);
      self.selected_row = 0;
    }
  }

  fn move_vertical(&mut self, direction: i32) {
    if self.carrying.is_some() {
      return;
    }
    let len = self.cards(self.selected_column).len();
    if len == 0 {
      return;
    }
    self.selected_row = if direction > 0 {
      (self.selected_row + 1) % len
    } else {
      self.selected_row.checked_sub(1).unwrap_or(len - 1)
    };
  }

  fn pick_up(&mut self) -> ViewAction {
    if self.move_mutation.is_pending() {
      return ViewAction::Notify(Notice::info("Wait for the previous move to finish"));
    }
    let Some(task) = self.selected_task().cloned() else {
      return ViewAction::None;
    };
    let Some(&source) = self.columns.get(self.selected_column) else {
      return ViewAction::None;
    };
    self.carrying = Some(Carry {
      task,
      source,
      source_index: self.selected_row,
      over: self.selected_column,
    });
    ViewAction::None
  }

  /// Drop the carried card on the column it hovers over. `None` as the
  /// destination is a drop outside the board.
  fn drop_card(&mut self, on_board: bool) -> ViewAction {
    let Some(carry) = self.carrying.take() else {
      return ViewAction::None;
    };
    let source = DropTarget::column(carry.source, carry.source_index);
    let destination = on_board
      .then(|| self.columns.get(carry.over))
      .flatten()
      .map(|&column| DropTarget::column(column, self.cards(carry.over).len()));

    match resolve_drop(&carry.task, &source, destination.as_ref()) {
      Ok(DropOutcome::Unchanged) => ViewAction::None,
      Ok(DropOutcome::Move(task)) => {
        debug!(task = task.id, status = ?task.status, "Dropping card");
        let client = self.client.clone();
        self.moving = Some(task.id);
        self.selected_column = carry.over;
        self.selected_row = 0;
        self
          .move_mutation
          .spawn(async move { client.update_task(&task).await });
        ViewAction::None
      }
      Err(e) => ViewAction::Notify(Notice::error(e.to_string())),
    }
  }

  fn start_new_task(&mut self) -> ViewAction {
    if self.columns.get(self.selected_column).is_none() {
      return ViewAction::None;
    }
    if self.create_mutation.is_pending() {
      return ViewAction::Notify(Notice::info("Wait for the previous card to be added"));
    }
    self.new_task = Some(TextInput::new());
    ViewAction::None
  }

  fn handle_new_task_key(&mut self, key: KeyEvent) -> ViewAction {
    let Some(input) = self.new_task.as_mut() else {
      return ViewAction::None;
    };
    let name = match input.handle_key(key) {
      InputResult::Submitted(name) => name.trim().to_string(),
      InputResult::Cancelled => {
        self.new_task = None;
        return ViewAction::None;
      }
      InputResult::Consumed | InputResult::NotHandled => return ViewAction::None,
    };
    if name.is_empty() {
      return ViewAction::Notify(Notice::error("Task name cannot be empty"));
    }
    self.new_task = None;

    let Some(&column) = self.columns.get(self.selected_column) else {
      return ViewAction::None;
    };
    let task = NewTask::new(name)
      .in_project(self.project_id)
      .with_status(column.status());
    debug!(name = %task.name, column = column.id(), "Adding card");
    let client = self.client.clone();
    self
      .create_mutation
      .spawn(async move { client.create_task(&task).await });
    ViewAction::None
  }

  fn render_column(&self, frame: &mut Frame, area: Rect, idx: usize, column: Column) {
    let cards = self.cards(idx);
    let focused = idx == self.selected_column && self.carrying.is_none();
    let hovered = self.carrying.as_ref().map(|c| c.over) == Some(idx);

    let border_color = if hovered {
      Color::Magenta
    } else if focused {
      Color::Yellow
    } else {
      Color::Blue
    };
    let block = Block::default()
      .title(format!(" {} ({}) ", column.title(), cards.len()))
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(border_color));

    let width = area.width.saturating_sub(6) as usize;
    let mut items: Vec<ListItem> = Vec::new();

    if let Some(carry) = self.carrying.as_ref().filter(|_| hovered) {
      items.push(ListItem::new(Line::from(Span::styled(
        format!("▸ {}", truncate(&carry.task.name, width)),
        Style::default().fg(Color::Magenta).bold(),
      ))));
    }

    for task in &cards {
      let lifted = self.carrying.as_ref().map(|c| c.task.id) == Some(task.id);
      let saving = self.moving == Some(task.id);
      let mut style = Style::default();
      if lifted {
        style = style.fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT);
      }
      let mut spans = vec![
        Span::styled("● ", Style::default().fg(priority_color(task.priority))),
        Span::styled(truncate(&task.name, width), style),
      ];
      if saving {
        spans.push(Span::styled(" …", Style::default().fg(Color::DarkGray)));
      }
      items.push(ListItem::new(Line::from(spans)));
    }

    let list = List::new(items).block(block).highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    );

    if focused && !cards.is_empty() {
      let mut state = ListState::default();
      state.select(Some(self.selected_row.min(cards.len() - 1)));
      frame.render_stateful_widget(list, area, &mut state);
    } else {
      frame.render_widget(list, area);
    }
  }
}

impl View for BoardView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    if self.new_task.is_some() {
      return self.handle_new_task_key(key);
    }

    match key.code {
      KeyCode::Char('h') | KeyCode::Left => self.move_horizontal(-1),
      KeyCode::Char('l') | KeyCode::Right => self.move_horizontal(1),
      KeyCode::Char('j') | KeyCode::Down => self.move_vertical(1),
      KeyCode::Char('k') | KeyCode::Up => self.move_vertical(-1),

      KeyCode::Char(' ') => {
        if self.carrying.is_some() {
          return self.drop_card(true);
        }
        return self.pick_up();
      }
      KeyCode::Enter => {
        if self.carrying.is_some() {
          return self.drop_card(true);
        }
        if let Some(task) = self.selected_task() {
          let view = TaskDetailView::new(self.client.clone(), task);
          return ViewAction::Push(Box::new(view));
        }
      }
      KeyCode::Esc if self.carrying.is_some() => return self.drop_card(false),
      KeyCode::Char('n') if self.carrying.is_none() => return self.start_new_task(),

      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let status = match self.query.state() {
      QueryState::Loading => Some("loading...".to_string()),
      QueryState::Error(e) => Some(format!("error: {}", e)),
      _ if self.query.mutation_pending() => Some("saving...".to_string()),
      _ if self.query.is_fetching() => Some("refreshing...".to_string()),
      _ => self.query.error().map(|e| format!("stale: {}", e)),
    };

    if self.columns.is_empty() || (self.tasks().is_empty() && self.query.is_error()) {
      let title = match &status {
        Some(s) => format!(" {} ({}) ", self.project_name, s),
        None => format!(" {} ", self.project_name),
      };
      let block = Block::default()
        .title(title)
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
      let content = if self.columns.is_empty() {
        "Every column is hidden. Check board.hide_columns in the config."
      } else {
        "Failed to load tasks. Press 'r' to retry."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([Constraint::Length(1), Constraint::Min(0)])
      .split(area);

    let mut title = vec![Span::styled(
      format!(" {} ", self.project_name),
      Style::default().fg(Color::Cyan).bold(),
    )];
    if let Some(status) = status {
      title.push(Span::styled(status, Style::default().fg(Color::DarkGray)));
    }
    if let Some(carry) = &self.carrying {
      title.push(Span::styled(
        format!("  moving '{}': h/l to steer, space to drop, esc to cancel", carry.task.name),
        Style::default().fg(Color::Magenta),
      ));
    }
    if let Some(input) = &self.new_task {
      let column = self
        .columns
        .get(self.selected_column)
        .map(|c| c.title())
        .unwrap_or_default();
      title = vec![Span::styled(
        format!(" New card in {}: ", column),
        Style::default().fg(Color::Yellow),
      )];
      title.extend(input.line(true).spans);
    }
    frame.render_widget(Paragraph::new(Line::from(title)), chunks[0]);

    let constraints: Vec<Constraint> = self
      .columns
      .iter()
      .map(|_| Constraint::Ratio(1, self.columns.len() as u32))
      .collect();
    let col_areas = Layout::horizontal(constraints).split(chunks[1]);

    for (idx, column) in self.columns.iter().enumerate() {
      self.render_column(frame, col_areas[idx], idx, *column);
    }
  }

  fn breadcrumb_label(&self) -> String {
    self.project_name.clone()
  }

  fn project(&self) -> Option<(u64, &str)> {
    Some((self.project_id, &self.project_name))
  }

  fn captures_input(&self) -> bool {
    self.carrying.is_some() || self.new_task.is_some()
  }

  fn tick(&mut self) -> Vec<ViewAction> {
    self.query.poll();

    let mut notices = Vec::new();
    match self.move_mutation.poll() {
      Some(Ok(task)) => notices.push(Notice::info(format!(
        "Moved '{}' to {}",
        task.name, task.status
      ))),
      Some(Err(e)) => notices.push(Notice::failed("Moving the task", e)),
      None => {}
    }
    if !self.move_mutation.is_pending() {
      self.moving = None;
    }
    match self.create_mutation.poll() {
      Some(Ok(task)) => notices.push(Notice::info(format!("Added '{}'", task.name))),
      Some(Err(e)) => notices.push(Notice::failed("Adding the task", e)),
      None => {}
    }
    notices.into_iter().map(ViewAction::Notify).collect()
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("space", "move card").with_priority(20),
      ShortcutInfo::new("n", "new card").with_priority(22),
      ShortcutInfo::new("enter", "details").with_priority(25),
      ShortcutInfo::new("r", "refresh").with_priority(40),
    ]
  }
}
