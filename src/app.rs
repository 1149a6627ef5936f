use crate::api::types::User;
use crate::api::{AuthState, CachedClient};
use crate::cache::Query;
use crate::commands::CommandKind;
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::ui;
use crate::ui::components::{CommandEvent, CommandInput, KeyResult, Notice, Notices};
use crate::ui::renderfns::extract_domain;
use crate::ui::view::{View, ViewAction};
use crate::ui::views::{BoardView, LoginView, NotificationsView, ProjectsView};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const TICK_RATE: Duration = Duration::from_millis(100);
const NOTICE_TTL: Duration = Duration::from_secs(6);
const GC_INTERVAL: Duration = Duration::from_secs(30);

/// Main application state
pub struct App {
  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  command_input: CommandInput,
  notices: Notices,

  client: CachedClient,
  config: Config,

  /// Current user, mounted once signed in
  me: Option<Query<User>>,
  signed_in: bool,
  last_gc: Instant,
  should_quit: bool,
}

impl App {
  pub fn new(config: Config, client: CachedClient) -> Self {
    let signed_in = client.session().state() != AuthState::Unauthenticated;
    let mut app = Self {
      view_stack: Vec::new(),
      command_input: CommandInput::new(),
      notices: Notices::new(NOTICE_TTL),
      client,
      config,
      me: None,
      signed_in,
      last_gc: Instant::now(),
      should_quit: false,
    };

    if signed_in {
      app.go_home();
    } else {
      app.show_login();
    }
    app
  }

  pub async fn run(&mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let result = self.event_loop().await;

    // Restore the terminal even when the loop failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    result
  }

  async fn event_loop(&mut self) -> Result<()> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    let mut events = EventHandler::new(TICK_RATE, self.client.session().watch());

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  // Accessors for drawing

  pub fn current_view(&self) -> Option<&dyn View> {
    self.view_stack.last().map(|v| v.as_ref())
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.view_stack.last_mut()
  }

  pub fn command_input(&self) -> &CommandInput {
    &self.command_input
  }

  pub fn notices_mut(&mut self) -> &mut Notices {
    &mut self.notices
  }

  pub fn breadcrumb(&self) -> Vec<String> {
    self.view_stack.iter().map(|v| v.breadcrumb_label()).collect()
  }

  /// Configured title, or the API host
  pub fn title(&self) -> String {
    self
      .config
      .title
      .clone()
      .unwrap_or_else(|| extract_domain(&self.config.api.url).to_string())
  }

  pub fn user_name(&self) -> Option<String> {
    if !self.signed_in {
      return None;
    }
    self
      .me
      .as_ref()
      .and_then(|q| q.data().cloned())
      .or_else(|| self.client.session().user())
      .map(|u| u.display_name())
  }

  // Navigation

  fn show_login(&mut self) {
    self.me = None;
    let login = LoginView::new(self.client.clone(), self.config.api.username.as_deref());
    self.view_stack = vec![Box::new(login)];
  }

  fn go_home(&mut self) {
    self.signed_in = true;

    let mut me = self.client.current_user();
    me.fetch();
    self.me = Some(me);

    let hidden = &self.config.board.hide_columns;
    let mut stack: Vec<Box<dyn View>> =
      vec![Box::new(ProjectsView::new(self.client.clone(), hidden.clone()))];
    if let Some(project_id) = self.config.default_project {
      stack.push(Box::new(BoardView::new(
        self.client.clone(),
        project_id,
        format!("Project {}", project_id),
        hidden,
      )));
    }
    self.view_stack = stack;
  }

  /// Project of the closest view that shows one
  fn current_project(&self) -> Option<(u64, String)> {
    self
      .view_stack
      .iter()
      .rev()
      .find_map(|v| v.project().map(|(id, name)| (id, name.to_string())))
  }

  fn apply(&mut self, action: ViewAction) {
    match action {
      ViewAction::None => {}
      ViewAction::Push(view) => {
        debug!(view = %view.breadcrumb_label(), "Push view");
        self.view_stack.push(view);
      }
      ViewAction::Pop => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
        } else {
          self.should_quit = true;
        }
      }
      ViewAction::Home => self.go_home(),
      ViewAction::Notify(notice) => self.notices.push(notice),
    }
  }

  // Events

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Resize => {}
      Event::Tick => self.tick(),
      Event::Auth(state) => self.handle_auth(state),
    }
  }

  fn tick(&mut self) {
    if let Some(me) = self.me.as_mut() {
      me.poll();
    }

    // Views below the top keep polling so their queries stay current
    let top = self.view_stack.len().saturating_sub(1);
    let mut actions = Vec::new();
    for (idx, view) in self.view_stack.iter_mut().enumerate() {
      actions.extend(view.tick().into_iter().map(|action| (idx, action)));
    }
    let mut closed = Vec::new();
    let mut rest = Vec::new();
    for (idx, action) in actions {
      match action {
        ViewAction::Pop if idx < top => closed.push(idx),
        ViewAction::Push(_) if idx < top => {}
        action => rest.push(action),
      }
    }
    // Highest index first so the lower indices stay valid
    for idx in closed.into_iter().rev().filter(|&idx| idx > 0) {
      debug!(view = idx, "Close background view");
      self.view_stack.remove(idx);
    }
    for action in rest {
      self.apply(action);
    }

    self.notices.expire();

    if self.last_gc.elapsed() >= GC_INTERVAL {
      self.last_gc = Instant::now();
      let collected = self.client.cache().collect_garbage();
      if collected > 0 {
        debug!(collected, "Collected idle cache records");
      }
    }
  }

  fn handle_auth(&mut self, state: AuthState) {
    debug!(?state, "Auth state changed");
    if state == AuthState::Unauthenticated && self.signed_in {
      self.signed_in = false;
      self.client.cache().clear();
      self.show_login();
      self.notices.push(Notice::error("Session expired, sign in again"));
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let captured = self.current_view().map(|v| v.captures_input()).unwrap_or(false);
    if !captured {
      match self.command_input.handle_key(key) {
        KeyResult::Event(event) => {
          self.run_command(event);
          return;
        }
        KeyResult::Handled => return,
        KeyResult::NotHandled => {}
      }

      if key.code == KeyCode::Esc && self.notices.dismiss() {
        return;
      }
    }

    if let Some(view) = self.view_stack.last_mut() {
      let action = view.handle_key(key);
      self.apply(action);
    }
  }

  fn run_command(&mut self, event: CommandEvent) {
    let command = match event {
      CommandEvent::Run(command) => command,
      CommandEvent::Unknown(input) => {
        self
          .notices
          .push(Notice::error(format!("Unknown command: {}", input)));
        return;
      }
      CommandEvent::Cancelled => return,
    };
    info!(command = command.name, "Run command");

    match command.kind {
      CommandKind::Projects => {
        self.view_stack.truncate(1);
      }
      CommandKind::Board => {
        let project = self
          .current_project()
          .or_else(|| self.config.default_project.map(|id| (id, format!("Project {}", id))));
        let Some((id, name)) = project else {
          self.notices.push(Notice::info("Open a project first"));
          return;
        };
        self.view_stack.truncate(1);
        self.view_stack.push(Box::new(BoardView::new(
          self.client.clone(),
          id,
          name,
          &self.config.board.hide_columns,
        )));
      }
      CommandKind::Notifications => {
        self.view_stack.truncate(1);
        self
          .view_stack
          .push(Box::new(NotificationsView::new(self.client.clone())));
      }
      CommandKind::Logout => {
        self.signed_in = false;
        self.client.logout();
        self.show_login();
        self.notices.push(Notice::info("Signed out"));
      }
      CommandKind::Quit => {
        self.should_quit = true;
      }
    }
  }
}
