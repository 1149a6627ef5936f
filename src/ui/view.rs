use crossterm::event::KeyEvent;
use ratatui::prelude::*;

use super::components::Notice;

/// A keyboard shortcut hint for display in the header
#[derive(Debug, Clone)]
pub struct ShortcutInfo {
  pub key: &'static str,
  pub label: &'static str,
  pub priority: u8, // Lower = shown first
}

impl ShortcutInfo {
  pub const fn new(key: &'static str, label: &'static str) -> Self {
    Self {
      key,
      label,
      priority: 100,
    }
  }

  pub const fn with_priority(mut self, priority: u8) -> Self {
    self.priority = priority;
    self
  }
}

/// Actions that a view can request in response to user input
pub enum ViewAction {
  /// No action needed
  None,
  /// Push a new view onto the stack
  Push(Box<dyn View>),
  /// Pop current view from stack (go back)
  Pop,
  /// Replace the whole stack with the home view (after login)
  Home,
  /// Show a transient message in the footer
  Notify(Notice),
}

/// Trait for view behavior
///
/// Views handle their own input modes (search, comment entry, carrying a
/// card) and return actions for the App to execute:
/// App → View → Components
///
/// Views that load data asynchronously hold `Query<T>` values bound to
/// cache keys and poll them in `tick()`. Writes are tracked with
/// `Mutation<T>` and polled the same way.
pub trait View {
  /// Handle a key event, returning an action for App to execute
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction;

  /// Render the view to the frame
  fn render(&mut self, frame: &mut Frame, area: Rect);

  /// Get the breadcrumb label for this view
  fn breadcrumb_label(&self) -> String;

  /// Project shown by this view, for `:board` and the header
  fn project(&self) -> Option<(u64, &str)> {
    None
  }

  /// While true, every key goes to the view, including `:` and Esc.
  /// Text entry (login form, search, comments) relies on this.
  fn captures_input(&self) -> bool {
    false
  }

  /// Called on each tick to poll queries and mutations. Returns one
  /// action per finished mutation.
  fn tick(&mut self) -> Vec<ViewAction> {
    Vec::new()
  }

  /// Get keyboard shortcuts to display in the header
  /// Override this to provide view-specific shortcuts
  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("q", "back").with_priority(30),
    ]
  }
}
