use ratatui::prelude::Color;

use crate::api::types::{TaskPriority, TaskStatus};

/// Truncate a string to a maximum number of chars, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

pub fn status_color(status: TaskStatus) -> Color {
  match status {
    TaskStatus::Done => Color::Green,
    TaskStatus::InProgress => Color::Yellow,
    TaskStatus::Review => Color::Magenta,
    TaskStatus::Todo => Color::White,
  }
}

pub fn priority_color(priority: Option<TaskPriority>) -> Color {
  match priority {
    Some(TaskPriority::Urgent) => Color::Red,
    Some(TaskPriority::High) => Color::LightRed,
    Some(TaskPriority::Medium) => Color::Yellow,
    Some(TaskPriority::Low) | None => Color::DarkGray,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("hello", 10), "hello");
  }

  #[test]
  fn test_truncate_exact_length() {
    assert_eq!(truncate("hello", 5), "hello");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("hello world", 8), "hello...");
  }

  #[test]
  fn test_truncate_counts_chars() {
    assert_eq!(truncate("päivitys tehty", 8), "päivi...");
  }

  #[test]
  fn test_status_color() {
    assert_eq!(status_color(TaskStatus::Done), Color::Green);
    assert_eq!(status_color(TaskStatus::InProgress), Color::Yellow);
    assert_eq!(status_color(TaskStatus::Todo), Color::White);
  }

  #[test]
  fn test_priority_color() {
    assert_eq!(priority_color(Some(TaskPriority::Urgent)), Color::Red);
    assert_eq!(priority_color(None), Color::DarkGray);
  }
}
