use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Error,
}

/// A dismissible message shown in the footer
#[derive(Debug, Clone)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
  shown_at: Option<Instant>,
}

impl Notice {
  pub fn info(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Info,
      message: message.into(),
      shown_at: None,
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Error,
      message: message.into(),
      shown_at: None,
    }
  }

  /// Failure of a user-triggered write
  pub fn failed(action: &str, error: &ApiError) -> Self {
    Self::error(format!("{} failed: {}", action, error))
  }
}

/// Queue of notices; one is visible at a time until it expires or is
/// dismissed
#[derive(Debug)]
pub struct Notices {
  queue: VecDeque<Notice>,
  ttl: Duration,
}

impl Notices {
  pub fn new(ttl: Duration) -> Self {
    Self {
      queue: VecDeque::new(),
      ttl,
    }
  }

  pub fn push(&mut self, notice: Notice) {
    // The same message twice in a row adds nothing
    if self.queue.back().map(|n| &n.message) == Some(&notice.message) {
      return;
    }
    self.queue.push_back(notice);
  }

  /// The visible notice; starts its clock on first call
  pub fn current(&mut self) -> Option<&Notice> {
    let notice = self.queue.front_mut()?;
    notice.shown_at.get_or_insert_with(Instant::now);
    Some(notice)
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn dismiss(&mut self) -> bool {
    self.queue.pop_front().is_some()
  }

  /// Drop the visible notice once it has been shown for the ttl
  pub fn expire(&mut self) {
    let expired = self
      .queue
      .front()
      .and_then(|n| n.shown_at)
      .map(|t| t.elapsed() >= self.ttl)
      .unwrap_or(false);
    if expired {
      self.queue.pop_front();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_notices_show_in_order() {
    let mut notices = Notices::new(Duration::from_secs(5));
    notices.push(Notice::info("first"));
    notices.push(Notice::error("second"));

    assert_eq!(notices.current().map(|n| n.message.clone()), Some("first".to_string()));
    assert!(notices.dismiss());
    assert_eq!(notices.current().map(|n| n.level), Some(NoticeLevel::Error));
    assert!(notices.dismiss());
    assert!(notices.is_empty());
  }

  #[test]
  fn test_expiry_only_counts_shown_time() {
    let mut notices = Notices::new(Duration::ZERO);
    notices.push(Notice::info("hello"));

    // Not shown yet, so it stays
    notices.expire();
    assert!(!notices.is_empty());

    notices.current();
    notices.expire();
    assert!(notices.is_empty());
  }

  #[test]
  fn test_repeated_message_is_collapsed() {
    let mut notices = Notices::new(Duration::from_secs(5));
    notices.push(Notice::error("offline"));
    notices.push(Notice::error("offline"));
    notices.dismiss();
    assert!(notices.is_empty());
  }

  #[test]
  fn test_failed_notice_mentions_action() {
    let notice = Notice::failed("Delete task", &ApiError::from_response(500, b""));
    assert_eq!(notice.message, "Delete task failed: Server error (HTTP 500)");
  }
}
