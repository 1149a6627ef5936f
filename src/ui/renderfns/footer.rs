use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::ui::components::{Notice, NoticeLevel};

/// Draw the footer bar with view breadcrumb, or the current notice
pub fn draw_footer(frame: &mut Frame, area: Rect, breadcrumb: &[String], notice: Option<&Notice>) {
  let mut spans = vec![Span::raw(" ")];

  for (i, part) in breadcrumb.iter().enumerate() {
    if i > 0 {
      spans.push(Span::styled(" > ", Style::default().fg(Color::DarkGray)));
    }

    let style = if i == breadcrumb.len() - 1 {
      Style::default().fg(Color::Cyan).bold()
    } else {
      Style::default().fg(Color::White)
    };
    spans.push(Span::styled(part.clone(), style));
  }

  if let Some(notice) = notice {
    let style = match notice.level {
      NoticeLevel::Info => Style::default().fg(Color::Green),
      NoticeLevel::Error => Style::default().fg(Color::Red).bold(),
    };
    spans.push(Span::styled("  │ ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(notice.message.clone(), style));
    spans.push(Span::styled("  (Esc)", Style::default().fg(Color::DarkGray)));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}
