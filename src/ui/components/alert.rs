use super::KeyResult;
use crate::ui::centered_rect;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
  Success,
  Error,
}

/// Message that blocks input until dismissed
#[derive(Debug, Clone, Default)]
pub struct Alert {
  current: Option<(AlertKind, String)>,
}

impl Alert {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.current.is_some()
  }

  pub fn success(&mut self, message: impl Into<String>) {
    self.current = Some((AlertKind::Success, message.into()));
  }

  pub fn error(&mut self, message: impl Into<String>) {
    self.current = Some((AlertKind::Error, message.into()));
  }

  /// Enter, Esc, Space or q dismiss. Other keys are swallowed.
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<()> {
    if self.current.is_none() {
      return KeyResult::NotHandled;
    }

    match key.code {
      KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') | KeyCode::Char('q') => {
        self.current = None;
        KeyResult::Event(())
      }
      _ => KeyResult::Handled,
    }
  }

  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    let Some((kind, message)) = &self.current else {
      return;
    };

    let (title, color) = match kind {
      AlertKind::Success => (" Done ", Color::Green),
      AlertKind::Error => (" Error ", Color::Red),
    };

    let width = (message.len() as u16 + 4).clamp(30, area.width.saturating_sub(4).max(30));
    let overlay_area = centered_rect(area, width, 6);
    frame.render_widget(Clear, overlay_area);

    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(color))
      .title(title);

    let text = vec![
      Line::from(message.as_str()),
      Line::from(""),
      Line::from(Span::styled(
        "press Enter to dismiss",
        Style::default().fg(Color::DarkGray),
      )),
    ];
    let paragraph = Paragraph::new(text)
      .block(block)
      .alignment(Alignment::Center)
      .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, overlay_area);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  #[test]
  fn test_alert_blocks_until_dismissed() {
    let mut alert = Alert::new();
    assert_eq!(alert.handle_key(key(KeyCode::Char('r'))), KeyResult::NotHandled);

    alert.error("Retry failed: database is locked");
    assert_eq!(alert.handle_key(key(KeyCode::Char('r'))), KeyResult::Handled);
    assert!(alert.is_active());

    assert_eq!(alert.handle_key(key(KeyCode::Enter)), KeyResult::Event(()));
    assert!(!alert.is_active());
  }
}
