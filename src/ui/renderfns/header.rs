use super::relative_time;
use crate::ui::view::ShortcutInfo;
use chrono::Utc;
use offsync::observer::SyncStatus;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Draw the header bar with logo, title, sync indicator and shortcuts
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  title: &str,
  status: &SyncStatus,
  shortcuts: &[ShortcutInfo],
) {
  let mut spans = vec![
    Span::styled(" offsync ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", title), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
  ];
  spans.extend(status_spans(status));
  spans.push(Span::raw("  "));

  let mut shortcuts = shortcuts.to_vec();
  shortcuts.sort_by_key(|s| s.priority);
  for (i, shortcut) in shortcuts.iter().enumerate() {
    if i > 0 {
      spans.push(Span::raw("   "));
    }
    spans.push(Span::styled(
      format!("<{}>", shortcut.key),
      Style::default().fg(Color::Cyan),
    ));
    spans.push(Span::styled(
      format!(" {}", shortcut.label),
      Style::default().fg(Color::DarkGray),
    ));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

/// Connectivity, progress and queue counts. Counts are only shown when non-zero.
fn status_spans(status: &SyncStatus) -> Vec<Span<'static>> {
  let mut spans = Vec::new();

  if status.is_online {
    spans.push(Span::styled(" ● online ", Style::default().fg(Color::Green)));
  } else {
    spans.push(Span::styled(" ○ offline ", Style::default().fg(Color::Red).bold()));
  }

  if status.is_syncing {
    let progress = if status.sync_total > 0 {
      format!(" syncing {}/{} ", status.sync_progress, status.sync_total)
    } else {
      " syncing ".to_string()
    };
    spans.push(Span::styled(progress, Style::default().fg(Color::Yellow)));
  }

  if status.pending_count > 0 {
    spans.push(Span::styled(
      format!(" {} pending ", status.pending_count),
      Style::default().fg(Color::Yellow),
    ));
  }

  if status.failed_count > 0 {
    spans.push(Span::styled(
      format!(" {} failed ", status.failed_count),
      Style::default().fg(Color::Red).bold(),
    ));
  }

  if let Some(last_sync) = status.last_sync {
    spans.push(Span::styled(
      format!(" synced {} ", relative_time(last_sync, Utc::now())),
      Style::default().fg(Color::DarkGray),
    ));
  }

  spans
}

#[cfg(test)]
mod tests {
  use super::*;

  fn text(status: &SyncStatus) -> String {
    status_spans(status)
      .iter()
      .map(|s| s.content.as_ref())
      .collect()
  }

  #[test]
  fn test_quiet_when_all_synced() {
    let status = SyncStatus {
      is_online: true,
      ..SyncStatus::default()
    };
    assert_eq!(text(&status), " ● online ");
  }

  #[test]
  fn test_offline_with_queue() {
    let status = SyncStatus {
      is_online: false,
      pending_count: 2,
      failed_count: 1,
      ..SyncStatus::default()
    };
    let text = text(&status);
    assert!(text.contains("offline"));
    assert!(text.contains("2 pending"));
    assert!(text.contains("1 failed"));
  }

  #[test]
  fn test_sync_progress() {
    let status = SyncStatus {
      is_online: true,
      is_syncing: true,
      sync_progress: 1,
      sync_total: 3,
      last_sync: Some(Utc::now()),
      ..SyncStatus::default()
    };
    let text = text(&status);
    assert!(text.contains("syncing 1/3"));
    assert!(text.contains("synced just now"));
  }
}
