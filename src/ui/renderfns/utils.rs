use chrono::{DateTime, Utc};
use offsync::store::OperationKind;
use ratatui::prelude::Color;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for an operation type
pub fn operation_color(operation: OperationKind) -> Color {
  match operation {
    OperationKind::Insert => Color::Green,
    OperationKind::Update => Color::Yellow,
    OperationKind::Delete => Color::Red,
  }
}

/// Short relative time, e.g. "just now", "5m ago", "3d ago"
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let seconds = (now - at).num_seconds().max(0);
  match seconds {
    0..=59 => "just now".to_string(),
    60..=3599 => format!("{}m ago", seconds / 60),
    3600..=86399 => format!("{}h ago", seconds / 3600),
    _ => format!("{}d ago", seconds / 86400),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

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
  fn test_truncate_multibyte() {
    assert_eq!(truncate("Müller-Lüdenscheidt", 8), "Mülle...");
  }

  #[test]
  fn test_operation_color() {
    assert_eq!(operation_color(OperationKind::Insert), Color::Green);
    assert_eq!(operation_color(OperationKind::Delete), Color::Red);
  }

  #[test]
  fn test_relative_time() {
    let now = Utc::now();
    assert_eq!(relative_time(now - Duration::seconds(10), now), "just now");
    assert_eq!(relative_time(now - Duration::minutes(5), now), "5m ago");
    assert_eq!(relative_time(now - Duration::hours(2), now), "2h ago");
    assert_eq!(relative_time(now - Duration::days(3), now), "3d ago");
    // Clock skew
    assert_eq!(relative_time(now + Duration::minutes(1), now), "just now");
  }
}
