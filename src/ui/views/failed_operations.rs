use crate::query::{Action, Query, QueryState};
use crate::ui::components::{Alert, ConfirmDialog, ConfirmEvent, KeyResult};
use crate::ui::renderfns::{operation_color, truncate};
use crate::ui::view::{ShortcutInfo, View, ViewAction};
use crate::ui::{centered_rect, ensure_valid_selection};
use crossterm::event::{KeyCode, KeyEvent};
use offsync::recovery::{FailedOperationRow, RecoveryController};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};

/// Modal listing operations that ran out of retries
pub struct FailedOperationsView {
  recovery: RecoveryController,
  query: Query<Vec<FailedOperationRow>>,
  list_state: ListState,
  confirm: ConfirmDialog,
  alert: Alert,
  /// Retry in flight; yields the message for the alert
  action: Option<Action<String>>,
}

impl FailedOperationsView {
  pub fn new(recovery: RecoveryController) -> Self {
    let for_query = recovery.clone();
    let mut query = Query::new(move || {
      let recovery = for_query.clone();
      async move { recovery.load().map_err(|e| e.to_string()) }
    });
    query.fetch();

    Self {
      recovery,
      query,
      list_state: ListState::default(),
      confirm: ConfirmDialog::new(),
      alert: Alert::new(),
      action: None,
    }
  }

  fn rows(&self) -> &[FailedOperationRow] {
    self.query.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  fn selected_row(&self) -> Option<&FailedOperationRow> {
    self.list_state.selected().and_then(|i| self.rows().get(i))
  }

  fn is_busy(&self) -> bool {
    self.action.as_ref().is_some_and(Action::is_running)
  }

  fn retry_selected(&mut self) {
    let Some(id) = self.selected_row().map(|row| row.id.clone()) else {
      return;
    };
    let recovery = self.recovery.clone();
    self.action = Some(Action::spawn(async move {
      recovery
        .retry_one(&id)
        .await
        .map(|report| report.summary())
        .map_err(|e| format!("Retry failed: {}", e))
    }));
  }

  fn retry_all(&mut self) {
    if self.rows().is_empty() {
      return;
    }
    let recovery = self.recovery.clone();
    self.action = Some(Action::spawn(async move {
      recovery
        .retry_all()
        .await
        .map(|report| report.summary())
        .map_err(|e| format!("Retry failed: {}", e))
    }));
  }

  fn ask_clear_all(&mut self) {
    let count = self.rows().len();
    if count == 0 {
      return;
    }
    let noun = if count == 1 { "operation" } else { "operations" };
    self.confirm.show(
      "Clear failed operations",
      format!("Permanently discard {} failed {}? This cannot be undone.", count, noun),
    );
  }

  fn clear_all(&mut self) {
    match self.recovery.clear_all() {
      Ok(removed) => self.alert.success(format!("Discarded {} operations", removed)),
      Err(e) => self.alert.error(format!("Could not clear failed operations: {}", e)),
    }
    self.query.refetch();
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.rows().len();
    ensure_valid_selection(&mut self.list_state, len);

    let title = if self.is_busy() {
      " Failed operations (retrying...) ".to_string()
    } else {
      match self.query.state() {
        QueryState::Error(e) => format!(" Failed operations (error: {}) ", e),
        _ => format!(" Failed operations ({}) ", len),
      }
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Red));

    if len == 0 {
      let paragraph = Paragraph::new("No failed operations.")
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let width = area.width.saturating_sub(6) as usize;
    let items: Vec<ListItem> = self
      .rows()
      .iter()
      .map(|row| {
        let heading = Line::from(vec![
          Span::styled(
            row.label.clone(),
            Style::default().fg(operation_color(row.operation)).bold(),
          ),
          Span::styled(
            format!(
              "  {}  {} attempts",
              row.timestamp.format("%Y-%m-%d %H:%M"),
              row.retry_count
            ),
            Style::default().fg(Color::DarkGray),
          ),
        ]);
        let error = Line::from(Span::styled(
          format!("  {}", truncate(&row.error, width.max(10))),
          Style::default().fg(Color::Red),
        ));
        ListItem::new(vec![heading, error])
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(Style::default().bg(Color::DarkGray))
      .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut self.list_state);
  }
}

impl View for FailedOperationsView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    if !matches!(self.alert.handle_key(key), KeyResult::NotHandled) {
      return ViewAction::None;
    }

    match self.confirm.handle_key(key) {
      KeyResult::Event(ConfirmEvent::Confirmed) => {
        self.clear_all();
        return ViewAction::None;
      }
      KeyResult::Event(ConfirmEvent::Cancelled) | KeyResult::Handled => return ViewAction::None,
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('r') if !self.is_busy() => self.retry_selected(),
      KeyCode::Char('R') if !self.is_busy() => self.retry_all(),
      KeyCode::Char('c') if !self.is_busy() => self.ask_clear_all(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let width = (area.width - area.width / 5).max(40);
    let height = (area.height - area.height / 3).max(8);
    let modal = centered_rect(area, width, height);
    frame.render_widget(Clear, modal);

    self.render_list(frame, modal);
    self.confirm.render_overlay(frame, modal);
    self.alert.render_overlay(frame, modal);
  }

  fn breadcrumb_label(&self) -> String {
    "Failed".to_string()
  }

  fn is_modal(&self) -> bool {
    true
  }

  fn tick(&mut self) {
    self.query.poll();

    if let Some(result) = self.action.as_mut().and_then(Action::poll) {
      self.action = None;
      match result {
        Ok(message) => self.alert.success(message),
        Err(message) => self.alert.error(message),
      }
      self.query.refetch();
    }
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    if self.confirm.is_active() {
      return vec![
        ShortcutInfo::new("y", "confirm").with_priority(10),
        ShortcutInfo::new("n", "cancel").with_priority(20),
      ];
    }
    if self.alert.is_active() {
      return vec![ShortcutInfo::new("enter", "dismiss").with_priority(10)];
    }
    vec![
      ShortcutInfo::new("r", "retry").with_priority(10),
      ShortcutInfo::new("R", "retry all").with_priority(20),
      ShortcutInfo::new("c", "clear all").with_priority(30),
      ShortcutInfo::new("esc", "close").with_priority(90),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;
  use offsync::connectivity::Connectivity;
  use offsync::remote::MemoryBackend;
  use offsync::store::SqliteStore;
  use offsync::sync::{SyncManager, SyncSettings};
  use std::sync::Arc;

  fn view() -> FailedOperationsView {
    let manager = SyncManager::new(
      Arc::new(SqliteStore::in_memory().unwrap()),
      Arc::new(MemoryBackend::new()),
      Connectivity::new(false),
      SyncSettings::default(),
    );
    FailedOperationsView::new(RecoveryController::new(manager))
  }

  fn keys(view: &FailedOperationsView) -> Vec<&'static str> {
    view.shortcuts().iter().map(|s| s.key).collect()
  }

  #[tokio::test]
  async fn test_shortcuts_follow_overlays() {
    let mut view = view();
    assert_eq!(keys(&view), vec!["r", "R", "c", "esc"]);

    view.confirm.show("Clear failed operations", "Sure?");
    assert_eq!(keys(&view), vec!["y", "n"]);
    view.handle_key(KeyEvent::new(KeyCode::Char('n'), KeyModifiers::NONE));

    view.alert.error("Retry failed: database is locked");
    assert_eq!(keys(&view), vec!["enter"]);
  }

  #[tokio::test]
  async fn test_busy_only_while_action_runs() {
    let mut view = view();
    assert!(!view.is_busy());

    view.action = Some(Action::spawn(std::future::pending::<Result<String, String>>()));
    assert!(view.is_busy());

    view.action = Some(Action::spawn(async { Ok("Retried 1 operation, all synced".to_string()) }));
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    view.tick();
    assert!(!view.is_busy());
    assert!(view.alert.is_active());
  }
}
