use crate::query::{Action, Query};
use crate::ui::components::{Alert, KeyResult};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{operation_color, relative_time, truncate};
use crate::ui::view::{ShortcutInfo, View, ViewAction};
use crate::ui::views::FailedOperationsView;
use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent};
use offsync::recovery::RecoveryController;
use offsync::remote::RemoteBackend;
use offsync::store::PendingOperation;
use offsync::sync::SyncManager;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use std::sync::Arc;
use std::time::Duration;

/// Root view: the writes still waiting to reach the backend
pub struct QueueView {
  manager: SyncManager,
  remote: Arc<dyn RemoteBackend>,
  probe_timeout: Duration,
  query: Query<Vec<PendingOperation>>,
  list_state: ListState,
  alert: Alert,
  reconnect: Option<Action<bool>>,
}

impl QueueView {
  pub fn new(manager: SyncManager, remote: Arc<dyn RemoteBackend>, probe_timeout: Duration) -> Self {
    let for_query = manager.clone();
    let mut query = Query::new(move || {
      let manager = for_query.clone();
      async move { manager.list_pending().map_err(|e| e.to_string()) }
    })
    .with_stale_time(Duration::from_secs(2));
    query.fetch();

    Self {
      manager,
      remote,
      probe_timeout,
      query,
      list_state: ListState::default(),
      alert: Alert::new(),
      reconnect: None,
    }
  }

  fn operations(&self) -> &[PendingOperation] {
    self.query.data().map(|v| v.as_slice()).unwrap_or(&[])
  }

  fn is_reconnecting(&self) -> bool {
    self.reconnect.as_ref().is_some_and(Action::is_running)
  }

  fn sync_now(&mut self) {
    if !self.manager.is_online() {
      self
        .alert
        .error("You are offline. Changes stay queued until the connection is back.");
      return;
    }
    self.manager.spawn_sync();
  }

  /// Leave or enter deliberate offline mode.
  fn toggle_offline(&mut self) {
    let connectivity = self.manager.connectivity().clone();
    if connectivity.is_forced_offline() {
      connectivity.set_forced_offline(false);
      // Check right away instead of waiting for the next probe
      let remote = self.remote.clone();
      let timeout = self.probe_timeout;
      self.reconnect = Some(Action::spawn(async move {
        Ok(connectivity.probe(remote.as_ref(), timeout).await)
      }));
    } else {
      connectivity.set_forced_offline(true);
    }
  }

  fn render_list(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.operations().len();
    ensure_valid_selection(&mut self.list_state, len);

    let mode = if self.manager.connectivity().is_forced_offline() {
      " [working offline]"
    } else {
      ""
    };
    let title = match self.query.error() {
      Some(e) => format!(" Pending changes (error: {}){} ", e, mode),
      None => format!(" Pending changes ({}){} ", len, mode),
    };

    let block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    if len == 0 {
      let content = if self.query.is_loading() && self.query.data().is_none() {
        "Loading..."
      } else {
        "Nothing waiting to sync."
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, area);
      return;
    }

    let now = Utc::now();
    let items: Vec<ListItem> = self
      .operations()
      .iter()
      .map(|op| {
        let mut spans = vec![
          Span::styled(
            format!("{:<22}", truncate(&op.label(), 22)),
            Style::default().fg(operation_color(op.operation)),
          ),
          Span::raw(" "),
          Span::styled(
            format!("{:<14}", truncate(&op.record_id().unwrap_or_default(), 14)),
            Style::default().fg(Color::Cyan),
          ),
          Span::raw(" "),
          Span::styled(
            format!("{:<10}", relative_time(op.timestamp, now)),
            Style::default().fg(Color::DarkGray),
          ),
        ];
        if let Some(error) = &op.error {
          spans.push(Span::styled(
            format!(" retry {}: {}", op.retry_count, truncate(error, 50)),
            Style::default().fg(Color::Red),
          ));
        }
        ListItem::new(Line::from(spans))
      })
      .collect();

    let list = List::new(items)
      .block(block)
      .highlight_style(
        Style::default()
          .bg(Color::DarkGray)
          .add_modifier(Modifier::BOLD),
      )
      .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut self.list_state);
  }
}

impl View for QueueView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    if !matches!(self.alert.handle_key(key), KeyResult::NotHandled) {
      return ViewAction::None;
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.list_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.list_state.select_previous(),
      KeyCode::Char('s') => self.sync_now(),
      KeyCode::Char('o') if !self.is_reconnecting() => self.toggle_offline(),
      KeyCode::Char('r') => self.query.refetch(),
      KeyCode::Char('f') => {
        return ViewAction::Push(Box::new(FailedOperationsView::new(RecoveryController::new(
          self.manager.clone(),
        ))));
      }
      KeyCode::Char('q') => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    self.render_list(frame, area);
    self.alert.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Queue".to_string()
  }

  fn tick(&mut self) {
    self.query.poll();
    if self.query.is_stale() {
      self.query.fetch();
    }

    if let Some(result) = self.reconnect.as_mut().and_then(Action::poll) {
      self.reconnect = None;
      if !matches!(result, Ok(true)) {
        self.alert.error("Backend is still unreachable; staying offline.");
      }
    }
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    if self.alert.is_active() {
      return vec![ShortcutInfo::new("enter", "dismiss").with_priority(10)];
    }
    let offline_label = if self.manager.connectivity().is_forced_offline() {
      "go online"
    } else {
      "work offline"
    };
    vec![
      ShortcutInfo::new("s", "sync").with_priority(10),
      ShortcutInfo::new("f", "failed").with_priority(20),
      ShortcutInfo::new("o", offline_label).with_priority(30),
      ShortcutInfo::new("r", "refresh").with_priority(40),
      ShortcutInfo::new("q", "quit").with_priority(90),
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
  use offsync::sync::SyncSettings;

  fn key(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
  }

  #[tokio::test]
  async fn test_sync_refused_while_offline() {
    let remote = Arc::new(MemoryBackend::new());
    let manager = SyncManager::new(
      Arc::new(SqliteStore::in_memory().unwrap()),
      remote.clone(),
      Connectivity::new(false),
      SyncSettings::default(),
    );
    let mut view = QueueView::new(manager, remote, Duration::from_secs(1));

    view.handle_key(key('s'));
    assert!(view.alert.is_active());
    let keys: Vec<&str> = view.shortcuts().iter().map(|s| s.key).collect();
    assert_eq!(keys, vec!["enter"]);
  }

  #[tokio::test]
  async fn test_going_online_waits_for_the_reconnect_check() {
    let remote = Arc::new(MemoryBackend::new());
    let connectivity = Connectivity::new(false);
    connectivity.set_forced_offline(true);
    let manager = SyncManager::new(
      Arc::new(SqliteStore::in_memory().unwrap()),
      remote.clone(),
      connectivity.clone(),
      SyncSettings::default(),
    );
    let mut view = QueueView::new(manager, remote, Duration::from_secs(1));

    view.handle_key(key('o'));
    assert!(!connectivity.is_forced_offline());
    assert!(view.is_reconnecting());

    // A second press while the check runs is ignored
    view.handle_key(key('o'));
    assert!(!connectivity.is_forced_offline());
  }
}
