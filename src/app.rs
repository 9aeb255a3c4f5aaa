use crate::event::{Event, EventHandler};
use crate::ui::renderfns::{draw_footer, draw_header};
use crate::ui::view::{View, ViewAction};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use offsync::observer::{SyncObserver, SyncStatus};
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;

/// Main application state
pub struct App {
  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,

  /// Header title
  title: String,

  /// Last status reported by the observer
  status: SyncStatus,

  observer: SyncObserver,

  should_quit: bool,
}

impl App {
  pub fn new(title: String, observer: SyncObserver, root: Box<dyn View>) -> Self {
    Self {
      view_stack: vec![root],
      title,
      status: observer.status(),
      observer,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250), self.observer.subscribe());

    let result = self.event_loop(&mut terminal, &mut events).await;

    // Restore the terminal even if the loop failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| self.draw(frame))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {
        for view in &mut self.view_stack {
          view.tick();
        }
      }
      Event::Status(status) => self.status = status,
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let Some(view) = self.view_stack.last_mut() else {
      self.should_quit = true;
      return;
    };

    match view.handle_key(key) {
      ViewAction::None => {}
      ViewAction::Push(view) => self.view_stack.push(view),
      ViewAction::Pop => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
          self.observer.refresh();
        } else {
          self.should_quit = true;
        }
      }
    }
  }

  fn draw(&mut self, frame: &mut Frame) {
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(1), // Header
        Constraint::Min(1),    // Main content
        Constraint::Length(1), // Footer
      ])
      .split(frame.area());

    let shortcuts = self
      .view_stack
      .last()
      .map(|v| v.shortcuts())
      .unwrap_or_default();
    draw_header(frame, chunks[0], &self.title, &self.status, &shortcuts);

    // A modal on top keeps the view below it visible
    let len = self.view_stack.len();
    let first = match self.view_stack.last() {
      Some(top) if top.is_modal() && len > 1 => len - 2,
      _ => len.saturating_sub(1),
    };
    for view in &mut self.view_stack[first..] {
      view.render(frame, chunks[1]);
    }

    let breadcrumb: Vec<String> = self
      .view_stack
      .iter()
      .map(|v| v.breadcrumb_label())
      .collect();
    draw_footer(
      frame,
      chunks[2],
      &breadcrumb,
      self.status.sync_message.as_deref(),
    );
  }
}
