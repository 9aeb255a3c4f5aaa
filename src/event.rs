use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use offsync::observer::SyncStatus;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh and query polling
  Tick,
  /// The sync status changed
  Status(SyncStatus),
}

/// Merges terminal input, a tick timer and sync status changes into one stream
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new(tick_rate: Duration, mut status: watch::Receiver<SyncStatus>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Terminal reader
    let input_tx = tx.clone();
    tokio::spawn(async move {
      loop {
        if event::poll(tick_rate).unwrap_or(false) {
          if let Ok(CrosstermEvent::Key(key)) = event::read() {
            if key.kind == KeyEventKind::Press && input_tx.send(Event::Key(key)).is_err() {
              break;
            }
          }
        } else if input_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    // Status forwarder
    tokio::spawn(async move {
      while status.changed().await.is_ok() {
        let snapshot = status.borrow_and_update().clone();
        if tx.send(Event::Status(snapshot)).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
