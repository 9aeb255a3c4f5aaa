//! Reactive sync status for user interfaces.
//!
//! [`SyncObserver`] folds connectivity changes, sync events and periodic
//! polling of the store into a single [`SyncStatus`] that any number of
//! consumers can watch.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::sync::{Subscription, SyncEvent, SyncManager};

/// Default interval for re-reading queue counts from the store.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Snapshot of everything a status indicator needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
  pub is_online: bool,
  pub is_syncing: bool,
  pub pending_count: usize,
  pub failed_count: usize,
  pub last_sync: Option<DateTime<Utc>>,
  /// Message of the most recent sync event
  pub sync_message: Option<String>,
  pub sync_progress: usize,
  pub sync_total: usize,
}

impl SyncStatus {
  /// Whether anything is worth showing besides "all good".
  pub fn needs_attention(&self) -> bool {
    !self.is_online || self.is_syncing || self.pending_count > 0 || self.failed_count > 0
  }

  fn apply(&mut self, event: &SyncEvent) {
    self.sync_message = Some(event.message().to_string());
    match event {
      SyncEvent::Start { .. } => {
        self.is_syncing = true;
        self.sync_progress = 0;
        self.sync_total = 0;
      }
      SyncEvent::Progress {
        progress, total, ..
      } => {
        self.is_syncing = true;
        self.sync_progress = *progress;
        self.sync_total = *total;
      }
      SyncEvent::Complete { .. } | SyncEvent::Error { .. } => {
        self.is_syncing = false;
        self.sync_progress = 0;
        self.sync_total = 0;
      }
    }
  }
}

/// Reads counts and timestamps that live outside the event stream.
fn refresh_counts(manager: &SyncManager, status: &mut SyncStatus) {
  match manager.pending_count() {
    Ok(count) => status.pending_count = count,
    Err(e) => warn!(error = %e, "Could not read pending count"),
  }
  match manager.failed_count() {
    Ok(count) => status.failed_count = count,
    Err(e) => warn!(error = %e, "Could not read failed count"),
  }
  status.last_sync = manager.get_last_sync_time();
}

/// Background task that keeps a [`SyncStatus`] up to date.
///
/// Coming back online triggers exactly one sync pass. Dropping the observer
/// stops the task and unregisters its event listener.
pub struct SyncObserver {
  manager: SyncManager,
  status: watch::Receiver<SyncStatus>,
  refresh: Arc<Notify>,
  task: JoinHandle<()>,
  _subscription: Subscription,
}

impl SyncObserver {
  /// Start observing. Must be called from within a tokio runtime.
  pub fn spawn(manager: SyncManager, poll_interval: Duration) -> Self {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let subscription = manager.on(move |event| {
      let _ = event_tx.send(event.clone());
    });

    let mut online_rx = manager.connectivity().subscribe();
    let mut initial = SyncStatus {
      is_online: *online_rx.borrow_and_update(),
      is_syncing: manager.is_syncing(),
      ..SyncStatus::default()
    };
    refresh_counts(&manager, &mut initial);

    let (status_tx, status) = watch::channel(initial);
    let refresh = Arc::new(Notify::new());

    let task = {
      let manager = manager.clone();
      let refresh = refresh.clone();
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; counts were just read
        ticker.tick().await;

        loop {
          let mut next = status_tx.borrow().clone();
          tokio::select! {
            changed = online_rx.changed() => {
              if changed.is_err() {
                break;
              }
              let online = *online_rx.borrow_and_update();
              let came_online = online && !next.is_online;
              next.is_online = online;
              if came_online {
                debug!("Back online, starting sync");
                manager.spawn_sync();
              }
            }
            Some(event) = event_rx.recv() => {
              next.apply(&event);
              if !next.is_syncing {
                refresh_counts(&manager, &mut next);
              }
            }
            _ = ticker.tick() => refresh_counts(&manager, &mut next),
            _ = refresh.notified() => refresh_counts(&manager, &mut next),
          }

          status_tx.send_if_modified(|current| {
            if *current == next {
              false
            } else {
              *current = next;
              true
            }
          });
        }
      })
    };

    Self {
      manager,
      status,
      refresh,
      task,
      _subscription: subscription,
    }
  }

  /// Current status.
  pub fn status(&self) -> SyncStatus {
    self.status.borrow().clone()
  }

  /// Receiver notified on every status change.
  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.status.clone()
  }

  /// Re-read counts from the store without waiting for the next poll.
  pub fn refresh(&self) {
    self.refresh.notify_one();
  }

  /// Start a sync pass in the background. Does nothing while offline.
  pub fn trigger_sync(&self) -> JoinHandle<()> {
    self.manager.spawn_sync()
  }

  pub fn manager(&self) -> &SyncManager {
    &self.manager
  }

  pub fn queue_insert(&self, table: &str, data: Value) -> Result<String> {
    let id = self.manager.queue_insert(table, data)?;
    self.refresh();
    Ok(id)
  }

  pub fn queue_update(&self, table: &str, data: Value) -> Result<String> {
    let id = self.manager.queue_update(table, data)?;
    self.refresh();
    Ok(id)
  }

  pub fn queue_delete(&self, table: &str, id: &str) -> Result<String> {
    let op_id = self.manager.queue_delete(table, id)?;
    self.refresh();
    Ok(op_id)
  }

  pub fn cache_data<T: Serialize>(&self, key: &str, data: &T, ttl_minutes: u32) -> Result<()> {
    self.manager.cache_data(key, data, ttl_minutes)
  }

  pub fn get_cached_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    self.manager.get_cached_data(key)
  }
}

impl Drop for SyncObserver {
  fn drop(&mut self) {
    self.task.abort();
  }
}
