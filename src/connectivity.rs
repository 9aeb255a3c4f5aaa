//! Online/offline state.
//!
//! The current state lives in a watch channel so any number of tasks can
//! observe transitions. It is fed either by explicit calls to
//! [`Connectivity::set_online`] or by a background probe that pings the
//! backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::RemoteBackend;

#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
  forced_offline: Arc<AtomicBool>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self {
      tx: Arc::new(tx),
      forced_offline: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the observed network state. Returns true if it changed.
  ///
  /// While forced offline, reports of being online are ignored.
  pub fn set_online(&self, online: bool) -> bool {
    let online = online && !self.forced_offline.load(Ordering::Acquire);
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      if online {
        info!("Connection restored");
      } else {
        info!("Connection lost, working offline");
      }
    }
    changed
  }

  /// Pin the state to offline regardless of what the network says.
  pub fn set_forced_offline(&self, forced: bool) {
    self.forced_offline.store(forced, Ordering::Release);
    if forced {
      self.set_online(false);
    }
  }

  pub fn is_forced_offline(&self) -> bool {
    self.forced_offline.load(Ordering::Acquire)
  }

  /// Receiver that observes every subsequent transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Ping the backend once and record the result. Returns whether it answered.
  pub async fn probe(&self, remote: &dyn RemoteBackend, timeout: Duration) -> bool {
    let reachable = matches!(tokio::time::timeout(timeout, remote.ping()).await, Ok(Ok(())));
    debug!(reachable, "Connectivity probe");
    self.set_online(reachable);
    reachable
  }

  /// Ping the backend every `interval` and update the state from the result.
  pub fn spawn_probe(
    &self,
    remote: Arc<dyn RemoteBackend>,
    interval: Duration,
    timeout: Duration,
  ) -> JoinHandle<()> {
    let connectivity = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        connectivity.probe(remote.as_ref(), timeout).await;
      }
    })
  }
}

impl std::fmt::Debug for Connectivity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connectivity")
      .field("online", &self.is_online())
      .field("forced_offline", &self.is_forced_offline())
      .finish()
  }
}
