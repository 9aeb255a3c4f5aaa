//! Sync lifecycle events and the listener registry.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::error;

/// Lifecycle events emitted by the sync manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// A pass started
  Start { message: String },
  /// About to apply operation `progress` of `total`
  Progress {
    message: String,
    progress: usize,
    total: usize,
  },
  /// The pass finished (individual operations may still have failed)
  Complete { message: String },
  /// The pass itself broke off
  Error { message: String },
}

impl SyncEvent {
  /// Wire name of the event type.
  pub fn kind(&self) -> &'static str {
    match self {
      SyncEvent::Start { .. } => "sync-start",
      SyncEvent::Progress { .. } => "sync-progress",
      SyncEvent::Complete { .. } => "sync-complete",
      SyncEvent::Error { .. } => "sync-error",
    }
  }

  pub fn message(&self) -> &str {
    match self {
      SyncEvent::Start { message }
      | SyncEvent::Progress { message, .. }
      | SyncEvent::Complete { message }
      | SyncEvent::Error { message } => message,
    }
  }
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
  next_id: u64,
  listeners: BTreeMap<u64, Listener>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
  // Listeners never run under the lock, so a poisoned registry is still consistent
  registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish/subscribe hub for [`SyncEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
  registry: Arc<Mutex<Registry>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a listener. It stays registered until the returned
  /// [`Subscription`] is dropped or unsubscribed.
  pub fn on<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&SyncEvent) + Send + Sync + 'static,
  {
    let mut registry = lock(&self.registry);
    let id = registry.next_id;
    registry.next_id += 1;
    registry.listeners.insert(id, Arc::new(listener));

    Subscription {
      id,
      registry: Arc::downgrade(&self.registry),
    }
  }

  /// Deliver `event` to every listener.
  ///
  /// A panicking listener is logged and skipped; the others still receive the event.
  pub fn emit(&self, event: &SyncEvent) {
    let listeners: Vec<(u64, Listener)> = lock(&self.registry)
      .listeners
      .iter()
      .map(|(id, listener)| (*id, Arc::clone(listener)))
      .collect();

    for (id, listener) in listeners {
      if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        error!(listener = id, event = event.kind(), "Sync event listener panicked");
      }
    }
  }

  pub fn listener_count(&self) -> usize {
    lock(&self.registry).listeners.len()
  }
}

/// Handle returned by [`EventBus::on`]. Dropping it removes the listener.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
  id: u64,
  registry: Weak<Mutex<Registry>>,
}

impl Subscription {
  /// Remove the listener now.
  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      lock(&registry).listeners.remove(&self.id);
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription").field("id", &self.id).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn start() -> SyncEvent {
    SyncEvent::Start {
      message: "go".to_string(),
    }
  }

  #[test]
  fn test_all_listeners_receive_events() {
    let bus = EventBus::new();
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(AtomicUsize::new(0));

    let seen = first.clone();
    let _a = bus.on(move |event| seen.lock().unwrap().push(event.kind()));
    let count = second.clone();
    let _b = bus.on(move |_| {
      count.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(&start());
    bus.emit(&SyncEvent::Complete {
      message: "done".to_string(),
    });

    assert_eq!(*first.lock().unwrap(), vec!["sync-start", "sync-complete"]);
    assert_eq!(second.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_unsubscribe_stops_delivery() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    let subscription = bus.on(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    bus.emit(&start());
    subscription.unsubscribe();
    bus.emit(&start());

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(bus.listener_count(), 0);
  }

  #[test]
  fn test_dropping_subscription_unregisters() {
    let bus = EventBus::new();
    {
      let _subscription = bus.on(|_| {});
      assert_eq!(bus.listener_count(), 1);
    }
    assert_eq!(bus.listener_count(), 0);
  }

  #[test]
  fn test_panicking_listener_does_not_block_others() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let _faulty = bus.on(|_| panic!("listener bug"));
    let counter = count.clone();
    let _healthy = bus.on(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(&start());
    bus.emit(&start());

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(bus.listener_count(), 2);
  }

  #[test]
  fn test_listener_may_subscribe_during_emit() {
    let bus = EventBus::new();
    let inner_bus = bus.clone();
    let extra = Arc::new(Mutex::new(Vec::new()));

    let holder = extra.clone();
    let _outer = bus.on(move |_| {
      holder.lock().unwrap().push(inner_bus.on(|_| {}));
    });

    bus.emit(&start());
    assert_eq!(bus.listener_count(), 2);
  }

  #[test]
  fn test_event_accessors() {
    let event = SyncEvent::Progress {
      message: "Syncing 1/2".to_string(),
      progress: 1,
      total: 2,
    };
    assert_eq!(event.kind(), "sync-progress");
    assert_eq!(event.message(), "Syncing 1/2");
  }
}
