//! Sync manager: drains the offline queue against the remote backend.
//!
//! A pass works on a snapshot of the pending queue taken when it starts and
//! applies operations strictly in enqueue order. At most one pass runs at a
//! time; triggering another while one is in flight is a no-op. Operations
//! queued during a pass are picked up by the next one.
//!
//! "One at a time" holds across processes too: a pass only starts after
//! taking the store's sync lease, which the dashboard and `offsync sync`
//! share through the same database.

mod events;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::remote::{self, RemoteBackend, RemoteError};
use crate::store::{OperationKind, OperationStatus, OperationStore, PendingOperation};

pub use events::{EventBus, Subscription, SyncEvent};

/// Tunables for sync passes.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Upper bound for a single remote call
  pub request_timeout: Duration,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      request_timeout: Duration::from_secs(30),
    }
  }
}

/// What a single pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Operations in the snapshot
  pub total: usize,
  /// Confirmed by the backend and removed from the queue
  pub synced: usize,
  /// Attempted and rejected
  pub failed: usize,
  /// Of `failed`, those that ran out of retries
  pub exhausted: usize,
  /// Skipped because an earlier write to the same record has not gone through
  pub deferred: usize,
}

impl SyncReport {
  pub fn summary(&self) -> String {
    if self.total == 0 {
      return "Everything is up to date".to_string();
    }

    let mut summary = format!("Synced {} of {} operations", self.synced, self.total);
    if self.failed > 0 {
      summary.push_str(&format!(", {} failed", self.failed));
    }
    if self.deferred > 0 {
      summary.push_str(&format!(", {} waiting on earlier changes", self.deferred));
    }
    summary
  }
}

/// Result of calling [`SyncManager::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Another pass was already running, here or in another process
  Skipped,
  /// Not attempted because the backend is unreachable
  Offline,
  Completed(SyncReport),
}

/// Identity of a record across operations: `(table, record id)`.
type RecordKey = (String, String);

fn record_key(op: &PendingOperation) -> Option<RecordKey> {
  op.record_id().map(|id| (op.table.clone(), id))
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for PassGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Extra lease time on top of one request, so renewing between operations
/// never races the expiry.
const LEASE_GRACE: Duration = Duration::from_secs(30);

/// The store-level sync lease, released when the pass ends.
struct PassLease<'a> {
  store: &'a dyn OperationStore,
  owner: &'a str,
  ttl: Duration,
}

impl<'a> PassLease<'a> {
  fn acquire(store: &'a dyn OperationStore, owner: &'a str, ttl: Duration) -> Result<Option<Self>> {
    let lease = Self { store, owner, ttl };
    Ok(lease.renew()?.then_some(lease))
  }

  fn renew(&self) -> Result<bool> {
    self.store.acquire_sync_lease(self.owner, self.ttl)
  }
}

impl Drop for PassLease<'_> {
  fn drop(&mut self) {
    if let Err(e) = self.store.release_sync_lease(self.owner) {
      warn!(error = %e, "Could not release sync lease");
    }
  }
}

struct Inner {
  store: Arc<dyn OperationStore>,
  remote: Arc<dyn RemoteBackend>,
  connectivity: Connectivity,
  events: EventBus,
  settings: SyncSettings,
  syncing: AtomicBool,
  /// Lease owner id, unique per manager
  owner: String,
  last_sync: Mutex<Option<DateTime<Utc>>>,
}

/// Drives queued writes to the backend and reports progress.
///
/// Cloning is cheap; all clones share the same queue, listeners and
/// in-flight flag.
#[derive(Clone)]
pub struct SyncManager {
  inner: Arc<Inner>,
}

impl SyncManager {
  pub fn new(
    store: Arc<dyn OperationStore>,
    remote: Arc<dyn RemoteBackend>,
    connectivity: Connectivity,
    settings: SyncSettings,
  ) -> Self {
    let last_sync = store.last_sync().unwrap_or_else(|e| {
      warn!(error = %e, "Could not read last sync time");
      None
    });

    Self {
      inner: Arc::new(Inner {
        store,
        remote,
        connectivity,
        events: EventBus::new(),
        settings,
        syncing: AtomicBool::new(false),
        owner: Uuid::new_v4().to_string(),
        last_sync: Mutex::new(last_sync),
      }),
    }
  }

  /// Run one pass over the pending queue.
  ///
  /// Per-operation failures are recorded on the operation and do not stop the
  /// pass. An `Err` means the pass itself broke off (e.g. the store failed);
  /// a `sync-error` event is emitted in that case.
  pub async fn sync(&self) -> Result<SyncOutcome> {
    let Some(_guard) = PassGuard::acquire(&self.inner.syncing) else {
      debug!("Sync already in progress, skipping");
      return Ok(SyncOutcome::Skipped);
    };

    let ttl = self.inner.settings.request_timeout.saturating_add(LEASE_GRACE);
    let lease = match PassLease::acquire(self.inner.store.as_ref(), &self.inner.owner, ttl) {
      Ok(Some(lease)) => lease,
      Ok(None) => {
        debug!("Another process is syncing, skipping");
        return Ok(SyncOutcome::Skipped);
      }
      Err(e) => {
        error!(error = %e, "Could not take the sync lease");
        self.emit(SyncEvent::Error {
          message: format!("Sync failed: {}", e),
        });
        return Err(e);
      }
    };

    self.emit(SyncEvent::Start {
      message: "Syncing offline changes...".to_string(),
    });

    match self.drain(&lease).await {
      Ok(report) => {
        let now = Utc::now();
        *self
          .inner
          .last_sync
          .lock()
          .unwrap_or_else(PoisonError::into_inner) = Some(now);
        if let Err(e) = self.inner.store.set_last_sync(now) {
          warn!(error = %e, "Could not persist last sync time");
        }

        info!(
          total = report.total,
          synced = report.synced,
          failed = report.failed,
          deferred = report.deferred,
          "Sync pass complete"
        );
        self.emit(SyncEvent::Complete {
          message: report.summary(),
        });
        Ok(SyncOutcome::Completed(report))
      }
      Err(e) => {
        error!(error = %e, "Sync pass aborted");
        self.emit(SyncEvent::Error {
          message: format!("Sync failed: {}", e),
        });
        Err(e)
      }
    }
  }

  /// Run a pass only when connectivity says the backend is reachable.
  ///
  /// Everything that syncs on its own (background passes, retries from the
  /// recovery screen) goes through here, so nothing spends retries offline.
  pub async fn sync_if_online(&self) -> Result<SyncOutcome> {
    if !self.is_online() {
      debug!("Offline, leaving the queue for the next connection");
      return Ok(SyncOutcome::Offline);
    }
    self.sync().await
  }

  async fn drain(&self, lease: &PassLease<'_>) -> Result<SyncReport> {
    let store = &self.inner.store;
    let pending = store.list_pending()?;
    let mut report = SyncReport {
      total: pending.len(),
      ..SyncReport::default()
    };
    if pending.is_empty() {
      return Ok(report);
    }

    // Earliest unfinished write per record; later writes to it must wait
    let mut blocked: HashMap<RecordKey, u64> = HashMap::new();
    for op in store.get_failed_operations()? {
      if let Some(key) = record_key(&op) {
        let seq = blocked.entry(key).or_insert(op.sequence);
        *seq = (*seq).min(op.sequence);
      }
    }

    for (index, op) in pending.iter().enumerate() {
      if !lease.renew()? {
        warn!("Sync lease expired and was taken over, stopping pass");
        break;
      }

      self.emit(SyncEvent::Progress {
        message: format!("Syncing {} ({}/{})", op.label(), index + 1, report.total),
        progress: index + 1,
        total: report.total,
      });

      let key = record_key(op);
      if let Some(key) = &key {
        if blocked.get(key).is_some_and(|seq| *seq < op.sequence) {
          debug!(id = %op.id, table = %op.table, "Deferring operation behind an earlier failure");
          report.deferred += 1;
          continue;
        }
      }

      match self.apply(op).await {
        Ok(()) => {
          store.remove(&op.id)?;
          report.synced += 1;
          debug!(id = %op.id, table = %op.table, operation = %op.operation, "Operation synced");
        }
        Err(e) => {
          let status = store.mark_failed(&op.id, &e.to_string())?;
          report.failed += 1;
          if status == OperationStatus::Failed {
            report.exhausted += 1;
          }
          warn!(
            id = %op.id,
            table = %op.table,
            operation = %op.operation,
            retries = op.retry_count + 1,
            error = %e,
            "Operation failed to sync"
          );
          if let Some(key) = key {
            blocked.entry(key).or_insert(op.sequence);
          }
        }
      }
    }

    Ok(report)
  }

  async fn apply(&self, op: &PendingOperation) -> Result<(), RemoteError> {
    let timeout = self.inner.settings.request_timeout;
    match tokio::time::timeout(timeout, remote::dispatch(self.inner.remote.as_ref(), op)).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::Timeout(timeout)),
    }
  }

  /// Start a pass in the background if online. Errors surface through events.
  pub fn spawn_sync(&self) -> JoinHandle<()> {
    let manager = self.clone();
    tokio::spawn(async move {
      if let Err(e) = manager.sync_if_online().await {
        debug!(error = %e, "Background sync failed");
      }
    })
  }

  /// Queue an insert of `data` into `table`.
  pub fn queue_insert(&self, table: &str, data: Value) -> Result<String> {
    validate_table(table)?;
    if !data.is_object() {
      return Err(invalid(table, "insert payload must be a JSON object"));
    }
    self.enqueue(table, OperationKind::Insert, data)
  }

  /// Queue an update of the record identified by `data["id"]`.
  pub fn queue_update(&self, table: &str, data: Value) -> Result<String> {
    validate_table(table)?;
    let has_id = data
      .get("id")
      .is_some_and(|id| id.is_number() || id.as_str().is_some_and(|s| !s.is_empty()));
    if !has_id {
      return Err(invalid(table, "update payload must be an object with an id"));
    }
    self.enqueue(table, OperationKind::Update, data)
  }

  /// Queue a delete of record `id`.
  pub fn queue_delete(&self, table: &str, id: &str) -> Result<String> {
    validate_table(table)?;
    if id.trim().is_empty() {
      return Err(invalid(table, "delete needs a record id"));
    }
    self.enqueue(table, OperationKind::Delete, serde_json::json!({ "id": id }))
  }

  /// Persist the operation, then try to push it right away if online.
  fn enqueue(&self, table: &str, operation: OperationKind, payload: Value) -> Result<String> {
    let id = self.inner.store.enqueue(table, operation, payload)?;
    info!(%id, table, %operation, "Operation queued");

    if self.inner.connectivity.is_online() {
      if tokio::runtime::Handle::try_current().is_ok() {
        self.spawn_sync();
      } else {
        debug!("No async runtime, leaving sync to the next trigger");
      }
    }
    Ok(id)
  }

  /// Subscribe to lifecycle events.
  pub fn on<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&SyncEvent) + Send + Sync + 'static,
  {
    self.inner.events.on(listener)
  }

  /// Number of registered event listeners.
  pub fn listener_count(&self) -> usize {
    self.inner.events.listener_count()
  }

  fn emit(&self, event: SyncEvent) {
    self.inner.events.emit(&event);
  }

  pub fn is_syncing(&self) -> bool {
    self.inner.syncing.load(Ordering::Acquire)
  }

  pub fn is_online(&self) -> bool {
    self.inner.connectivity.is_online()
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.inner.connectivity
  }

  pub fn get_last_sync_time(&self) -> Option<DateTime<Utc>> {
    *self
      .inner
      .last_sync
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  pub fn pending_count(&self) -> Result<usize> {
    self.inner.store.pending_count()
  }

  pub fn failed_count(&self) -> Result<usize> {
    self.inner.store.failed_count()
  }

  pub fn list_pending(&self) -> Result<Vec<PendingOperation>> {
    self.inner.store.list_pending()
  }

  pub fn get_failed_operations(&self) -> Result<Vec<PendingOperation>> {
    self.inner.store.get_failed_operations()
  }

  pub fn retry_failed_operation(&self, id: &str) -> Result<()> {
    self.inner.store.retry_failed_operation(id)
  }

  pub fn clear_failed_operations(&self) -> Result<usize> {
    self.inner.store.clear_failed_operations()
  }

  /// Cache a serializable value for `ttl_minutes`.
  pub fn cache_data<T: Serialize>(&self, key: &str, data: &T, ttl_minutes: u32) -> Result<()> {
    let value = serde_json::to_value(data)?;
    self.inner.store.cache_data(key, &value, ttl_minutes)
  }

  /// Read a cached value; `None` if missing or expired.
  pub fn get_cached_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    self
      .inner
      .store
      .get_cached_data(key)?
      .map(serde_json::from_value)
      .transpose()
      .map_err(Error::from)
  }

  pub fn invalidate_cache(&self, key: &str) -> Result<bool> {
    self.inner.store.invalidate_cache(key)
  }

  /// Drop every expired cache entry. Returns how many were removed.
  pub fn purge_expired_cache(&self) -> Result<usize> {
    self.inner.store.purge_expired_cache()
  }
}

fn invalid(table: &str, reason: &str) -> Error {
  Error::InvalidPayload {
    table: table.to_string(),
    reason: reason.to_string(),
  }
}

fn validate_table(table: &str) -> Result<()> {
  if table.trim().is_empty() {
    return Err(invalid(table, "table name is empty"));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::MemoryBackend;
  use crate::store::SqliteStore;
  use serde_json::json;
  use std::sync::atomic::AtomicUsize;

  struct Fixture {
    manager: SyncManager,
    store: Arc<SqliteStore>,
    remote: Arc<MemoryBackend>,
  }

  /// Offline by default so queue_* calls do not start background passes.
  fn fixture() -> Fixture {
    fixture_with(SyncSettings::default())
  }

  fn fixture_with(settings: SyncSettings) -> Fixture {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let remote = Arc::new(MemoryBackend::new());
    let manager = SyncManager::new(
      store.clone(),
      remote.clone(),
      Connectivity::new(false),
      settings,
    );
    Fixture {
      manager,
      store,
      remote,
    }
  }

  fn record_events(manager: &SyncManager) -> (Arc<Mutex<Vec<SyncEvent>>>, Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let subscription = manager.on(move |event| sink.lock().unwrap().push(event.clone()));
    (events, subscription)
  }

  fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
      SyncOutcome::Completed(report) => report,
      other => panic!("expected a completed pass, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_dispatches_in_fifo_order() {
    let f = fixture();
    for name in ["first", "second", "third", "fourth"] {
      f.manager
        .queue_insert("clients", json!({ "name": name }))
        .unwrap();
    }

    let report = completed(f.manager.sync().await.unwrap());
    assert_eq!(report.synced, 4);

    let names: Vec<Value> = f
      .remote
      .calls()
      .into_iter()
      .map(|call| call.payload.unwrap()["name"].clone())
      .collect();
    assert_eq!(names, vec![json!("first"), json!("second"), json!("third"), json!("fourth")]);
    assert_eq!(f.manager.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_sync_runs_one_pass() {
    let f = fixture();
    f.manager.queue_insert("leads", json!({"name": "a"})).unwrap();
    f.manager.queue_insert("leads", json!({"name": "b"})).unwrap();
    f.remote.set_delay(Duration::from_millis(50));

    let (first, second) = tokio::join!(f.manager.sync(), f.manager.sync());
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(
      outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Skipped))
        .count(),
      1
    );
    assert_eq!(f.remote.attempts(), 2);
    assert_eq!(f.remote.max_concurrent_calls(), 1);
    assert!(!f.manager.is_syncing());
  }

  fn shared_manager(path: &std::path::Path, remote: Arc<MemoryBackend>) -> SyncManager {
    SyncManager::new(
      Arc::new(SqliteStore::open(path).unwrap()),
      remote,
      Connectivity::new(false),
      SyncSettings::default(),
    )
  }

  #[tokio::test]
  async fn test_managers_sharing_a_database_never_drain_together() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let remote = Arc::new(MemoryBackend::new());
    let dashboard = shared_manager(&path, remote.clone());
    let cli = shared_manager(&path, remote.clone());

    dashboard
      .queue_insert("leads", json!({"name": "Test Lead"}))
      .unwrap();
    remote.set_delay(Duration::from_millis(100));

    let (first, second) = tokio::join!(dashboard.sync(), cli.sync());
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(
      outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Skipped))
        .count(),
      1
    );
    assert_eq!(remote.calls().len(), 1);
    assert_eq!(remote.max_concurrent_calls(), 1);

    // The lease is released after the pass
    cli.queue_insert("leads", json!({"name": "Second"})).unwrap();
    let report = completed(cli.sync().await.unwrap());
    assert_eq!(report.synced, 1);
    assert_eq!(remote.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_offline_manager_does_not_spend_retries() {
    let f = fixture();
    f.manager.queue_insert("leads", json!({})).unwrap();
    let (events, _subscription) = record_events(&f.manager);

    assert_eq!(f.manager.sync_if_online().await.unwrap(), SyncOutcome::Offline);
    assert_eq!(f.remote.attempts(), 0);
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(f.store.list_pending().unwrap()[0].retry_count, 0);

    f.manager.connectivity().set_online(true);
    let report = completed(f.manager.sync_if_online().await.unwrap());
    assert_eq!(report.synced, 1);
  }

  #[tokio::test]
  async fn test_one_failure_does_not_block_the_rest() {
    let f = fixture();
    f.manager.queue_insert("clients", json!({"n": 1})).unwrap();
    let failing = f.manager.queue_insert("clients", json!({"n": 2})).unwrap();
    f.manager.queue_insert("projects", json!({"n": 3})).unwrap();
    f.manager.queue_insert("leads", json!({"n": 4})).unwrap();

    // Let the first one through, reject the second
    let store = f.store.clone();
    let remote = f.remote.clone();
    let _arm = f.manager.on(move |event| {
      if let SyncEvent::Progress { progress: 2, .. } = event {
        remote.reject_next(1);
      }
    });

    let report = completed(f.manager.sync().await.unwrap());
    assert_eq!(report.synced, 3);
    assert_eq!(report.failed, 1);

    let remaining = store.list_pending().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, failing);
    assert_eq!(remaining[0].retry_count, 1);
    assert!(remaining[0].error.is_some());
    assert_eq!(f.remote.calls().len(), 3);
  }

  #[tokio::test]
  async fn test_exhausted_retries_land_in_failed_set() {
    let f = fixture();
    let id = f
      .manager
      .queue_insert("leads", json!({"name": "Test Lead"}))
      .unwrap();
    f.remote.reject_all(Some("database offline"));

    for _ in 0..3 {
      f.manager.sync().await.unwrap();
    }

    assert_eq!(f.manager.pending_count().unwrap(), 0);
    let failed = f.manager.get_failed_operations().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert!(failed[0].retry_count >= 3);
    assert!(failed[0].error.as_deref().unwrap().contains("database offline"));

    // Failed operations are not drained any more
    f.manager.sync().await.unwrap();
    assert_eq!(f.remote.attempts(), 3);
  }

  #[tokio::test]
  async fn test_retry_then_success_removes_operation_for_good() {
    let f = fixture();
    let store = f.store.clone();
    let id = f.manager.queue_insert("leads", json!({"name": "x"})).unwrap();
    f.remote.reject_all(Some("nope"));
    for _ in 0..3 {
      f.manager.sync().await.unwrap();
    }
    assert_eq!(f.manager.failed_count().unwrap(), 1);

    f.remote.reject_all(None);
    f.manager.retry_failed_operation(&id).unwrap();
    let report = completed(f.manager.sync().await.unwrap());
    assert_eq!(report.synced, 1);

    f.manager.sync().await.unwrap();
    f.manager.sync().await.unwrap();
    assert_eq!(f.manager.failed_count().unwrap(), 0);
    assert_eq!(f.manager.pending_count().unwrap(), 0);
    assert!(store.get(&id).unwrap().is_none());
    assert_eq!(f.remote.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_later_writes_to_a_failed_record_wait() {
    let f = fixture();
    let insert = f
      .manager
      .queue_insert("clients", json!({"id": "c1", "name": "Ada"}))
      .unwrap();
    let update = f
      .manager
      .queue_update("clients", json!({"id": "c1", "name": "Ada L."}))
      .unwrap();
    f.manager
      .queue_insert("clients", json!({"id": "c2", "name": "Bo"}))
      .unwrap();

    f.remote.reject_next(1);
    let report = completed(f.manager.sync().await.unwrap());
    assert_eq!(report.failed, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.synced, 1);

    // The update was never attempted and kept a clean record
    let waiting = f.store.get(&update).unwrap().unwrap();
    assert_eq!(waiting.retry_count, 0);

    let report = completed(f.manager.sync().await.unwrap());
    assert_eq!(report.synced, 2);
    let calls = f.remote.calls();
    assert_eq!(calls[1].operation, OperationKind::Insert);
    assert_eq!(calls[1].payload.as_ref().unwrap()["id"], json!("c1"));
    assert_eq!(calls[2].operation, OperationKind::Update);
    assert!(f.store.get(&insert).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_timeout_counts_as_failure() {
    let f = fixture_with(SyncSettings {
      request_timeout: Duration::from_millis(20),
    });
    let id = f.manager.queue_insert("leads", json!({})).unwrap();
    f.remote.set_delay(Duration::from_millis(200));

    let report = completed(f.manager.sync().await.unwrap());
    assert_eq!(report.failed, 1);
    let op = f.store.get(&id).unwrap().unwrap();
    assert!(op.error.unwrap().contains("timed out"));
  }

  #[tokio::test]
  async fn test_events_for_a_pass() {
    let f = fixture();
    f.manager.queue_insert("leads", json!({})).unwrap();
    f.manager.queue_delete("projects", "p1").unwrap();
    let (events, _subscription) = record_events(&f.manager);

    f.manager.sync().await.unwrap();

    let events = events.lock().unwrap();
    let kinds: Vec<&str> = events.iter().map(SyncEvent::kind).collect();
    assert_eq!(
      kinds,
      vec!["sync-start", "sync-progress", "sync-progress", "sync-complete"]
    );
    assert_eq!(
      events[2],
      SyncEvent::Progress {
        message: "Syncing Delete project (2/2)".to_string(),
        progress: 2,
        total: 2,
      }
    );
    assert_eq!(events[3].message(), "Synced 2 of 2 operations");
    assert!(f.manager.get_last_sync_time().is_some());
  }

  #[tokio::test]
  async fn test_empty_queue_completes_immediately() {
    let f = fixture();
    let (events, _subscription) = record_events(&f.manager);

    let report = completed(f.manager.sync().await.unwrap());
    assert_eq!(report, SyncReport::default());

    let kinds: Vec<&str> = events.lock().unwrap().iter().map(SyncEvent::kind).collect();
    assert_eq!(kinds, vec!["sync-start", "sync-complete"]);
    assert!(f.store.last_sync().unwrap().is_some());
    assert!(f.manager.get_last_sync_time().is_some());
  }

  #[tokio::test]
  async fn test_queue_validation() {
    let f = fixture();
    assert!(matches!(
      f.manager.queue_update("clients", json!({"name": "no id"})),
      Err(Error::InvalidPayload { .. })
    ));
    assert!(matches!(
      f.manager.queue_insert("clients", json!("not an object")),
      Err(Error::InvalidPayload { .. })
    ));
    assert!(matches!(
      f.manager.queue_delete("clients", " "),
      Err(Error::InvalidPayload { .. })
    ));
    assert!(matches!(
      f.manager.queue_insert("", json!({})),
      Err(Error::InvalidPayload { .. })
    ));
    assert_eq!(f.manager.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_queue_while_online_syncs_in_background() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let remote = Arc::new(MemoryBackend::new());
    let manager = SyncManager::new(
      store,
      remote.clone(),
      Connectivity::new(true),
      SyncSettings::default(),
    );

    manager
      .queue_insert("leads", json!({"name": "walk-in"}))
      .unwrap();

    for _ in 0..50 {
      if manager.pending_count().unwrap() == 0 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.pending_count().unwrap(), 0);
    assert_eq!(remote.calls().len(), 1);
  }

  #[test]
  fn test_queue_without_runtime_still_persists() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let manager = SyncManager::new(
      store,
      Arc::new(MemoryBackend::new()),
      Connectivity::new(true),
      SyncSettings::default(),
    );

    manager.queue_insert("leads", json!({})).unwrap();
    assert_eq!(manager.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_typed_cache_helpers() {
    #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
    struct Summary {
      open_leads: u32,
    }

    let f = fixture();
    f.manager
      .cache_data("dashboard", &Summary { open_leads: 7 }, 5)
      .unwrap();
    let cached: Option<Summary> = f.manager.get_cached_data("dashboard").unwrap();
    assert_eq!(cached, Some(Summary { open_leads: 7 }));
    let missing: Option<Summary> = f.manager.get_cached_data("other").unwrap();
    assert_eq!(missing, None);

    assert!(f.manager.invalidate_cache("dashboard").unwrap());
    let gone: Option<Summary> = f.manager.get_cached_data("dashboard").unwrap();
    assert_eq!(gone, None);
    assert_eq!(f.manager.purge_expired_cache().unwrap(), 0);
  }

  /// Store whose queue reads always fail.
  struct BrokenStore {
    reads: AtomicUsize,
  }

  impl OperationStore for BrokenStore {
    fn enqueue(&self, _: &str, _: OperationKind, _: Value) -> Result<String> {
      Err(Error::LockPoisoned)
    }
    fn list_pending(&self) -> Result<Vec<PendingOperation>> {
      self.reads.fetch_add(1, Ordering::SeqCst);
      Err(Error::LockPoisoned)
    }
    fn pending_count(&self) -> Result<usize> {
      Err(Error::LockPoisoned)
    }
    fn get(&self, _: &str) -> Result<Option<PendingOperation>> {
      Ok(None)
    }
    fn get_failed_operations(&self) -> Result<Vec<PendingOperation>> {
      Ok(Vec::new())
    }
    fn failed_count(&self) -> Result<usize> {
      Ok(0)
    }
    fn remove(&self, _: &str) -> Result<bool> {
      Ok(false)
    }
    fn mark_failed(&self, id: &str, _: &str) -> Result<OperationStatus> {
      Err(Error::NotFound(id.to_string()))
    }
    fn retry_failed_operation(&self, id: &str) -> Result<()> {
      Err(Error::NotFound(id.to_string()))
    }
    fn clear_failed_operations(&self) -> Result<usize> {
      Ok(0)
    }
    fn cache_data(&self, _: &str, _: &Value, _: u32) -> Result<()> {
      Ok(())
    }
    fn get_cached_data(&self, _: &str) -> Result<Option<Value>> {
      Ok(None)
    }
    fn invalidate_cache(&self, _: &str) -> Result<bool> {
      Ok(false)
    }
    fn purge_expired_cache(&self) -> Result<usize> {
      Ok(0)
    }
    fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
      Ok(None)
    }
    fn set_last_sync(&self, _: DateTime<Utc>) -> Result<()> {
      Ok(())
    }
    fn acquire_sync_lease(&self, _: &str, _: Duration) -> Result<bool> {
      Ok(true)
    }
    fn release_sync_lease(&self, _: &str) -> Result<()> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_storage_failures_propagate() {
    let store = Arc::new(BrokenStore {
      reads: AtomicUsize::new(0),
    });
    let manager = SyncManager::new(
      store.clone(),
      Arc::new(MemoryBackend::new()),
      Connectivity::new(false),
      SyncSettings::default(),
    );
    let (events, _subscription) = record_events(&manager);

    assert!(manager.queue_insert("leads", json!({})).is_err());

    assert!(manager.sync().await.is_err());
    assert!(!manager.is_syncing());
    assert_eq!(
      events.lock().unwrap().last().map(SyncEvent::kind),
      Some("sync-error")
    );

    // The guard was released, so the next trigger runs again
    assert!(manager.sync().await.is_err());
    assert_eq!(store.reads.load(Ordering::SeqCst), 2);
  }
}
