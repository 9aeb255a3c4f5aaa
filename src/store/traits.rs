//! Storage trait for the operation queue and value cache.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::types::{OperationKind, OperationStatus, PendingOperation};
use crate::error::Result;

/// Source of "now" for timestamps and TTL checks.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Durable home of queued writes, failed writes and cached values.
///
/// Implementations never retry on their own and never swallow storage errors.
/// The queue and failed set must only be changed through these methods.
pub trait OperationStore: Send + Sync {
  /// Append a new operation to the queue and return its id.
  fn enqueue(&self, table: &str, operation: OperationKind, payload: Value) -> Result<String>;

  /// Operations not marked failed, oldest first.
  fn list_pending(&self) -> Result<Vec<PendingOperation>>;

  fn pending_count(&self) -> Result<usize>;

  /// Look up a single operation regardless of status.
  fn get(&self, id: &str) -> Result<Option<PendingOperation>>;

  /// Operations whose retries are exhausted, oldest first.
  fn get_failed_operations(&self) -> Result<Vec<PendingOperation>>;

  fn failed_count(&self) -> Result<usize>;

  /// Delete an operation after the backend confirmed it. Returns false if it was already gone.
  fn remove(&self, id: &str) -> Result<bool>;

  /// Record a failed attempt. Returns the status the operation ends up in.
  fn mark_failed(&self, id: &str, error: &str) -> Result<OperationStatus>;

  /// Put a failed operation back in the queue. The retry count is kept.
  /// Ids that are unknown or not in the failed set are `NotFound`.
  fn retry_failed_operation(&self, id: &str) -> Result<()>;

  /// Irreversibly delete every failed operation. Returns how many were removed.
  fn clear_failed_operations(&self) -> Result<usize>;

  fn cache_data(&self, key: &str, data: &Value, ttl_minutes: u32) -> Result<()>;

  /// Cached value for `key`, or `None` when missing or expired. Expired entries are evicted.
  fn get_cached_data(&self, key: &str) -> Result<Option<Value>>;

  /// Drop a cached value. Returns whether an entry existed.
  fn invalidate_cache(&self, key: &str) -> Result<bool>;

  /// Evict every expired cache entry. Returns how many were removed.
  fn purge_expired_cache(&self) -> Result<usize>;

  /// Time of the last completed sync pass.
  fn last_sync(&self) -> Result<Option<DateTime<Utc>>>;

  fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()>;

  /// Take or extend the right to drain the queue until `ttl` from now.
  ///
  /// Returns false while a different `owner` holds a lease that has not
  /// expired. Every process sharing the store goes through this before a pass.
  fn acquire_sync_lease(&self, owner: &str, ttl: Duration) -> Result<bool>;

  /// Give up the lease if `owner` still holds it.
  fn release_sync_lease(&self, owner: &str) -> Result<()>;
}
