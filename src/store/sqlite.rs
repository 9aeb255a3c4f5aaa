//! SQLite implementation of the operation store.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::{Clock, OperationStore, SystemClock};
use super::types::{CacheEntry, OperationKind, OperationStatus, PendingOperation};
use crate::error::{Error, Result};

/// Failed attempts after which an operation leaves the pending queue.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const LAST_SYNC_KEY: &str = "last_sync";

/// SQLite-backed operation store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  clock: Arc<dyn Clock>,
  max_retries: u32,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path)?;
    // Another process (e.g. `offsync queue`) may hold the write lock briefly
    conn.busy_timeout(Duration::from_secs(5))?;

    info!(path = %path.display(), "Opened offline store");
    Self::from_connection(conn)
  }

  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Non-durable store, for tests and throwaway sessions.
  pub fn in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Default database path: `<data_dir>/offsync/offline.db`.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        Error::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("offsync").join("offline.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
      clock: Arc::new(SystemClock),
      max_retries: DEFAULT_MAX_RETRIES,
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Set how many failed attempts move an operation into the failed set.
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries.max(1);
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn max_retries(&self) -> u32 {
    self.max_retries
  }

  fn run_migrations(&self) -> Result<()> {
    self.conn()?.execute_batch(SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| Error::LockPoisoned)
  }

  fn list_by_status(&self, status: OperationStatus) -> Result<Vec<PendingOperation>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT seq, id, table_name, operation, payload, enqueued_at, retry_count, last_error, status
       FROM pending_operations
       WHERE status = ?1
       ORDER BY seq",
    )?;

    let rows = stmt
      .query_map(params![status.as_str()], OperationRow::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(OperationRow::into_operation).collect()
  }

  fn count_by_status(&self, status: OperationStatus) -> Result<usize> {
    let count: i64 = self.conn()?.query_row(
      "SELECT COUNT(*) FROM pending_operations WHERE status = ?1",
      params![status.as_str()],
      |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or_default())
  }
}

/// Schema for the queue, cache and metadata tables.
const SCHEMA: &str = r#"
-- Queued writes; seq fixes FIFO order
CREATE TABLE IF NOT EXISTS pending_operations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    table_name TEXT NOT NULL,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_pending_operations_status
    ON pending_operations(status, seq);

-- Generic TTL cache (serialized JSON)
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    ttl_minutes INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- At most one row: whoever is draining the queue right now
CREATE TABLE IF NOT EXISTS sync_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    owner TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;

/// Raw column values of a `pending_operations` row.
struct OperationRow {
  seq: i64,
  id: String,
  table_name: String,
  operation: String,
  payload: String,
  enqueued_at: String,
  retry_count: i64,
  last_error: Option<String>,
  status: String,
}

impl OperationRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq: row.get(0)?,
      id: row.get(1)?,
      table_name: row.get(2)?,
      operation: row.get(3)?,
      payload: row.get(4)?,
      enqueued_at: row.get(5)?,
      retry_count: row.get(6)?,
      last_error: row.get(7)?,
      status: row.get(8)?,
    })
  }

  fn into_operation(self) -> Result<PendingOperation> {
    let corrupt = |reason: String| Error::Corrupt {
      id: self.id.clone(),
      reason,
    };

    let operation: OperationKind = self
      .operation
      .parse()
      .map_err(|_| corrupt(format!("unknown operation '{}'", self.operation)))?;
    let status = OperationStatus::parse(&self.status)
      .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
    let payload: Value =
      serde_json::from_str(&self.payload).map_err(|e| corrupt(format!("bad payload: {}", e)))?;
    let timestamp = parse_timestamp(&self.enqueued_at).map_err(corrupt)?;

    Ok(PendingOperation {
      id: self.id,
      sequence: u64::try_from(self.seq).unwrap_or_default(),
      table: self.table_name,
      operation,
      payload,
      timestamp,
      retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
      error: self.last_error,
      status,
    })
  }
}

impl OperationStore for SqliteStore {
  fn enqueue(&self, table: &str, operation: OperationKind, payload: Value) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let data = serde_json::to_string(&payload)?;
    let enqueued_at = format_timestamp(self.clock.now());

    self.conn()?.execute(
      "INSERT INTO pending_operations (id, table_name, operation, payload, enqueued_at)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      params![id, table, operation.as_str(), data, enqueued_at],
    )?;

    debug!(%id, table, %operation, "Queued operation");
    Ok(id)
  }

  fn list_pending(&self) -> Result<Vec<PendingOperation>> {
    self.list_by_status(OperationStatus::Pending)
  }

  fn pending_count(&self) -> Result<usize> {
    self.count_by_status(OperationStatus::Pending)
  }

  fn get(&self, id: &str) -> Result<Option<PendingOperation>> {
    let row = self
      .conn()?
      .query_row(
        "SELECT seq, id, table_name, operation, payload, enqueued_at, retry_count, last_error, status
         FROM pending_operations WHERE id = ?1",
        params![id],
        OperationRow::from_row,
      )
      .optional()?;

    row.map(OperationRow::into_operation).transpose()
  }

  fn get_failed_operations(&self) -> Result<Vec<PendingOperation>> {
    self.list_by_status(OperationStatus::Failed)
  }

  fn failed_count(&self) -> Result<usize> {
    self.count_by_status(OperationStatus::Failed)
  }

  fn remove(&self, id: &str) -> Result<bool> {
    let removed = self
      .conn()?
      .execute("DELETE FROM pending_operations WHERE id = ?1", params![id])?;
    Ok(removed > 0)
  }

  fn mark_failed(&self, id: &str, error: &str) -> Result<OperationStatus> {
    let message = if error.trim().is_empty() {
      "Unknown error"
    } else {
      error
    };

    let conn = self.conn()?;
    // SET expressions read the pre-update row, hence `retry_count + 1` in the CASE
    let changed = conn.execute(
      "UPDATE pending_operations
       SET retry_count = retry_count + 1,
           last_error = ?2,
           status = CASE WHEN retry_count + 1 >= ?3 THEN 'failed' ELSE status END
       WHERE id = ?1",
      params![id, message, self.max_retries],
    )?;
    if changed == 0 {
      return Err(Error::NotFound(id.to_string()));
    }

    let status: String = conn.query_row(
      "SELECT status FROM pending_operations WHERE id = ?1",
      params![id],
      |row| row.get(0),
    )?;

    OperationStatus::parse(&status).ok_or_else(|| Error::Corrupt {
      id: id.to_string(),
      reason: format!("unknown status '{}'", status),
    })
  }

  fn retry_failed_operation(&self, id: &str) -> Result<()> {
    let changed = self.conn()?.execute(
      "UPDATE pending_operations SET status = 'pending' WHERE id = ?1 AND status = 'failed'",
      params![id],
    )?;
    if changed == 0 {
      return Err(Error::NotFound(id.to_string()));
    }

    info!(%id, "Failed operation returned to the queue");
    Ok(())
  }

  fn clear_failed_operations(&self) -> Result<usize> {
    let removed = self.conn()?.execute(
      "DELETE FROM pending_operations WHERE status = 'failed'",
      [],
    )?;

    info!(removed, "Purged failed operations");
    Ok(removed)
  }

  fn cache_data(&self, key: &str, data: &Value, ttl_minutes: u32) -> Result<()> {
    let data = serde_json::to_string(data)?;
    let cached_at = format_timestamp(self.clock.now());

    self.conn()?.execute(
      "INSERT OR REPLACE INTO cache_entries (key, data, cached_at, ttl_minutes)
       VALUES (?1, ?2, ?3, ?4)",
      params![key, data, cached_at, ttl_minutes],
    )?;
    Ok(())
  }

  fn get_cached_data(&self, key: &str) -> Result<Option<Value>> {
    let conn = self.conn()?;
    let row: Option<(String, String, u32)> = conn
      .query_row(
        "SELECT data, cached_at, ttl_minutes FROM cache_entries WHERE key = ?1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    let Some((data, cached_at, ttl_minutes)) = row else {
      return Ok(None);
    };

    let entry = CacheEntry {
      key: key.to_string(),
      data: serde_json::from_str(&data)?,
      timestamp: parse_timestamp(&cached_at).map_err(|reason| Error::Corrupt {
        id: key.to_string(),
        reason,
      })?,
      ttl_minutes,
    };

    if entry.is_expired(self.clock.now()) {
      conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
      debug!(key, "Evicted expired cache entry");
      return Ok(None);
    }

    Ok(Some(entry.data))
  }

  fn invalidate_cache(&self, key: &str) -> Result<bool> {
    let removed = self
      .conn()?
      .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
    Ok(removed > 0)
  }

  fn purge_expired_cache(&self) -> Result<usize> {
    let conn = self.conn()?;
    let now = self.clock.now();

    let entries: Vec<(String, String, u32)> = {
      let mut stmt = conn.prepare("SELECT key, cached_at, ttl_minutes FROM cache_entries")?;
      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      rows
    };

    let mut removed = 0;
    for (key, cached_at, ttl_minutes) in entries {
      // Unparseable timestamps are treated as expired
      let expired = parse_timestamp(&cached_at)
        .map(|timestamp| now >= timestamp + chrono::Duration::minutes(i64::from(ttl_minutes)))
        .unwrap_or(true);
      if expired {
        removed += conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
      }
    }

    Ok(removed)
  }

  fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = self
      .conn()?
      .query_row(
        "SELECT value FROM sync_meta WHERE key = ?1",
        params![LAST_SYNC_KEY],
        |row| row.get(0),
      )
      .optional()?;

    value
      .map(|v| {
        parse_timestamp(&v).map_err(|reason| Error::Corrupt {
          id: LAST_SYNC_KEY.to_string(),
          reason,
        })
      })
      .transpose()
  }

  fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
    self.conn()?.execute(
      "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
      params![LAST_SYNC_KEY, format_timestamp(at)],
    )?;
    Ok(())
  }

  fn acquire_sync_lease(&self, owner: &str, ttl: Duration) -> Result<bool> {
    let now = self.clock.now();
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));

    let mut conn = self.conn()?;
    // IMMEDIATE takes the write lock up front so two processes cannot both see a free lease
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let held: Option<(String, String)> = tx
      .query_row(
        "SELECT owner, expires_at FROM sync_lease WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    if let Some((holder, expires_at)) = held {
      // Unparseable expiry counts as expired
      let live = parse_timestamp(&expires_at).is_ok_and(|at| at > now);
      if live && holder != owner {
        debug!(%holder, "Sync lease held by another owner");
        return Ok(false);
      }
    }

    tx.execute(
      "INSERT OR REPLACE INTO sync_lease (id, owner, expires_at) VALUES (1, ?1, ?2)",
      params![owner, format_timestamp(now + ttl)],
    )?;
    tx.commit()?;
    Ok(true)
  }

  fn release_sync_lease(&self, owner: &str) -> Result<()> {
    self.conn()?.execute(
      "DELETE FROM sync_lease WHERE id = 1 AND owner = ?1",
      params![owner],
    )?;
    Ok(())
  }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("bad timestamp '{}': {}", s, e))
}
