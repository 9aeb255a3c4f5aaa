//! Inspect, retry and discard operations that ran out of retries.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::store::{OperationKind, PendingOperation};
use crate::sync::{SyncManager, SyncOutcome};

/// A failed operation as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperationRow {
  pub id: String,
  /// e.g. "Create lead"
  pub label: String,
  pub table: String,
  pub operation: OperationKind,
  pub timestamp: DateTime<Utc>,
  pub error: String,
  pub retry_count: u32,
}

impl From<&PendingOperation> for FailedOperationRow {
  fn from(op: &PendingOperation) -> Self {
    Self {
      id: op.id.clone(),
      label: op.label(),
      table: op.table.clone(),
      operation: op.operation,
      timestamp: op.timestamp,
      error: op
        .error
        .clone()
        .unwrap_or_else(|| "Unknown error".to_string()),
      retry_count: op.retry_count,
    }
  }
}

/// Outcome of a retry action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
  /// Operations moved back into the queue
  pub retried: usize,
  pub sync: SyncOutcome,
  /// Failed operations left after the pass
  pub remaining: Vec<FailedOperationRow>,
}

impl RecoveryReport {
  /// One-line result for the user.
  pub fn summary(&self) -> String {
    let noun = if self.retried == 1 { "operation" } else { "operations" };
    match (&self.sync, self.remaining.len()) {
      (SyncOutcome::Skipped, _) => format!(
        "Requeued {} {}; a sync is already running and will pick them up",
        self.retried, noun
      ),
      (SyncOutcome::Offline, _) => format!(
        "Requeued {} {}; they will sync when the connection is back",
        self.retried, noun
      ),
      (SyncOutcome::Completed(_), 0) => format!("Retried {} {}, all synced", self.retried, noun),
      (SyncOutcome::Completed(_), remaining) => format!(
        "Retried {} {}, {} still failing",
        self.retried, noun, remaining
      ),
    }
  }
}

/// Actions behind the failed-operations screen.
#[derive(Clone)]
pub struct RecoveryController {
  manager: SyncManager,
}

impl RecoveryController {
  pub fn new(manager: SyncManager) -> Self {
    Self { manager }
  }

  /// Failed operations, oldest first.
  pub fn load(&self) -> Result<Vec<FailedOperationRow>> {
    Ok(
      self
        .manager
        .get_failed_operations()?
        .iter()
        .map(FailedOperationRow::from)
        .collect(),
    )
  }

  /// Requeue one operation, run a pass if online and reload.
  pub async fn retry_one(&self, id: &str) -> Result<RecoveryReport> {
    self.manager.retry_failed_operation(id)?;
    info!(%id, "Retrying failed operation");
    self.sync_and_reload(1).await
  }

  /// Requeue every failed operation in order, then run a single pass if online.
  pub async fn retry_all(&self) -> Result<RecoveryReport> {
    let failed = self.manager.get_failed_operations()?;
    for op in &failed {
      self.manager.retry_failed_operation(&op.id)?;
    }
    info!(count = failed.len(), "Retrying all failed operations");
    self.sync_and_reload(failed.len()).await
  }

  /// Permanently drop every failed operation. Callers confirm with the user first.
  pub fn clear_all(&self) -> Result<usize> {
    let removed = self.manager.clear_failed_operations()?;
    warn!(removed, "Discarded failed operations");
    Ok(removed)
  }

  async fn sync_and_reload(&self, retried: usize) -> Result<RecoveryReport> {
    // Offline, the requeued operations wait for the reconnect pass
    let sync = self.manager.sync_if_online().await?;
    Ok(RecoveryReport {
      retried,
      sync,
      remaining: self.load()?,
    })
  }
}
