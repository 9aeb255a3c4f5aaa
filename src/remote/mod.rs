//! Remote data backend that queued writes are replayed against.

mod memory;
mod rest;

use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::store::{OperationKind, PendingOperation};

pub use memory::{MemoryBackend, RemoteCall};
pub use rest::RestBackend;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
  #[error("network error: {0}")]
  Network(String),

  #[error("backend rejected the request ({status}): {message}")]
  Rejected { status: u16, message: String },

  #[error("request timed out after {}ms", .0.as_millis())]
  Timeout(Duration),

  #[error("invalid payload: {0}")]
  InvalidPayload(String),
}

/// Create/update/delete access to the backend's tables.
///
/// Methods return boxed futures so the trait stays object safe and can be
/// shared as `Arc<dyn RemoteBackend>`.
pub trait RemoteBackend: Send + Sync {
  fn insert<'a>(&'a self, table: &'a str, record: &'a Value)
    -> BoxFuture<'a, Result<(), RemoteError>>;

  fn update<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
    record: &'a Value,
  ) -> BoxFuture<'a, Result<(), RemoteError>>;

  fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), RemoteError>>;

  /// Cheap reachability check used by the connectivity probe.
  fn ping(&self) -> BoxFuture<'_, Result<(), RemoteError>>;
}

/// Apply a queued operation to the backend.
pub async fn dispatch(backend: &dyn RemoteBackend, op: &PendingOperation) -> Result<(), RemoteError> {
  match op.operation {
    OperationKind::Insert => backend.insert(&op.table, &op.payload).await,
    OperationKind::Update => {
      let id = op
        .record_id()
        .ok_or_else(|| RemoteError::InvalidPayload("update payload has no id".to_string()))?;
      backend.update(&op.table, &id, &op.payload).await
    }
    OperationKind::Delete => {
      let id = op
        .record_id()
        .ok_or_else(|| RemoteError::InvalidPayload("delete payload has no id".to_string()))?;
      backend.delete(&op.table, &id).await
    }
  }
}
