//! In-process backend that records every write.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{RemoteBackend, RemoteError};
use crate::store::OperationKind;

/// A write the backend accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
  pub table: String,
  pub operation: OperationKind,
  pub record_id: Option<String>,
  /// Record body; `None` for deletes
  pub payload: Option<Value>,
}

#[derive(Debug)]
struct MemoryState {
  calls: Vec<RemoteCall>,
  attempts: usize,
  reject_next: u32,
  reject_all: Option<String>,
  reachable: bool,
  delay: Duration,
  in_flight: usize,
  max_in_flight: usize,
}

/// Backend that keeps accepted writes in memory.
///
/// It can be told to reject calls, slow them down or look unreachable, which
/// makes it the stand-in for the real backend in tests.
#[derive(Debug)]
pub struct MemoryBackend {
  state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(MemoryState {
        calls: Vec::new(),
        attempts: 0,
        reject_next: 0,
        reject_all: None,
        reachable: true,
        delay: Duration::ZERO,
        in_flight: 0,
        max_in_flight: 0,
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, MemoryState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Reject the next `count` write attempts.
  pub fn reject_next(&self, count: u32) {
    self.state().reject_next = count;
  }

  /// Reject every write with `message` until called again with `None`.
  pub fn reject_all(&self, message: Option<&str>) {
    self.state().reject_all = message.map(String::from);
  }

  /// Hold every write for `delay` before answering.
  pub fn set_delay(&self, delay: Duration) {
    self.state().delay = delay;
  }

  /// While unreachable, `ping` and every write fail with a network error.
  pub fn set_reachable(&self, reachable: bool) {
    self.state().reachable = reachable;
  }

  /// Writes accepted so far, in the order they arrived.
  pub fn calls(&self) -> Vec<RemoteCall> {
    self.state().calls.clone()
  }

  /// Every write attempt, accepted or rejected.
  pub fn attempts(&self) -> usize {
    self.state().attempts
  }

  /// Highest number of writes that were in flight at the same time.
  pub fn max_concurrent_calls(&self) -> usize {
    self.state().max_in_flight
  }

  async fn apply(&self, call: RemoteCall) -> Result<(), RemoteError> {
    let delay = {
      let mut state = self.state();
      state.attempts += 1;
      state.in_flight += 1;
      state.max_in_flight = state.max_in_flight.max(state.in_flight);
      state.delay
    };

    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    let mut state = self.state();
    state.in_flight -= 1;

    if !state.reachable {
      return Err(RemoteError::Network("backend unreachable".to_string()));
    }
    if state.reject_next > 0 {
      state.reject_next -= 1;
      return Err(RemoteError::Rejected {
        status: 503,
        message: "service unavailable".to_string(),
      });
    }
    if let Some(message) = &state.reject_all {
      return Err(RemoteError::Rejected {
        status: 500,
        message: message.clone(),
      });
    }

    state.calls.push(call);
    Ok(())
  }
}

impl RemoteBackend for MemoryBackend {
  fn insert<'a>(
    &'a self,
    table: &'a str,
    record: &'a Value,
  ) -> BoxFuture<'a, Result<(), RemoteError>> {
    let call = RemoteCall {
      table: table.to_string(),
      operation: OperationKind::Insert,
      record_id: None,
      payload: Some(record.clone()),
    };
    self.apply(call).boxed()
  }

  fn update<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
    record: &'a Value,
  ) -> BoxFuture<'a, Result<(), RemoteError>> {
    let call = RemoteCall {
      table: table.to_string(),
      operation: OperationKind::Update,
      record_id: Some(id.to_string()),
      payload: Some(record.clone()),
    };
    self.apply(call).boxed()
  }

  fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), RemoteError>> {
    let call = RemoteCall {
      table: table.to_string(),
      operation: OperationKind::Delete,
      record_id: Some(id.to_string()),
      payload: None,
    };
    self.apply(call).boxed()
  }

  fn ping(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
    let reachable = self.state().reachable;
    async move {
      if reachable {
        Ok(())
      } else {
        Err(RemoteError::Network("backend unreachable".to_string()))
      }
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_unreachable_backend_rejects_writes() {
    let backend = MemoryBackend::new();
    backend.set_reachable(false);

    let result = backend.insert("leads", &json!({"name": "Bo"})).await;
    assert!(matches!(result, Err(RemoteError::Network(_))));
    assert!(backend.ping().await.is_err());
    assert_eq!(backend.attempts(), 1);
    assert!(backend.calls().is_empty());

    backend.set_reachable(true);
    backend.delete("leads", "l1").await.unwrap();
    assert_eq!(backend.calls()[0].record_id.as_deref(), Some("l1"));
  }
}
