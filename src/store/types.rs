//! Records kept by the durable store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Kind of write a queued operation performs against its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
  Insert,
  Update,
  Delete,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::Insert => "INSERT",
      OperationKind::Update => "UPDATE",
      OperationKind::Delete => "DELETE",
    }
  }

  /// Verb used in user-facing labels ("Create lead").
  pub fn verb(&self) -> &'static str {
    match self {
      OperationKind::Insert => "Create",
      OperationKind::Update => "Update",
      OperationKind::Delete => "Delete",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OperationKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "INSERT" | "CREATE" => Ok(OperationKind::Insert),
      "UPDATE" => Ok(OperationKind::Update),
      "DELETE" => Ok(OperationKind::Delete),
      other => Err(Error::UnknownOperation(other.to_string())),
    }
  }
}

/// Whether an operation is still drained by sync passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
  /// Waiting for the next sync pass
  Pending,
  /// Retries exhausted; only a manual retry puts it back in the queue
  Failed,
}

impl OperationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationStatus::Pending => "pending",
      OperationStatus::Failed => "failed",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(OperationStatus::Pending),
      "failed" => Some(OperationStatus::Failed),
      _ => None,
    }
  }
}

/// A write that has not reached the remote backend yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
  pub id: String,
  /// Store-assigned enqueue order
  pub sequence: u64,
  pub table: String,
  pub operation: OperationKind,
  /// Record data for INSERT/UPDATE, `{"id": ...}` for DELETE
  pub payload: Value,
  pub timestamp: DateTime<Utc>,
  pub retry_count: u32,
  pub error: Option<String>,
  pub status: OperationStatus,
}

impl PendingOperation {
  /// Identifier of the record this operation targets, if the payload carries one.
  pub fn record_id(&self) -> Option<String> {
    match &self.payload {
      Value::Object(map) => map.get("id").and_then(id_to_string),
      other if self.operation == OperationKind::Delete => id_to_string(other),
      _ => None,
    }
  }

  /// Human-readable label, e.g. "Create lead" or "Delete project".
  pub fn label(&self) -> String {
    format!("{} {}", self.operation.verb(), singular(&self.table))
  }

  pub fn is_failed(&self) -> bool {
    self.status == OperationStatus::Failed
  }
}

fn id_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Best-effort singular of a table name for labels.
fn singular(table: &str) -> String {
  let name = table.replace('_', " ");
  if let Some(stem) = name.strip_suffix("ies") {
    format!("{}y", stem)
  } else if name.ends_with("ss") {
    name
  } else if let Some(stem) = name.strip_suffix('s') {
    stem.to_string()
  } else {
    name
  }
}

/// A cached value with a time-to-live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub key: String,
  pub data: Value,
  pub timestamp: DateTime<Utc>,
  pub ttl_minutes: u32,
}

impl CacheEntry {
  pub fn expires_at(&self) -> DateTime<Utc> {
    self.timestamp + Duration::minutes(i64::from(self.ttl_minutes))
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at()
  }
}
