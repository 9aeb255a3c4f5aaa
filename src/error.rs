//! Error types for the offline queue.

use thiserror::Error;

/// Errors surfaced by the store and the sync manager.
///
/// Remote failures never reach callers through this type. They are recorded on
/// the operation that failed (see [`crate::remote::RemoteError`]).
#[derive(Debug, Error)]
pub enum Error {
  #[error("storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("storage lock poisoned")]
  LockPoisoned,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid payload for {table}: {reason}")]
  InvalidPayload { table: String, reason: String },

  #[error("operation {0} not found")]
  NotFound(String),

  #[error("corrupt record {id}: {reason}")]
  Corrupt { id: String, reason: String },

  #[error("configuration error: {0}")]
  Config(String),

  #[error("unknown operation type '{0}'")]
  UnknownOperation(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
