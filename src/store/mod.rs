//! Durable store for queued writes.
//!
//! Holds three things that must survive a restart:
//! - the FIFO queue of writes that still need to reach the backend
//! - the set of writes whose retries ran out (kept until retried or purged)
//! - a small key/value cache with per-entry TTL

mod sqlite;
mod traits;
mod types;

pub use sqlite::{SqliteStore, DEFAULT_MAX_RETRIES};
pub use traits::{Clock, OperationStore, SystemClock};
pub use types::{CacheEntry, OperationKind, OperationStatus, PendingOperation};
