//! Offline-first write queue with background sync.
//!
//! Writes are recorded in a durable local queue first and replayed against a
//! remote backend whenever the network allows. Operations that keep failing are
//! parked in a failed set where a user can inspect, retry or discard them.
//!
//! - [`store`]: durable queue, failed set and TTL cache (SQLite)
//! - [`remote`]: the backend that queued writes are applied to
//! - [`sync`]: the sync manager and its event stream
//! - [`connectivity`]: online/offline state
//! - [`observer`]: status snapshot for user interfaces
//! - [`recovery`]: actions on failed operations

pub mod connectivity;
pub mod error;
pub mod observer;
pub mod recovery;
pub mod remote;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
