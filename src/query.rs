//! Background work for the dashboard.
//!
//! The UI loop is synchronous: it draws, handles a key, draws again. Anything
//! that touches the store or the network runs on a tokio task and reports back
//! through a channel that the UI polls on each tick.
//!
//! - [`Query<T>`] re-runs the same fetcher on demand and tracks staleness.
//! - [`Action<T>`] runs one future once, e.g. "retry all failed operations".
//!
//! ```ignore
//! let manager = manager.clone();
//! let mut pending = Query::new(move || {
//!   let manager = manager.clone();
//!   async move { manager.list_pending().map_err(|e| e.to_string()) }
//! });
//! pending.fetch();
//!
//! // on tick
//! if pending.poll() { /* redraw */ }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  Loading,
  Success(T),
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Repeatable fetch with loading/success/error state.
///
/// Unlike [`QueryState`], the last successful data is kept while a refetch is
/// in flight so lists do not flicker on every refresh.
pub struct Query<T> {
  state: QueryState<T>,
  last_data: Option<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Clone + Send + 'static> Query<T> {
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      last_data: None,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      fetched_at: None,
      stale_time: Duration::from_secs(5),
    }
  }

  /// After this long, [`Query::is_stale`] reports true.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Latest data, including the previous result while a refetch is running.
  pub fn data(&self) -> Option<&T> {
    self.state.data().or(self.last_data.as_ref())
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) | QueryState::Error(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start fetching unless a fetch is already running.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Start a new fetch, dropping any result still in flight.
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.start_fetch();
  }

  /// Returns `true` if the state changed. Call on every tick.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    let result = match receiver.try_recv() {
      Ok(result) => result,
      Err(mpsc::error::TryRecvError::Empty) => return false,
      Err(mpsc::error::TryRecvError::Disconnected) => Err("Query was cancelled".to_string()),
    };

    self.receiver = None;
    self.fetched_at = Some(Instant::now());
    self.state = match result {
      Ok(data) => {
        self.last_data = Some(data.clone());
        QueryState::Success(data)
      }
      Err(e) => QueryState::Error(e),
    };
    true
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    if let QueryState::Success(data) = std::mem::replace(&mut self.state, QueryState::Loading) {
      self.last_data = Some(data);
    }

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let _ = tx.send(future.await);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}

/// A single background job whose result the UI picks up later.
pub struct Action<T> {
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
}

impl<T: Send + 'static> Action<T> {
  /// Spawn `future` right away.
  pub fn spawn<Fut>(future: Fut) -> Self
  where
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
      let _ = tx.send(future.await);
    });
    Self { receiver: Some(rx) }
  }

  pub fn is_running(&self) -> bool {
    self.receiver.is_some()
  }

  /// The result, once. Returns `None` while running and after it was taken.
  pub fn poll(&mut self) -> Option<Result<T, String>> {
    let receiver = self.receiver.as_mut()?;
    let result = match receiver.try_recv() {
      Ok(result) => result,
      Err(mpsc::error::TryRecvError::Empty) => return None,
      Err(mpsc::error::TryRecvError::Disconnected) => Err("Action was cancelled".to_string()),
    };
    self.receiver = None;
    Some(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { Ok::<_, String>(vec![1, 2, 3]) });
    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> = Query::new(|| async { Err("database is locked".to_string()) });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.error(), Some("database is locked"));
  }

  #[tokio::test]
  async fn test_refetch_keeps_previous_data() {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter_clone = counter.clone();
    let mut query = Query::new(move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, String>(counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(50)).await;
    query.poll();
    assert_eq!(query.data(), Some(&0));

    query.refetch();
    assert!(query.is_loading());
    assert_eq!(query.data(), Some(&0));

    tokio::time::sleep(Duration::from_millis(50)).await;
    query.poll();
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let mut query = Query::new(|| async { Ok::<_, String>(42) }).with_stale_time(Duration::ZERO);
    assert!(!query.is_stale());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    std::thread::sleep(Duration::from_millis(1));

    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_action_yields_result_once() {
    let mut action = Action::spawn(async { Ok::<_, String>("retried 2") });
    assert!(action.is_running());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(action.poll(), Some(Ok("retried 2")));
    assert!(!action.is_running());
    assert_eq!(action.poll(), None);
  }
}
