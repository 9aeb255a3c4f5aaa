//! REST client for a PostgREST-style backend (Supabase and friends).

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{RemoteBackend, RemoteError};
use crate::error::{Error, Result};

/// HTTP backend that maps table writes onto REST calls:
///
/// - insert: `POST {base}/{table}`
/// - update: `PATCH {base}/{table}?id=eq.{id}`
/// - delete: `DELETE {base}/{table}?id=eq.{id}`
#[derive(Clone)]
pub struct RestBackend {
  client: Client,
  base: Url,
  api_key: String,
}

impl RestBackend {
  /// `base_url` is the project URL, `rest_path` the API prefix (e.g. "rest/v1/").
  pub fn new(base_url: &str, rest_path: &str, api_key: impl Into<String>) -> Result<Self> {
    let base = with_trailing_slash(base_url);
    let base = Url::parse(&base)
      .and_then(|url| url.join(&with_trailing_slash(rest_path.trim_start_matches('/'))))
      .map_err(|e| Error::Config(format!("invalid backend url {}: {}", base_url, e)))?;

    let client = Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base,
      api_key: api_key.into(),
    })
  }

  /// Base URL that table names are resolved against.
  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
    if table.is_empty()
      || !table
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
      return Err(RemoteError::InvalidPayload(format!(
        "invalid table name '{}'",
        table
      )));
    }

    self
      .base
      .join(table)
      .map_err(|e| RemoteError::InvalidPayload(format!("invalid table url: {}", e)))
  }

  fn record_url(&self, table: &str, id: &str) -> Result<Url, RemoteError> {
    let mut url = self.table_url(table)?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));
    Ok(url)
  }

  async fn send(&self, request: RequestBuilder) -> Result<(), RemoteError> {
    let response = request
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
      .header("Prefer", "return=minimal")
      .send()
      .await
      .map_err(map_reqwest_error)?;

    let status = response.status();
    if status.is_success() {
      return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Rejected {
      status: status.as_u16(),
      message: error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    })
  }
}

impl RemoteBackend for RestBackend {
  fn insert<'a>(
    &'a self,
    table: &'a str,
    record: &'a Value,
  ) -> BoxFuture<'a, Result<(), RemoteError>> {
    async move {
      let url = self.table_url(table)?;
      self.send(self.client.post(url).json(record)).await
    }
    .boxed()
  }

  fn update<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
    record: &'a Value,
  ) -> BoxFuture<'a, Result<(), RemoteError>> {
    async move {
      let url = self.record_url(table, id)?;
      self.send(self.client.patch(url).json(record)).await
    }
    .boxed()
  }

  fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), RemoteError>> {
    async move {
      let url = self.record_url(table, id)?;
      self.send(self.client.delete(url)).await
    }
    .boxed()
  }

  fn ping(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
    async move {
      // Any HTTP answer means the backend is reachable
      self
        .client
        .head(self.base.clone())
        .header("apikey", &self.api_key)
        .send()
        .await
        .map(|_| ())
        .map_err(map_reqwest_error)
    }
    .boxed()
  }
}

fn with_trailing_slash(s: &str) -> String {
  if s.ends_with('/') {
    s.to_string()
  } else {
    format!("{}/", s)
  }
}

fn map_reqwest_error(e: reqwest::Error) -> RemoteError {
  if e.is_timeout() {
    RemoteError::Network(format!("request timed out: {}", e))
  } else {
    RemoteError::Network(e.to_string())
  }
}

/// Pull a readable message out of a PostgREST error body.
fn error_message(body: &str) -> Option<String> {
  let body = body.trim();
  if body.is_empty() {
    return None;
  }

  match serde_json::from_str::<Value>(body) {
    Ok(Value::Object(map)) => ["message", "error_description", "error", "hint"]
      .iter()
      .find_map(|field| map.get(*field).and_then(Value::as_str))
      .map(String::from)
      .or_else(|| Some(body.to_string())),
    _ => Some(body.to_string()),
  }
}
