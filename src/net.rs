//! HTTP backend. Everything above this module works on `Resource` and
//! `FetchedResponse`; only this file talks to reqwest.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::time::Duration;

use crate::cache::{FetchedResponse, Method, Resource};

/// The network leg of the gateway. Object-safe so tests can substitute
/// canned backends.
pub trait NetworkBackend: Send + Sync + 'static {
  fn fetch(&self, resource: &Resource) -> BoxFuture<'static, Result<FetchedResponse>>;
}

/// Real backend over a shared reqwest client.
#[derive(Clone)]
pub struct HttpBackend {
  client: reqwest::Client,
}

impl HttpBackend {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("lgnd/", env!("CARGO_PKG_VERSION")))
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl NetworkBackend for HttpBackend {
  fn fetch(&self, resource: &Resource) -> BoxFuture<'static, Result<FetchedResponse>> {
    let client = self.client.clone();
    let resource = resource.clone();

    Box::pin(async move {
      let request = match resource.method {
        Method::Get => client
          .get(resource.url.clone())
          // The authoritative fetch must not be answered by any
          // intermediary cache.
          .header(reqwest::header::CACHE_CONTROL, "no-store"),
        Method::Post => {
          let builder = client.post(resource.url.clone());
          match resource.body {
            Some(body) => builder.body(body),
            None => builder,
          }
        }
      };

      let response = request
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", resource.url, e))?;

      let status = response.status().as_u16();
      let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body from {}: {}", resource.url, e))?
        .to_vec();

      Ok(FetchedResponse::new(status, content_type, body))
    })
  }
}

/// Backend that refuses every request. Selected by `--offline` to exercise
/// the fallback paths end to end.
pub struct OfflineBackend;

impl NetworkBackend for OfflineBackend {
  fn fetch(&self, resource: &Resource) -> BoxFuture<'static, Result<FetchedResponse>> {
    let url = resource.url.clone();
    Box::pin(async move { Err(eyre!("Offline mode: refusing request to {}", url)) })
  }
}

#[cfg(test)]
pub mod testing {
  //! Canned backends for gateway and strategy tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Serves responses from a fixed path map; misses and unknown paths fail
  /// like a dead connection. Counts requests per path.
  pub struct StaticBackend {
    responses: Mutex<HashMap<String, FetchedResponse>>,
    pub requests: AtomicUsize,
    /// When set, every request fails regardless of the map.
    pub fail_all: std::sync::atomic::AtomicBool,
  }

  impl StaticBackend {
    pub fn new() -> Self {
      Self {
        responses: Mutex::new(HashMap::new()),
        requests: AtomicUsize::new(0),
        fail_all: std::sync::atomic::AtomicBool::new(false),
      }
    }

    pub fn insert(&self, path: &str, response: FetchedResponse) {
      self.responses.lock().unwrap().insert(path.to_string(), response);
    }

    pub fn request_count(&self) -> usize {
      self.requests.load(Ordering::SeqCst)
    }
  }

  impl NetworkBackend for StaticBackend {
    fn fetch(&self, resource: &Resource) -> BoxFuture<'static, Result<FetchedResponse>> {
      self.requests.fetch_add(1, Ordering::SeqCst);
      let url = resource.url.clone();
      let result = if self.fail_all.load(Ordering::SeqCst) {
        Err(eyre!("Connection refused: {}", url))
      } else {
        self
          .responses
          .lock()
          .unwrap()
          .get(url.path())
          .cloned()
          .ok_or_else(|| eyre!("Connection refused: {}", url))
      };
      Box::pin(async move { result })
    }
  }
}
