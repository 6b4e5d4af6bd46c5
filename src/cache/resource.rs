//! Request and response model the caching layer operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// What kind of consumer a request is for, mirroring the classes of assets
/// the page loads. Drives both routing and the catch-handler fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Style,
  Script,
  Font,
  Image,
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
    }
  }
}

/// An outgoing request, described by metadata only. Rule matchers are pure
/// functions of this struct.
#[derive(Debug, Clone)]
pub struct Resource {
  pub url: Url,
  pub method: Method,
  pub destination: Destination,
  /// Request body for write-type requests; replayed verbatim from the queue.
  pub body: Option<Vec<u8>>,
}

impl Resource {
  pub fn get(url: Url, destination: Destination) -> Self {
    Self {
      url,
      method: Method::Get,
      destination,
      body: None,
    }
  }

  pub fn post(url: Url, body: Vec<u8>) -> Self {
    Self {
      url,
      method: Method::Post,
      destination: Destination::Other,
      body: Some(body),
    }
  }

  /// Stable cache key: hash of method and URL, fixed length regardless of
  /// how long the URL gets.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response as stored in and served from the named caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedResponse {
  pub status: u16,
  pub content_type: Option<String>,
  /// Redirect target; only set on synthetic 302 responses.
  pub location: Option<String>,
  pub body: Vec<u8>,
  pub fetched_at: DateTime<Utc>,
}

impl FetchedResponse {
  pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type,
      location: None,
      body,
      fetched_at: Utc::now(),
    }
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Synthetic redirect used when even the offline fallback page is gone
  /// from the precache.
  pub fn redirect(location: &str) -> Self {
    Self {
      status: 302,
      content_type: None,
      location: Some(location.to_string()),
      body: Vec::new(),
      fetched_at: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn resource(url: &str, method: Method) -> Resource {
    Resource {
      url: Url::parse(url).unwrap(),
      method,
      destination: Destination::Other,
      body: None,
    }
  }

  #[test]
  fn test_cache_key_is_stable_and_method_sensitive() {
    let get = resource("https://litenkod.se/api/legends.json", Method::Get);
    let post = resource("https://litenkod.se/api/legends.json", Method::Post);

    assert_eq!(get.cache_key(), get.cache_key());
    assert_ne!(get.cache_key(), post.cache_key());
    assert_eq!(get.cache_key().len(), 64);
  }

  #[test]
  fn test_is_ok_bounds() {
    assert!(FetchedResponse::new(200, None, vec![]).is_ok());
    assert!(FetchedResponse::new(299, None, vec![]).is_ok());
    assert!(!FetchedResponse::new(302, None, vec![]).is_ok());
    assert!(!FetchedResponse::new(500, None, vec![]).is_ok());
  }

  #[test]
  fn test_redirect_carries_location() {
    let r = FetchedResponse::redirect("/offline.html");
    assert_eq!(r.status, 302);
    assert_eq!(r.location.as_deref(), Some("/offline.html"));
    assert!(r.content_type.is_none());
    assert!(r.body.is_empty());
  }
}
