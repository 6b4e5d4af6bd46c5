//! Caching rules: named strategies bound to resource matchers.
//!
//! The rule table is ordered and first-match-wins; a request no rule claims
//! passes through to the network untouched.

use std::time::Duration;

use super::resource::{Destination, Method, Resource};

/// Namespace shared by every cache this app owns. Caches under this prefix
/// but with a different version suffix are removed at install time.
pub const CACHE_PREFIX: &str = "litenkod";
pub const CACHE_SUFFIX: &str = "v1";

pub const WRITE_QUEUE_NAME: &str = "post-queue";
pub const WRITE_QUEUE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  NetworkOnly,
}

/// Per-rule tuning knobs. Counts and ages are non-negative by construction.
#[derive(Debug, Clone)]
pub struct StrategyOptions {
  /// Entry cap for the rule's cache; oldest entries evicted past it.
  pub max_entries: Option<usize>,
  /// Entries older than this read as absent (lazy expiry).
  pub max_age: Option<Duration>,
  /// NetworkFirst only: how long to wait before falling back to cache.
  pub network_timeout: Option<Duration>,
  /// Response statuses worth caching.
  pub acceptable_statuses: Vec<u16>,
}

impl Default for StrategyOptions {
  fn default() -> Self {
    Self {
      max_entries: None,
      max_age: None,
      network_timeout: None,
      acceptable_statuses: vec![200],
    }
  }
}

impl StrategyOptions {
  pub fn is_acceptable(&self, status: u16) -> bool {
    self.acceptable_statuses.contains(&status)
  }
}

/// One routing rule: a pure matcher over request metadata plus the strategy
/// and cache it selects.
pub struct CacheRule {
  pub name: &'static str,
  pub matcher: fn(&Resource) -> bool,
  pub strategy: StrategyKind,
  pub cache_name: String,
  pub options: StrategyOptions,
  /// NetworkOnly rules with this set park failed writes in the replay
  /// queue instead of surfacing a hard error.
  pub deferred_writes: bool,
}

impl CacheRule {
  fn new(
    name: &'static str,
    matcher: fn(&Resource) -> bool,
    strategy: StrategyKind,
    cache: &str,
    options: StrategyOptions,
  ) -> Self {
    Self {
      name,
      matcher,
      strategy,
      cache_name: versioned_cache_name(cache),
      options,
      deferred_writes: false,
    }
  }

  pub fn matches(&self, resource: &Resource) -> bool {
    (self.matcher)(resource)
  }
}

/// `pages` -> `litenkod-pages-v1`.
pub fn versioned_cache_name(base: &str) -> String {
  format!("{}-{}-{}", CACHE_PREFIX, base, CACHE_SUFFIX)
}

const DAY: u64 = 24 * 60 * 60;

fn match_navigation(r: &Resource) -> bool {
  r.destination == Destination::Document && r.method == Method::Get
}

fn match_static_asset(r: &Resource) -> bool {
  matches!(r.destination, Destination::Style | Destination::Script)
}

fn match_font(r: &Resource) -> bool {
  r.destination == Destination::Font
}

fn match_image(r: &Resource) -> bool {
  r.destination == Destination::Image
}

fn match_api_read(r: &Resource) -> bool {
  r.url.path().starts_with("/api/") && r.method == Method::Get
}

fn match_api_submit(r: &Resource) -> bool {
  r.url.path() == "/api/submit" && r.method == Method::Post
}

/// The full rule table, in evaluation order.
pub fn default_rules() -> Vec<CacheRule> {
  vec![
    CacheRule::new(
      "navigation",
      match_navigation,
      StrategyKind::NetworkFirst,
      "pages",
      StrategyOptions {
        max_entries: Some(50),
        max_age: Some(Duration::from_secs(7 * DAY)),
        ..Default::default()
      },
    ),
    CacheRule::new(
      "static-assets",
      match_static_asset,
      StrategyKind::StaleWhileRevalidate,
      "static-assets",
      StrategyOptions::default(),
    ),
    CacheRule::new(
      "fonts",
      match_font,
      StrategyKind::CacheFirst,
      "fonts",
      StrategyOptions {
        max_entries: Some(20),
        max_age: Some(Duration::from_secs(365 * DAY)),
        ..Default::default()
      },
    ),
    CacheRule::new(
      "images",
      match_image,
      StrategyKind::StaleWhileRevalidate,
      "images",
      StrategyOptions {
        max_entries: Some(100),
        max_age: Some(Duration::from_secs(30 * DAY)),
        ..Default::default()
      },
    ),
    CacheRule::new(
      "api-read",
      match_api_read,
      StrategyKind::NetworkFirst,
      "api",
      StrategyOptions {
        max_entries: Some(50),
        max_age: Some(Duration::from_secs(600)),
        network_timeout: Some(Duration::from_secs(3)),
        ..Default::default()
      },
    ),
    CacheRule {
      name: "api-submit",
      matcher: match_api_submit,
      strategy: StrategyKind::NetworkOnly,
      cache_name: String::new(),
      options: StrategyOptions::default(),
      deferred_writes: true,
    },
  ]
}
