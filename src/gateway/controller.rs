//! The cache controller: owns the ordered rule table, the named caches,
//! the precache, the write queue, and the connectivity tracker. Constructed
//! once and injected into the interceptor; never ambient global state.

use color_eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

use crate::cache::{
  default_rules, CacheRule, FetchedResponse, NamedCache, Resource, SqliteCacheStore,
  StrategyOptions, WriteQueue, CACHE_PREFIX, WRITE_QUEUE_NAME, WRITE_QUEUE_RETENTION,
};
use crate::net::NetworkBackend;

/// Assets guaranteed to be cached at install time.
pub const PRECACHE_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/assets/app.css",
  "/assets/app.js",
  "/offline.html",
  "/images/fallback.png",
];

pub const OFFLINE_PAGE: &str = "/offline.html";
pub const IMAGE_FALLBACK: &str = "/images/fallback.png";

/// Signals crossing from the interception side to the page side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
  /// A network request succeeded after the gateway had been failing.
  BackOnline,
  /// A newer gateway instance is installed and waiting for takeover.
  UpdateAvailable,
  /// A waiting instance took over; the page should reload exactly once.
  ControllerChanged,
}

const CONN_UNKNOWN: u8 = 0;
const CONN_ONLINE: u8 = 1;
const CONN_OFFLINE: u8 = 2;

/// Last observed network outcome; detects the offline-to-online edge.
pub struct Connectivity {
  state: AtomicU8,
}

impl Connectivity {
  pub fn new() -> Self {
    Self {
      state: AtomicU8::new(CONN_UNKNOWN),
    }
  }

  /// Record an outcome; returns true on an offline-to-online transition.
  pub fn record(&self, ok: bool) -> bool {
    let next = if ok { CONN_ONLINE } else { CONN_OFFLINE };
    let prev = self.state.swap(next, Ordering::SeqCst);
    ok && prev == CONN_OFFLINE
  }

  /// Online only after a successful request has been observed.
  pub fn is_online(&self) -> bool {
    self.state.load(Ordering::SeqCst) == CONN_ONLINE
  }
}

pub fn precache_name(version: &str) -> String {
  format!("{}-precache-{}", CACHE_PREFIX, version)
}

pub struct CacheController {
  base: Url,
  rules: Vec<CacheRule>,
  caches: HashMap<&'static str, NamedCache>,
  precache: NamedCache,
  queue: WriteQueue,
  network: Arc<dyn NetworkBackend>,
  store: Arc<SqliteCacheStore>,
  connectivity: Arc<Connectivity>,
  events: broadcast::Sender<GatewayEvent>,
}

impl CacheController {
  pub fn new(
    base: Url,
    version: &str,
    network: Arc<dyn NetworkBackend>,
    store: Arc<SqliteCacheStore>,
  ) -> Self {
    let rules = default_rules();
    let caches = rules
      .iter()
      .filter(|rule| !rule.cache_name.is_empty())
      .map(|rule| {
        (
          rule.name,
          NamedCache::new(rule.cache_name.clone(), rule.options.clone(), store.clone()),
        )
      })
      .collect();

    let precache = NamedCache::new(
      precache_name(version),
      StrategyOptions::default(),
      store.clone(),
    );
    let queue = WriteQueue::new(WRITE_QUEUE_NAME, WRITE_QUEUE_RETENTION, store.clone());
    let (events, _) = broadcast::channel(16);

    Self {
      base,
      rules,
      caches,
      precache,
      queue,
      network,
      store,
      connectivity: Arc::new(Connectivity::new()),
      events,
    }
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  pub fn rules(&self) -> &[CacheRule] {
    &self.rules
  }

  pub fn cache_for(&self, rule: &CacheRule) -> Option<&NamedCache> {
    self.caches.get(rule.name)
  }

  pub fn precache(&self) -> &NamedCache {
    &self.precache
  }

  pub fn queue(&self) -> &WriteQueue {
    &self.queue
  }

  pub fn store(&self) -> &Arc<SqliteCacheStore> {
    &self.store
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
    self.events.subscribe()
  }

  pub(crate) fn events_handle(&self) -> broadcast::Sender<GatewayEvent> {
    self.events.clone()
  }

  pub fn emit(&self, event: GatewayEvent) {
    // No subscribers is fine; events are advisory.
    let _ = self.events.send(event);
  }

  /// One trip to the real network, with connectivity accounting. The edge
  /// back to online announces itself so the queue replay and data re-sync
  /// can run.
  pub fn network_leg(&self, resource: &Resource) -> BoxFuture<'static, Result<FetchedResponse>> {
    let fut = self.network.fetch(resource);
    let events = self.events.clone();
    let tracker = self.connectivity.clone();
    async move {
      let result = fut.await;
      if tracker.record(result.is_ok()) {
        debug!("Connectivity restored");
        let _ = events.send(GatewayEvent::BackOnline);
      }
      result
    }
    .boxed()
  }

  /// Fetch a precached asset by path, if present.
  pub fn precached(&self, path: &str) -> Result<Option<FetchedResponse>> {
    let Ok(url) = self.base.join(path) else {
      return Ok(None);
    };
    let resource = Resource::get(url, crate::cache::Destination::Other);
    self.precache.lookup(&resource)
  }
}
