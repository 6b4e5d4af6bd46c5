//! Single entry point for every request the page issues while the gateway
//! is active. Matches the rule table in order, runs the matched strategy,
//! and falls back to the catch handler when nothing produced a usable
//! response.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{strategy, CacheRule, Destination, FetchedResponse, Outcome, Resource, StrategyKind};

use super::controller::{CacheController, IMAGE_FALLBACK, OFFLINE_PAGE};

/// What the interceptor hands back to the page.
#[derive(Debug)]
pub enum Handled {
  Response(FetchedResponse),
  /// A write that could not reach the network and was queued for replay.
  Deferred,
}

pub struct Interceptor {
  controller: Arc<CacheController>,
}

impl Interceptor {
  pub fn new(controller: Arc<CacheController>) -> Self {
    Self { controller }
  }

  pub fn controller(&self) -> &Arc<CacheController> {
    &self.controller
  }

  /// Pure first-match scan over the ordered rule table.
  pub fn route(&self, resource: &Resource) -> Option<&CacheRule> {
    self.controller.rules().iter().find(|rule| rule.matches(resource))
  }

  pub async fn handle(&self, resource: &Resource) -> Result<Handled> {
    let Some(rule) = self.route(resource) else {
      // No rule claims this request: default network behavior, no cache,
      // no catch handler.
      debug!(url = %resource.url, "No rule matched, passing through");
      return self
        .controller
        .network_leg(resource)
        .await
        .map(Handled::Response);
    };

    debug!(url = %resource.url, rule = rule.name, "Routing request");
    let result = self.run_strategy(rule, resource).await;

    match result {
      Ok(handled) => Ok(handled),
      Err(e) => {
        warn!(url = %resource.url, "Strategy failed, invoking catch handler: {}", e);
        self.catch(resource, e)
      }
    }
  }

  async fn run_strategy(&self, rule: &CacheRule, resource: &Resource) -> Result<Handled> {
    let fetch = || self.controller.network_leg(resource);

    match rule.strategy {
      StrategyKind::NetworkOnly => {
        let queue = rule.deferred_writes.then(|| self.controller.queue());
        let outcome = strategy::network_only(resource, queue, fetch).await?;
        Ok(match outcome {
          Outcome::Response(response) => Handled::Response(response),
          Outcome::Deferred => Handled::Deferred,
        })
      }
      kind => {
        let cache = self
          .controller
          .cache_for(rule)
          .ok_or_else(|| eyre!("Rule {} has no cache", rule.name))?;

        let response = match kind {
          StrategyKind::CacheFirst => {
            strategy::cache_first(cache, resource, &rule.options, fetch).await?
          }
          StrategyKind::NetworkFirst => {
            strategy::network_first(cache, resource, &rule.options, fetch).await?
          }
          StrategyKind::StaleWhileRevalidate => {
            strategy::stale_while_revalidate(cache, resource, &rule.options, fetch).await?
          }
          StrategyKind::NetworkOnly => unreachable!(),
        };
        Ok(Handled::Response(response))
      }
    }
  }

  /// Last line of defense: navigations get the precached offline page,
  /// images get the placeholder, everything else propagates the failure.
  fn catch(&self, resource: &Resource, error: color_eyre::Report) -> Result<Handled> {
    match resource.destination {
      Destination::Document => match self.controller.precached(OFFLINE_PAGE)? {
        Some(page) => Ok(Handled::Response(page)),
        // The offline page itself is gone from the precache; point the
        // client at it anyway.
        None => Ok(Handled::Response(FetchedResponse::redirect(OFFLINE_PAGE))),
      },
      Destination::Image => match self.controller.precached(IMAGE_FALLBACK)? {
        Some(image) => Ok(Handled::Response(image)),
        None => Err(error),
      },
      _ => Err(error),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStore, SqliteCacheStore};
  use crate::net::testing::StaticBackend;
  use std::sync::atomic::Ordering;
  use url::Url;

  fn setup() -> (Arc<StaticBackend>, Interceptor) {
    let backend = Arc::new(StaticBackend::new());
    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    let controller = Arc::new(CacheController::new(
      Url::parse("https://litenkod.se").unwrap(),
      "0.1.0",
      backend.clone(),
      store,
    ));
    (backend, Interceptor::new(controller))
  }

  fn precache(interceptor: &Interceptor, path: &str, body: &str) {
    let url = Url::parse("https://litenkod.se").unwrap().join(path).unwrap();
    let resource = Resource::get(url, Destination::Other);
    interceptor
      .controller()
      .precache()
      .put(&resource, &FetchedResponse::new(200, None, body.as_bytes().to_vec()))
      .unwrap();
  }

  fn navigation(path: &str) -> Resource {
    Resource::get(
      Url::parse("https://litenkod.se").unwrap().join(path).unwrap(),
      Destination::Document,
    )
  }

  fn image(path: &str) -> Resource {
    Resource::get(
      Url::parse("https://litenkod.se").unwrap().join(path).unwrap(),
      Destination::Image,
    )
  }

  fn body(handled: Handled) -> Vec<u8> {
    match handled {
      Handled::Response(r) => r.body,
      Handled::Deferred => panic!("expected a response"),
    }
  }

  #[tokio::test]
  async fn test_navigation_success_returns_live_page() {
    let (backend, interceptor) = setup();
    backend.insert("/", FetchedResponse::new(200, None, b"<live>".to_vec()));

    let out = interceptor.handle(&navigation("/")).await.unwrap();
    assert_eq!(body(out), b"<live>");
  }

  #[tokio::test]
  async fn test_navigation_failure_serves_offline_page() {
    let (_backend, interceptor) = setup();
    precache(&interceptor, OFFLINE_PAGE, "<offline>");

    let out = interceptor.handle(&navigation("/anywhere")).await.unwrap();
    assert_eq!(body(out), b"<offline>");
  }

  #[tokio::test]
  async fn test_navigation_failure_without_offline_page_redirects() {
    let (_backend, interceptor) = setup();

    let out = interceptor.handle(&navigation("/anywhere")).await.unwrap();
    match out {
      Handled::Response(r) => {
        assert_eq!(r.status, 302);
        assert_eq!(r.location.as_deref(), Some(OFFLINE_PAGE));
      }
      Handled::Deferred => panic!("expected a redirect"),
    }
  }

  #[tokio::test]
  async fn test_image_failure_serves_fallback_image() {
    let (_backend, interceptor) = setup();
    precache(&interceptor, IMAGE_FALLBACK, "png-bytes");

    let out = interceptor
      .handle(&image("/images/apex/wraith.png"))
      .await
      .unwrap();
    assert_eq!(body(out), b"png-bytes");
  }

  #[tokio::test]
  async fn test_image_failure_without_fallback_errors() {
    let (_backend, interceptor) = setup();

    let out = interceptor.handle(&image("/images/apex/wraith.png")).await;
    assert!(out.is_err());
  }

  #[tokio::test]
  async fn test_other_destination_failure_propagates() {
    let (_backend, interceptor) = setup();
    let style = Resource::get(
      Url::parse("https://litenkod.se/assets/app.css").unwrap(),
      Destination::Style,
    );

    assert!(interceptor.handle(&style).await.is_err());
  }

  #[tokio::test]
  async fn test_api_read_cached_then_served_offline() {
    let (backend, interceptor) = setup();
    backend.insert(
      "/api/legends.json",
      FetchedResponse::new(200, None, b"[{\"name\":\"Wraith\"}]".to_vec()),
    );

    let api = Resource::get(
      Url::parse("https://litenkod.se/api/legends.json").unwrap(),
      Destination::Other,
    );

    let first = interceptor.handle(&api).await.unwrap();
    assert_eq!(body(first), b"[{\"name\":\"Wraith\"}]");

    backend.fail_all.store(true, Ordering::SeqCst);
    let second = interceptor.handle(&api).await.unwrap();
    assert_eq!(body(second), b"[{\"name\":\"Wraith\"}]");
  }

  #[tokio::test]
  async fn test_failed_submit_is_deferred_into_queue() {
    let (_backend, interceptor) = setup();
    let submit = Resource::post(
      Url::parse("https://litenkod.se/api/submit").unwrap(),
      b"{\"squad\":1}".to_vec(),
    );

    let out = interceptor.handle(&submit).await.unwrap();
    assert!(matches!(out, Handled::Deferred));
    assert_eq!(interceptor.controller().queue().len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_unmatched_request_passes_through() {
    let (backend, interceptor) = setup();
    backend.insert("/metrics", FetchedResponse::new(200, None, b"ok".to_vec()));

    let r = Resource::post(Url::parse("https://litenkod.se/metrics").unwrap(), vec![]);
    let out = interceptor.handle(&r).await.unwrap();
    assert_eq!(body(out), b"ok");
    // Pass-through never wrote to any cache.
    assert!(interceptor.controller().store().list_caches().unwrap().is_empty());
  }
}
