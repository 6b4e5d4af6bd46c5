//! Strategy executors. Each takes the rule's named cache plus a fetcher
//! closure producing the network leg, so tests can drive them with canned
//! futures instead of a live socket.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use tracing::{debug, warn};

use super::queue::WriteQueue;
use super::resource::{FetchedResponse, Resource};
use super::rules::StrategyOptions;
use super::storage::NamedCache;

/// What a strategy produced for the caller.
#[derive(Debug)]
pub enum Outcome {
  Response(FetchedResponse),
  /// NetworkOnly write that failed and was parked for replay.
  Deferred,
}

/// Serve from cache when a fresh entry exists; otherwise go to the network
/// and keep an acceptable response for next time.
pub async fn cache_first<F, Fut>(
  cache: &NamedCache,
  resource: &Resource,
  options: &StrategyOptions,
  fetch: F,
) -> Result<FetchedResponse>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<FetchedResponse>>,
{
  match cache.lookup(resource) {
    Ok(Some(cached)) => {
      debug!(url = %resource.url, "cache-first hit");
      return Ok(cached);
    }
    Ok(None) => {}
    Err(e) => warn!("Cache read failed, treating as miss: {}", e),
  }

  let response = fetch().await?;
  if options.is_acceptable(response.status) {
    if let Err(e) = cache.put(resource, &response) {
      warn!("Failed to cache response for {}: {}", resource.url, e);
    }
  }
  Ok(response)
}

/// Race the network against the rule's timeout; fall back to the cached
/// entry when the network loses. A leg that outlives the timeout is not
/// awaited by the caller but still updates the cache when it lands.
pub async fn network_first<F, Fut>(
  cache: &NamedCache,
  resource: &Resource,
  options: &StrategyOptions,
  fetch: F,
) -> Result<FetchedResponse>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<FetchedResponse>> + Send + 'static,
{
  let network = match options.network_timeout {
    Some(timeout) => {
      let mut leg = tokio::spawn(fetch());
      match tokio::time::timeout(timeout, &mut leg).await {
        Ok(joined) => joined.map_err(|e| eyre!("Network task panicked: {}", e))?,
        Err(_) => {
          debug!(url = %resource.url, "Network timed out, abandoning leg");
          spawn_opportunistic_store(cache, resource, options, leg);
          Err(eyre!("Network timed out after {:?}", timeout))
        }
      }
    }
    None => fetch().await,
  };

  match network {
    Ok(response) if options.is_acceptable(response.status) => {
      if let Err(e) = cache.put(resource, &response) {
        warn!("Failed to cache response for {}: {}", resource.url, e);
      }
      Ok(response)
    }
    // A live but uncacheable response is still the freshest answer.
    Ok(response) => Ok(response),
    Err(network_err) => match cache.lookup(resource) {
      Ok(Some(cached)) => {
        debug!(url = %resource.url, "Serving cached entry after network failure");
        Ok(cached)
      }
      Ok(None) => Err(network_err),
      Err(e) => {
        warn!("Cache read failed during fallback: {}", e);
        Err(network_err)
      }
    },
  }
}

fn spawn_opportunistic_store(
  cache: &NamedCache,
  resource: &Resource,
  options: &StrategyOptions,
  leg: tokio::task::JoinHandle<Result<FetchedResponse>>,
) {
  let cache = cache.clone();
  let resource = resource.clone();
  let options = options.clone();
  tokio::spawn(async move {
    if let Ok(Ok(response)) = leg.await {
      if options.is_acceptable(response.status) {
        if let Err(e) = cache.put(&resource, &response) {
          warn!("Late store failed for {}: {}", resource.url, e);
        }
      }
    }
  });
}

/// Return the cached entry immediately when present and refresh it in the
/// background; the refresh never blocks the response already returned.
pub async fn stale_while_revalidate<F, Fut>(
  cache: &NamedCache,
  resource: &Resource,
  options: &StrategyOptions,
  fetch: F,
) -> Result<FetchedResponse>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<FetchedResponse>> + Send + 'static,
{
  match cache.lookup(resource) {
    Ok(Some(cached)) => {
      let bg_cache = cache.clone();
      let bg_resource = resource.clone();
      let bg_options = options.clone();
      let leg = fetch();
      tokio::spawn(async move {
        match leg.await {
          Ok(response) if bg_options.is_acceptable(response.status) => {
            if let Err(e) = bg_cache.put(&bg_resource, &response) {
              warn!("Background refresh store failed for {}: {}", bg_resource.url, e);
            }
          }
          Ok(response) => {
            debug!(status = response.status, "Background refresh not cacheable");
          }
          Err(e) => debug!("Background refresh failed: {}", e),
        }
      });
      Ok(cached)
    }
    Ok(None) | Err(_) => {
      let response = fetch().await?;
      if options.is_acceptable(response.status) {
        if let Err(e) = cache.put(resource, &response) {
          warn!("Failed to cache response for {}: {}", resource.url, e);
        }
      }
      Ok(response)
    }
  }
}

/// Always hit the network, never the cache. When the rule carries a replay
/// queue, a failed write is parked there instead of erroring out.
pub async fn network_only<F, Fut>(
  resource: &Resource,
  queue: Option<&WriteQueue>,
  fetch: F,
) -> Result<Outcome>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<FetchedResponse>>,
{
  match fetch().await {
    Ok(response) => Ok(Outcome::Response(response)),
    Err(e) => match queue {
      Some(queue) => {
        warn!(url = %resource.url, "Write failed, queueing for replay: {}", e);
        queue.enqueue(resource)?;
        Ok(Outcome::Deferred)
      }
      None => Err(e),
    },
  }
}
