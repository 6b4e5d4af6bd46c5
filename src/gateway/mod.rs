//! The offline gateway: a separate task that owns the cache controller and
//! serves every request the page makes. The page side talks to it purely
//! through message passing; the two sides share nothing in memory.

pub mod controller;
pub mod interceptor;
pub mod lifecycle;

pub use controller::{
  CacheController, GatewayEvent, IMAGE_FALLBACK, OFFLINE_PAGE, PRECACHE_MANIFEST,
};
pub use interceptor::{Handled, Interceptor};
pub use lifecycle::{LifecycleState, UpdateLifecycle, UpdatePrompt};

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::cache::Resource;

/// Page-to-gateway messages.
pub enum GatewayRequest {
  Fetch {
    resource: Resource,
    reply: oneshot::Sender<Result<Handled>>,
  },
  /// The page confirmed the update prompt; the waiting instance takes over.
  SkipWaiting,
}

/// The page's capability to reach the gateway.
#[derive(Clone)]
pub struct GatewayHandle {
  tx: mpsc::UnboundedSender<GatewayRequest>,
  events: broadcast::Sender<GatewayEvent>,
}

impl GatewayHandle {
  pub async fn fetch(&self, resource: Resource) -> Result<Handled> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(GatewayRequest::Fetch { resource, reply })
      .map_err(|_| eyre!("Gateway is gone"))?;
    rx.await.map_err(|_| eyre!("Gateway dropped the request"))?
  }

  pub fn skip_waiting(&self) {
    let _ = self.tx.send(GatewayRequest::SkipWaiting);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
    self.events.subscribe()
  }
}

/// Install the gateway and spawn its service loop. Returns once install has
/// run, together with the settled lifecycle state: install runs before any
/// page-side subscriber exists, so an UpdateAvailable broadcast fired during
/// it would be lost. The returned state carries that signal instead.
pub async fn spawn(
  controller: CacheController,
  version: &str,
) -> Result<(GatewayHandle, LifecycleState)> {
  let controller = Arc::new(controller);
  let events = controller.events_handle();
  let mut lifecycle = UpdateLifecycle::new(version);

  lifecycle.install(&controller).await?;
  let installed = lifecycle.state();

  let (tx, mut rx) = mpsc::unbounded_channel();
  let interceptor = Interceptor::new(controller.clone());
  let mut internal = controller.subscribe();

  tokio::spawn(async move {
    loop {
      tokio::select! {
        request = rx.recv() => {
          let Some(request) = request else {
            info!("Page side closed, gateway shutting down");
            lifecycle.retire();
            break;
          };
          match request {
            GatewayRequest::Fetch { resource, reply } => {
              let result = interceptor.handle(&resource).await;
              let _ = reply.send(result);
            }
            GatewayRequest::SkipWaiting => {
              if let Err(e) = lifecycle.activate(interceptor.controller()) {
                warn!("Activation failed: {}", e);
              }
            }
          }
        }
        event = internal.recv() => {
          if let Ok(GatewayEvent::BackOnline) = event {
            let controller = interceptor.controller();
            let report = controller
              .queue()
              .replay(|r| controller.network_leg(&r))
              .await;
            if let Err(e) = report {
              warn!("Write queue replay failed: {}", e);
            }
          }
        }
      }
    }
  });

  Ok((GatewayHandle { tx, events }, installed))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{
    CacheStore, Destination, FetchedResponse, NamedCache, SqliteCacheStore, StrategyOptions,
  };
  use crate::net::testing::StaticBackend;
  use std::sync::atomic::Ordering;
  use url::Url;

  async fn spawn_gateway(backend: Arc<StaticBackend>) -> GatewayHandle {
    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    let controller = CacheController::new(
      Url::parse("https://litenkod.se").unwrap(),
      "0.1.0",
      backend,
      store,
    );
    let (handle, _) = spawn(controller, "0.1.0").await.unwrap();
    handle
  }

  #[tokio::test]
  async fn test_fetch_round_trip_through_service() {
    let backend = Arc::new(StaticBackend::new());
    backend.insert(
      "/api/legends.json",
      FetchedResponse::new(200, None, b"[]".to_vec()),
    );
    let handle = spawn_gateway(backend).await;

    let resource = Resource::get(
      Url::parse("https://litenkod.se/api/legends.json").unwrap(),
      Destination::Other,
    );
    let out = handle.fetch(resource).await.unwrap();
    assert!(matches!(out, Handled::Response(ref r) if r.body == b"[]"));
  }

  #[tokio::test]
  async fn test_queued_write_replays_when_back_online() {
    let backend = Arc::new(StaticBackend::new());
    backend.insert("/api/submit", FetchedResponse::new(200, None, Vec::new()));
    backend.fail_all.store(true, Ordering::SeqCst);

    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    let controller = CacheController::new(
      Url::parse("https://litenkod.se").unwrap(),
      "0.1.0",
      backend.clone(),
      store.clone(),
    );
    let (handle, _) = spawn(controller, "0.1.0").await.unwrap();

    // Offline submit gets parked.
    let submit = Resource::post(
      Url::parse("https://litenkod.se/api/submit").unwrap(),
      b"{}".to_vec(),
    );
    let out = handle.fetch(submit).await.unwrap();
    assert!(matches!(out, Handled::Deferred));

    // Connectivity returns; the next successful fetch triggers replay.
    backend.fail_all.store(false, Ordering::SeqCst);
    backend.insert("/api/legends.json", FetchedResponse::new(200, None, b"[]".to_vec()));
    let read = Resource::get(
      Url::parse("https://litenkod.se/api/legends.json").unwrap(),
      Destination::Other,
    );
    handle.fetch(read).await.unwrap();

    // Give the service loop a chance to run the replay pass.
    let queue = crate::cache::WriteQueue::new(
      crate::cache::WRITE_QUEUE_NAME,
      crate::cache::WRITE_QUEUE_RETENTION,
      store,
    );
    let mut drained = false;
    for _ in 0..64 {
      tokio::task::yield_now().await;
      if queue.is_empty().unwrap() {
        drained = true;
        break;
      }
    }
    assert!(drained, "queued submit was not replayed");
  }

  #[tokio::test]
  async fn test_pending_update_survives_late_subscription() {
    let backend = Arc::new(StaticBackend::new());
    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());

    // A previous version left its precache behind.
    let old = NamedCache::new(
      "litenkod-precache-0.0.9".to_string(),
      StrategyOptions::default(),
      store.clone(),
    );
    let page = Resource::get(
      Url::parse("https://litenkod.se/offline.html").unwrap(),
      Destination::Document,
    );
    old
      .put(&page, &FetchedResponse::new(200, None, b"old".to_vec()))
      .unwrap();

    let controller = CacheController::new(
      Url::parse("https://litenkod.se").unwrap(),
      "0.1.0",
      backend,
      store.clone(),
    );
    let (handle, state) = spawn(controller, "0.1.0").await.unwrap();

    // The update broadcast fired before anyone was listening; the returned
    // state has to carry it so the page can still offer the prompt.
    assert_eq!(state, LifecycleState::Waiting);

    // Confirming through the handle still drives the takeover.
    let mut events = handle.subscribe();
    handle.skip_waiting();
    let mut changed = false;
    for _ in 0..64 {
      tokio::task::yield_now().await;
      if let Ok(GatewayEvent::ControllerChanged) = events.try_recv() {
        changed = true;
        break;
      }
    }
    assert!(changed, "takeover was never announced");
    assert!(!store
      .list_caches()
      .unwrap()
      .contains(&"litenkod-precache-0.0.9".to_string()));
  }
}
