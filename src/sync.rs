//! Page-side data synchronization: serve the persisted snapshot instantly,
//! race a network refresh behind it, and keep the snapshot current.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use url::Url;

use crate::cache::{Destination, FetchedResponse, Resource};
use crate::gateway::{GatewayHandle, Handled};
use crate::legends::{coerce_legend_list, Legend};
use crate::net::NetworkBackend;
use crate::store::SnapshotStore;

pub const LEGEND_SOURCE_PATH: &str = "/api/legends.json";

/// Where the legends currently on screen came from. Advances only forward
/// within a session; a failed refresh never demotes remote data back to
/// the bundled defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataSourceState {
  Default,
  Cache,
  Remote,
}

impl DataSourceState {
  /// Move forward if `next` outranks the current state; returns whether
  /// the transition happened.
  pub fn advance_to(&mut self, next: DataSourceState) -> bool {
    if next > *self {
      *self = next;
      true
    } else {
      false
    }
  }
}

/// Events the coordinator reports back to the page loop.
#[derive(Debug)]
pub enum SyncEvent {
  /// A refresh started; the page shows its syncing indicator.
  Started,
  /// A usable list arrived, with its provenance.
  Data {
    legends: Vec<Legend>,
    source: DataSourceState,
  },
  /// The refresh failed or produced no usable data; keep what is shown.
  Failed,
  /// The refresh finished, successfully or not.
  Finished,
}

/// How the coordinator reaches the network: through the offline gateway
/// normally, or straight at the backend when the gateway failed to boot.
pub enum Fetcher {
  Gateway(GatewayHandle),
  Direct(Arc<dyn NetworkBackend>),
}

impl Fetcher {
  async fn fetch(&self, resource: Resource) -> Result<FetchedResponse> {
    match self {
      Fetcher::Gateway(handle) => match handle.fetch(resource).await? {
        Handled::Response(response) => Ok(response),
        Handled::Deferred => Err(eyre!("Read request was deferred")),
      },
      Fetcher::Direct(backend) => backend.fetch(&resource).await,
    }
  }
}

pub struct SyncCoordinator {
  /// Absent when the snapshot store could not be opened; the app then
  /// simply has no cache fast-path.
  store: Option<Arc<SnapshotStore>>,
  fetcher: Fetcher,
  base: Url,
}

impl SyncCoordinator {
  pub fn new(store: Option<Arc<SnapshotStore>>, fetcher: Fetcher, base: Url) -> Self {
    Self {
      store,
      fetcher,
      base,
    }
  }

  /// Page-mount sequence: cached snapshot first for instant paint, then
  /// the authoritative fetch regardless of whether the snapshot existed.
  pub async fn initial_sync(&self, tx: &mpsc::UnboundedSender<SyncEvent>) {
    if let Some(store) = &self.store {
      match store.load() {
        Ok(Some(list)) if !list.is_empty() => {
          let _ = tx.send(SyncEvent::Data {
            legends: list,
            source: DataSourceState::Cache,
          });
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to read cached legends: {}", e),
      }
    }

    self.refresh(tx).await;
  }

  /// One network refresh pass; also run on every offline-to-online edge.
  pub async fn refresh(&self, tx: &mpsc::UnboundedSender<SyncEvent>) {
    let _ = tx.send(SyncEvent::Started);

    match self.fetch_remote().await {
      Ok(legends) => {
        if let Some(store) = &self.store {
          // Persistence failure is logged, never fatal.
          if let Err(e) = store.save(&legends) {
            warn!("Failed to cache legends: {}", e);
          }
        }
        let _ = tx.send(SyncEvent::Data {
          legends,
          source: DataSourceState::Remote,
        });
      }
      Err(e) => {
        warn!("Failed to refresh legends: {}", e);
        let _ = tx.send(SyncEvent::Failed);
      }
    }

    let _ = tx.send(SyncEvent::Finished);
  }

  async fn fetch_remote(&self) -> Result<Vec<Legend>> {
    let url = self
      .base
      .join(LEGEND_SOURCE_PATH)
      .map_err(|e| eyre!("Bad legends URL: {}", e))?;

    let response = self
      .fetcher
      .fetch(Resource::get(url, Destination::Other))
      .await?;

    if !response.is_ok() {
      return Err(eyre!("HTTP {}", response.status));
    }

    let payload: serde_json::Value = serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Legends payload is not JSON: {}", e))?;

    // Malformed and empty payloads rank the same as a dead network.
    coerce_legend_list(&payload).ok_or_else(|| eyre!("Payload contained no valid legends"))
  }
}
