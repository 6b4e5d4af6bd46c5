//! Install/activate/replace lifecycle for the gateway itself, plus the
//! page-side prompt logic that gates takeover and guards the one-time
//! reload.

use color_eyre::Result;
use tracing::{info, warn};

use crate::cache::{CacheStore, Destination, Resource, CACHE_PREFIX, CACHE_SUFFIX};

use super::controller::{precache_name, CacheController, GatewayEvent, PRECACHE_MANIFEST};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed but deferring takeover until the page confirms.
  Waiting,
  Active,
  /// Replaced by a newer active instance.
  Redundant,
}

/// One gateway instance moving through its lifecycle. A fresh install with
/// no predecessor activates immediately; otherwise it waits for an explicit
/// takeover signal so an open session is never yanked mid-use.
pub struct UpdateLifecycle {
  version: String,
  state: LifecycleState,
}

impl UpdateLifecycle {
  pub fn new(version: &str) -> Self {
    Self {
      version: version.to_string(),
      state: LifecycleState::Installing,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Populate the versioned precache from the asset manifest. Entries that
  /// cannot be fetched are kept from a previous install when present; a
  /// cold offline install simply precaches nothing and the catch handler
  /// degrades accordingly.
  pub async fn install(&mut self, controller: &CacheController) -> Result<()> {
    self.state = LifecycleState::Installing;

    let current = precache_name(&self.version);
    let predecessor = controller
      .store()
      .list_caches()?
      .into_iter()
      .any(|name| name.starts_with(&format!("{}-precache-", CACHE_PREFIX)) && name != current);

    for &path in PRECACHE_MANIFEST {
      let Ok(url) = controller.base().join(path) else {
        warn!("Skipping unjoinable precache path {}", path);
        continue;
      };
      let resource = Resource::get(url, Destination::Other);

      match controller.network_leg(&resource).await {
        Ok(response) if response.is_ok() => {
          controller.precache().put(&resource, &response)?;
        }
        Ok(response) => {
          warn!(path, status = response.status, "Not precaching error response");
        }
        Err(e) => {
          let kept = controller.precache().lookup(&resource)?.is_some();
          warn!(path, kept, "Precache fetch failed: {}", e);
        }
      }
    }

    info!(version = %self.version, "Gateway installed");

    if predecessor {
      self.state = LifecycleState::Waiting;
      controller.emit(GatewayEvent::UpdateAvailable);
    } else {
      self.activate(controller)?;
    }

    Ok(())
  }

  /// Take over: remove caches left behind by prior versions and claim all
  /// open sessions. Repeated activation is a no-op.
  pub fn activate(&mut self, controller: &CacheController) -> Result<bool> {
    if self.state == LifecycleState::Active {
      return Ok(false);
    }

    self.cleanup_stale(controller)?;
    self.state = LifecycleState::Active;
    info!(version = %self.version, "Gateway active");
    controller.emit(GatewayEvent::ControllerChanged);
    Ok(true)
  }

  pub fn retire(&mut self) {
    self.state = LifecycleState::Redundant;
  }

  /// Delete every cache under our namespace that belongs to another
  /// version: precaches of other versions, and runtime caches whose suffix
  /// does not match.
  fn cleanup_stale(&self, controller: &CacheController) -> Result<()> {
    let current_precache = precache_name(&self.version);
    let precache_prefix = format!("{}-precache-", CACHE_PREFIX);
    let runtime_suffix = format!("-{}", CACHE_SUFFIX);

    for name in controller.store().list_caches()? {
      if !name.starts_with(CACHE_PREFIX) {
        continue;
      }
      let stale = if name.starts_with(&precache_prefix) {
        name != current_precache
      } else {
        !name.ends_with(&runtime_suffix)
      };
      if stale {
        info!(cache = %name, "Removing stale cache");
        controller.store().delete_cache(&name)?;
      }
    }

    Ok(())
  }
}

/// Page-side companion: surfaces the update-available signal, forwards the
/// user's confirmation, and reloads exactly once on a genuine controller
/// change.
#[derive(Debug, Default)]
pub struct UpdatePrompt {
  pending: bool,
  reloaded: bool,
}

impl UpdatePrompt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_update_available(&mut self) {
    self.pending = true;
  }

  pub fn update_pending(&self) -> bool {
    self.pending
  }

  /// User accepted the update; returns true when a SkipWaiting message
  /// should be sent.
  pub fn confirm(&mut self) -> bool {
    if self.pending {
      self.pending = false;
      true
    } else {
      false
    }
  }

  /// Returns true exactly once, and only for a real controller change, so
  /// stray messages can never cause a reload loop.
  pub fn on_controller_changed(&mut self) -> bool {
    if self.reloaded {
      return false;
    }
    self.reloaded = true;
    true
  }
}
