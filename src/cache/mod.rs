//! Offline caching core: the resource model, the ordered rule table, the
//! named response caches with their eviction policies, the four caching
//! strategies, and the deferred-write replay queue.

pub mod queue;
pub mod resource;
pub mod rules;
pub mod storage;
pub mod strategy;

pub use queue::{ReplayReport, WriteQueue};
pub use resource::{Destination, FetchedResponse, Method, Resource};
pub use rules::{
  default_rules, versioned_cache_name, CacheRule, StrategyKind, StrategyOptions, CACHE_PREFIX,
  CACHE_SUFFIX, WRITE_QUEUE_NAME, WRITE_QUEUE_RETENTION,
};
pub use storage::{CacheStore, NamedCache, SqliteCacheStore};
pub use strategy::Outcome;
