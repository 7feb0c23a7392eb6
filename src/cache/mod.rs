//! Request-scoped multi-store cache.
//!
//! Three named stores share one process-wide [`CacheManager`]:
//!
//! - **route**: full rendered responses, replayed verbatim on `GET`
//! - **data**: arbitrary serializable values behind [`DataCache`]
//! - **component**: rendered fragments, same facade as data
//!
//! Each request gets a [`CacheContext`] (store handles plus a key prefix) and
//! a [`RouteCacheHelper`] that handlers contribute caching directives to.
//! Entries carry tags; purging a tag removes every entry that carries it,
//! optionally after a delay.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enable_route = true
//! enable_data = true
//! route_limit = 500
//! key_prefix = ""
//!
//! [cdn]
//! enabled = true
//! cache_control_header = "Surrogate-Control"
//! cache_tag_header = "Cache-Tag"
//! ```

mod cdn;
mod config;
mod context;
mod data;
mod error;
mod expiry;
mod item;
mod keys;
mod lock;
mod manager;
pub mod metric_names;
mod middleware;
mod route;
pub mod scope;
mod store;
mod tags;

pub use cdn::{CdnHeaders, DEFAULT_CDN_CONTROL_HEADER, DEFAULT_CDN_TAG_HEADER, cache_control_value};
pub use config::CacheConfig;
pub use context::{CacheContext, KeyPrefixResolver, RequestFilter, StoreHandle};
pub use data::{DataCache, DataCacheEntry, with_data_cache};
pub use error::{CacheError, StoreError};
pub use expiry::{Clock, EpochSeconds, ExpiryPolicy, ManualClock, SystemClock};
pub use item::{CacheEntry, CacheItem, RouteCacheItem};
pub use keys::{CacheName, KEY_SEPARATOR, StoreKey, key_with_prefix};
pub use manager::{CacheManager, CacheManagerBuilder, Lookup, MissReason};
pub use middleware::{CacheState, cache_context_layer, response_cache_layer};
pub use route::{RouteCacheDecision, RouteCacheHelper};
pub use store::{CacheStore, MemoryStore, StoreStats};
pub use tags::{DueInvalidations, PendingInvalidation, TagIndex};
