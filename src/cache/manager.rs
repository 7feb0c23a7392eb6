//! Process-wide cache owner.
//!
//! Holds the enabled named stores, the tag index and the clock. Every read
//! goes through expiry and pending-invalidation checks; every tagged write is
//! registered in the index. Shared by all in-flight requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::config::CacheConfig;
use super::error::{CacheError, StoreError};
use super::expiry::{Clock, EpochSeconds, SystemClock};
use super::item::CacheEntry;
use super::keys::{CacheName, StoreKey};
use super::metric_names;
use super::store::{CacheStore, MemoryStore, StoreStats};
use super::tags::TagIndex;

/// Why a read produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Malformed,
    Expired,
    Invalidated,
}

impl MissReason {
    fn as_str(self) -> &'static str {
        match self {
            MissReason::Absent => "absent",
            MissReason::Malformed => "malformed",
            MissReason::Expired => "expired",
            MissReason::Invalidated => "invalidated",
        }
    }
}

/// Result of a checked read.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(T),
    Miss(MissReason),
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss(_) => None,
        }
    }
}

pub struct CacheManager {
    config: CacheConfig,
    stores: BTreeMap<CacheName, Arc<dyn CacheStore>>,
    tags: TagIndex,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    /// Build a manager with in-memory stores for every enabled cache.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::in_memory_with_clock(config, Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let mut builder = CacheManager::builder(config.clone()).clock(clock);
        for name in CacheName::ALL {
            if config.is_store_enabled(name) {
                builder = builder.store(name, Arc::new(MemoryStore::new(config.limit_non_zero(name))));
            }
        }
        builder.build()
    }

    pub fn builder(config: CacheConfig) -> CacheManagerBuilder {
        CacheManagerBuilder {
            config,
            stores: BTreeMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now(&self) -> EpochSeconds {
        self.clock.now()
    }

    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    pub fn is_enabled(&self, name: CacheName) -> bool {
        self.stores.contains_key(&name)
    }

    /// Resolve a store by name; `None` means the cache is disabled.
    pub fn store(&self, name: CacheName) -> Option<&Arc<dyn CacheStore>> {
        self.stores.get(&name)
    }

    fn require(&self, name: CacheName) -> Result<&Arc<dyn CacheStore>, CacheError> {
        self.store(name)
            .ok_or_else(|| CacheError::NotFoundCache(name.to_string()))
    }

    /// Read `key` from `name`, enforcing expiry and tag invalidation.
    ///
    /// Malformed values and effective invalidations are misses, not errors;
    /// only backend failures are returned as `Err`.
    pub async fn lookup<T>(&self, name: CacheName, key: &str) -> Result<Lookup<T>, CacheError>
    where
        T: DeserializeOwned + CacheEntry,
    {
        let store = self.require(name)?;
        self.sweep_if_due().await;

        let raw = match store.get_item(key).await {
            Ok(raw) => raw,
            Err(err) => {
                counter!(metric_names::BACKEND_ERROR, "cache" => name.as_str()).increment(1);
                return Err(err.into());
            }
        };

        let lookup = match raw {
            None => {
                self.tags.unregister(&StoreKey::new(name, key));
                Lookup::Miss(MissReason::Absent)
            }
            Some(raw) => match serde_json::from_value::<T>(raw) {
                Err(err) => {
                    debug!(cache = %name, key, error = %err, "ignoring malformed cache item");
                    Lookup::Miss(MissReason::Malformed)
                }
                Ok(item) => {
                    let now = self.now();
                    if item.is_expired(now) {
                        self.remove_quietly(name, key).await;
                        Lookup::Miss(MissReason::Expired)
                    } else if self.tags.is_invalidated(item.cache_tags(), now) {
                        self.remove_quietly(name, key).await;
                        Lookup::Miss(MissReason::Invalidated)
                    } else {
                        Lookup::Hit(item)
                    }
                }
            },
        };

        match &lookup {
            Lookup::Hit(_) => {
                counter!(metric_names::HIT, "cache" => name.as_str()).increment(1);
                debug!(cache = %name, key, outcome = "hit", "cache lookup");
            }
            Lookup::Miss(reason) => {
                counter!(metric_names::MISS, "cache" => name.as_str()).increment(1);
                debug!(cache = %name, key, outcome = "miss", reason = reason.as_str(), "cache lookup");
            }
        }
        Ok(lookup)
    }

    /// Write an item and register its tags.
    pub async fn store_item<T>(&self, name: CacheName, key: &str, item: &T) -> Result<(), CacheError>
    where
        T: Serialize + CacheEntry,
    {
        let store = self.require(name)?;
        self.sweep_if_due().await;

        let value = serde_json::to_value(item).map_err(StoreError::from)?;
        let evicted = match store.set_item(key, value).await {
            Ok(evicted) => evicted,
            Err(err) => {
                counter!(metric_names::BACKEND_ERROR, "cache" => name.as_str()).increment(1);
                return Err(err.into());
            }
        };
        if let Some(evicted) = evicted {
            self.tags.unregister(&StoreKey::new(name, evicted));
        }
        // Overwrites replace the previous item's tags.
        self.tags.unregister(&StoreKey::new(name, key));
        self.tags.register_tags(name, key, item.cache_tags());
        Ok(())
    }

    /// Raw stored value, without expiry or invalidation checks.
    pub async fn inspect(&self, name: CacheName, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.require(name)?.get_item(key).await?)
    }

    pub async fn stats(&self, name: CacheName) -> Result<StoreStats, CacheError> {
        Ok(self.require(name)?.stats().await?)
    }

    /// Delete one fully-qualified key. Absent keys are not an error.
    #[instrument(skip(self))]
    pub async fn purge_item(&self, name: CacheName, key: &str) -> Result<(), CacheError> {
        let store = self.require(name)?;
        store.remove_item(key).await?;
        self.tags.unregister(&StoreKey::new(name, key));
        counter!(metric_names::PURGE, "kind" => "item").increment(1);
        info!(cache = %name, key, "purged cache item");
        Ok(())
    }

    /// Invalidate every item carrying any of `tags`, `delay_secs` from now.
    ///
    /// With no delay the matching items are deleted before this returns.
    #[instrument(skip(self))]
    pub async fn purge_by_tags(&self, tags: &[String], delay_secs: u64) {
        let delay = i64::try_from(delay_secs).unwrap_or(i64::MAX);
        let effective_at = self.now().saturating_add(delay);
        self.tags.schedule(tags, effective_at);
        counter!(metric_names::PURGE, "kind" => "tags").increment(1);
        info!(tag_count = tags.len(), delay_secs, effective_at, "scheduled tag invalidation");

        if delay_secs == 0 {
            self.sweep_due().await;
        }
    }

    /// Clear every named store and the whole index.
    #[instrument(skip(self))]
    pub async fn purge_all(&self) {
        let cleared = join_all(
            self.stores
                .iter()
                .map(|(name, store)| async move { (*name, store.clear().await) }),
        )
        .await;
        for (name, result) in cleared {
            if let Err(err) = result {
                warn!(cache = %name, error = %err, "failed to clear cache store");
            }
        }
        self.tags.clear();
        counter!(metric_names::PURGE, "kind" => "all").increment(1);
        info!("purged all caches");
    }

    /// Physically delete everything whose invalidation is effective now.
    ///
    /// Returns the number of keys released from the index.
    pub async fn sweep_due(&self) -> usize {
        let started_at = Instant::now();
        let due = self.tags.take_due(self.now());
        if due.is_empty() {
            return 0;
        }

        for store_key in &due.keys {
            self.remove_quietly(store_key.cache, &store_key.key).await;
        }

        info!(
            tags = ?due.tags,
            keys = due.keys.len(),
            "applied due tag invalidations"
        );
        histogram!(metric_names::SWEEP_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        due.keys.len()
    }

    async fn sweep_if_due(&self) {
        if self.tags.has_due(self.now()) {
            self.sweep_due().await;
        }
    }

    async fn remove_quietly(&self, name: CacheName, key: &str) {
        let Some(store) = self.store(name) else {
            return;
        };
        if let Err(err) = store.remove_item(key).await {
            counter!(metric_names::BACKEND_ERROR, "cache" => name.as_str()).increment(1);
            debug!(cache = %name, key, error = %err, "failed to delete invalidated item");
        }
        self.tags.unregister(&StoreKey::new(name, key));
    }
}

pub struct CacheManagerBuilder {
    config: CacheConfig,
    stores: BTreeMap<CacheName, Arc<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
}

impl CacheManagerBuilder {
    /// Attach a backend for `name`. Ignored when the cache is disabled.
    pub fn store(mut self, name: CacheName, store: Arc<dyn CacheStore>) -> Self {
        if self.config.is_store_enabled(name) {
            self.stores.insert(name, store);
        }
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> CacheManager {
        CacheManager {
            config: self.config,
            stores: self.stores,
            tags: TagIndex::new(),
            clock: self.clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cache::expiry::ManualClock;
    use crate::cache::item::{CacheItem, RouteCacheItem};

    fn manager() -> (CacheManager, ManualClock) {
        let clock = ManualClock::new(1_000);
        let manager =
            CacheManager::in_memory_with_clock(CacheConfig::default(), Arc::new(clock.clone()));
        (manager, clock)
    }

    async fn read(manager: &CacheManager, key: &str) -> Option<CacheItem> {
        manager
            .lookup::<CacheItem>(CacheName::Data, key)
            .await
            .unwrap()
            .into_option()
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let (manager, _) = manager();
        let item = CacheItem::new(json!({ "title": "A" })).with_tags(["t1", "t2"]);
        manager.store_item(CacheName::Data, "k1", &item).await.unwrap();

        let cached = read(&manager, "k1").await.unwrap();
        assert_eq!(cached, item);
    }

    #[tokio::test]
    async fn expired_items_are_misses() {
        let (manager, clock) = manager();
        let item = CacheItem::new(json!("A")).with_max_age(clock.now(), 10);
        manager.store_item(CacheName::Data, "k1", &item).await.unwrap();

        assert!(read(&manager, "k1").await.is_some());
        clock.advance(10);
        let lookup = manager.lookup::<CacheItem>(CacheName::Data, "k1").await.unwrap();
        assert!(matches!(lookup, Lookup::Miss(MissReason::Expired)));
    }

    #[tokio::test]
    async fn past_expiry_is_a_miss_regardless_of_data() {
        let (manager, _) = manager();
        let store = manager.store(CacheName::Data).unwrap();
        store
            .set_item("k1", json!({ "data": "still here", "expires": 5 }))
            .await
            .unwrap();
        assert!(read(&manager, "k1").await.is_none());
    }

    #[tokio::test]
    async fn malformed_items_are_misses() {
        let (manager, _) = manager();
        let store = manager.store(CacheName::Route).unwrap();
        store.set_item("/page", json!("<html></html>")).await.unwrap();

        let lookup = manager
            .lookup::<RouteCacheItem>(CacheName::Route, "/page")
            .await
            .unwrap();
        assert!(matches!(lookup, Lookup::Miss(MissReason::Malformed)));
    }

    #[tokio::test]
    async fn immediate_tag_purge_deletes_items() {
        let (manager, _) = manager();
        let item = CacheItem::new(json!("A")).with_tags(["t1"]);
        manager.store_item(CacheName::Data, "k1", &item).await.unwrap();
        manager
            .store_item(CacheName::Data, "k2", &CacheItem::new(json!("B")).with_tags(["t2"]))
            .await
            .unwrap();
        assert_eq!(read(&manager, "k1").await.unwrap().data, json!("A"));

        manager.purge_by_tags(&["t1".to_string()], 0).await;

        assert!(read(&manager, "k1").await.is_none());
        assert!(manager.inspect(CacheName::Data, "k1").await.unwrap().is_none());
        assert!(read(&manager, "k2").await.is_some());
    }

    #[tokio::test]
    async fn delayed_tag_purge_respects_grace_period() {
        let (manager, clock) = manager();
        let item = CacheItem::new(json!("A")).with_tags(["t1"]);
        manager.store_item(CacheName::Data, "k1", &item).await.unwrap();

        manager.purge_by_tags(&["t1".to_string()], 5).await;

        clock.advance(2);
        assert!(read(&manager, "k1").await.is_some());

        clock.advance(4);
        assert!(read(&manager, "k1").await.is_none());
        assert_eq!(manager.tags().pending_count(), 0);
    }

    #[tokio::test]
    async fn items_written_after_sweep_are_not_invalidated() {
        let (manager, _) = manager();
        manager.purge_by_tags(&["t1".to_string()], 0).await;

        let item = CacheItem::new(json!("fresh")).with_tags(["t1"]);
        manager.store_item(CacheName::Data, "k1", &item).await.unwrap();
        assert!(read(&manager, "k1").await.is_some());
    }

    #[tokio::test]
    async fn sweep_removes_due_items_across_stores() {
        let (manager, clock) = manager();
        let tagged = |data: &str| CacheItem::new(json!(data)).with_tags(["shared"]);
        manager.store_item(CacheName::Data, "d", &tagged("d")).await.unwrap();
        manager.store_item(CacheName::Component, "c", &tagged("c")).await.unwrap();

        manager.purge_by_tags(&["shared".to_string()], 3).await;
        assert_eq!(manager.sweep_due().await, 0);

        clock.advance(3);
        assert_eq!(manager.sweep_due().await, 2);
        assert!(manager.inspect(CacheName::Data, "d").await.unwrap().is_none());
        assert!(manager.inspect(CacheName::Component, "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_all_is_idempotent() {
        let (manager, _) = manager();
        let item = CacheItem::new(json!("A")).with_tags(["t1"]);
        manager.store_item(CacheName::Data, "k1", &item).await.unwrap();
        manager.purge_by_tags(&["t1".to_string()], 60).await;

        manager.purge_all().await;
        let once = manager.stats(CacheName::Data).await.unwrap().count;
        manager.purge_all().await;
        let twice = manager.stats(CacheName::Data).await.unwrap().count;

        assert_eq!(once, 0);
        assert_eq!(twice, 0);
        assert_eq!(manager.tags().key_count(), 0);
        assert_eq!(manager.tags().pending_count(), 0);
    }

    #[tokio::test]
    async fn purge_item_tolerates_missing_key() {
        let (manager, _) = manager();
        assert!(manager.purge_item(CacheName::Data, "missing").await.is_ok());
    }

    #[tokio::test]
    async fn disabled_store_is_not_found() {
        let config = CacheConfig {
            enable_component: false,
            ..Default::default()
        };
        let manager = CacheManager::in_memory(config);
        assert!(!manager.is_enabled(CacheName::Component));

        let err = manager
            .purge_item(CacheName::Component, "k")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFoundCache(name) if name == "component"));
    }

    #[tokio::test]
    async fn tag_index_follows_store_evictions_and_expiry() {
        let clock = ManualClock::new(1_000);
        let config = CacheConfig {
            data_limit: 1,
            ..Default::default()
        };
        let manager = CacheManager::in_memory_with_clock(config, Arc::new(clock.clone()));

        for i in 0..1000 {
            let item = CacheItem::new(json!(i))
                .with_tags(["t"])
                .with_max_age(clock.now(), 1);
            manager
                .store_item(CacheName::Data, &format!("k{i}"), &item)
                .await
                .unwrap();
        }
        assert_eq!(manager.stats(CacheName::Data).await.unwrap().count, 1);
        assert_eq!(manager.tags().key_count(), 1);
        assert_eq!(manager.tags().keys_for_tag("t").len(), 1);

        clock.advance(10);
        let lookup = manager.lookup::<CacheItem>(CacheName::Data, "k999").await.unwrap();
        assert!(matches!(lookup, Lookup::Miss(MissReason::Expired)));
        assert_eq!(manager.tags().key_count(), 0);
        assert_eq!(manager.tags().tag_count(), 0);
        assert!(manager.inspect(CacheName::Data, "k999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn absent_items_are_dropped_from_tag_index() {
        let (manager, _) = manager();
        let item = CacheItem::new(json!("A")).with_tags(["t1"]);
        manager.store_item(CacheName::Data, "k1", &item).await.unwrap();

        // Removed behind the manager's back, as an external backend might.
        let store = manager.store(CacheName::Data).unwrap();
        store.remove_item("k1").await.unwrap();

        assert!(read(&manager, "k1").await.is_none());
        assert_eq!(manager.tags().key_count(), 0);
    }

    #[tokio::test]
    async fn overwrite_replaces_registered_tags() {
        let (manager, _) = manager();
        let first = CacheItem::new(json!("A")).with_tags(["old"]);
        manager.store_item(CacheName::Data, "k1", &first).await.unwrap();
        let second = CacheItem::new(json!("B")).with_tags(["new"]);
        manager.store_item(CacheName::Data, "k1", &second).await.unwrap();

        assert!(manager.tags().keys_for_tag("old").is_empty());
        assert_eq!(manager.tags().keys_for_tag("new").len(), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get_item(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
        async fn set_item(&self, _key: &str, _value: Value) -> Result<Option<String>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
        async fn remove_item(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
        async fn keys(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[tokio::test]
    async fn backend_failures_surface_as_store_errors() {
        let manager = CacheManager::builder(CacheConfig::default())
            .store(CacheName::Data, Arc::new(FailingStore))
            .build();

        let err = manager
            .lookup::<CacheItem>(CacheName::Data, "k")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));

        // Clearing a failing backend is logged, not propagated.
        manager.purge_all().await;
    }
}
