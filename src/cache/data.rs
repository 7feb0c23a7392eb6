//! Get-or-populate access to a named store.
//!
//! ```ignore
//! let entry = DataCache::data().with_cache::<Weather>("weather:berlin", None).await;
//! if let Some(weather) = entry.value {
//!     return weather;
//! }
//! let weather = fetch_weather().await?;
//! entry.add_to_cache(&weather, ["weather"], Some(600)).await;
//! ```
//!
//! Caching never breaks the work it accelerates: when no context is
//! available, or the backend fails, the entry simply has no value and
//! `add_to_cache` quietly does nothing.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::context::CacheContext;
use super::expiry::EpochSeconds;
use super::item::CacheItem;
use super::keys::CacheName;
use super::manager::{CacheManager, Lookup};
use super::scope;

/// Typed facade over one named store.
#[derive(Debug, Clone, Copy)]
pub struct DataCache {
    name: CacheName,
}

impl DataCache {
    pub const fn data() -> Self {
        Self::for_store(CacheName::Data)
    }

    pub const fn for_store(name: CacheName) -> Self {
        Self { name }
    }

    /// Look up `key` under the request's prefix.
    ///
    /// Uses `context` when given, otherwise the ambient request scope.
    pub async fn with_cache<T>(&self, key: &str, context: Option<&CacheContext>) -> DataCacheEntry<T>
    where
        T: DeserializeOwned,
    {
        let ambient;
        let context = match context {
            Some(context) => context,
            None => match scope::current_context() {
                Some(found) => {
                    ambient = found;
                    ambient.as_ref()
                }
                None => return DataCacheEntry::disabled(),
            },
        };

        let Some(handle) = context.store(self.name) else {
            return DataCacheEntry::disabled();
        };

        let full_key = context.full_key(key);
        let target = Some(Target {
            manager: Arc::clone(context.manager()),
            name: self.name,
            full_key: full_key.clone(),
        });

        match handle.get::<CacheItem<T>>(&full_key).await {
            Ok(Lookup::Hit(item)) => DataCacheEntry {
                value: Some(item.data),
                cache_tags: item.cache_tags,
                expires: item.expires,
                target,
                _marker: PhantomData,
            },
            Ok(Lookup::Miss(_)) => DataCacheEntry::empty(target),
            Err(err) => {
                debug!(cache = %self.name, key = %full_key, error = %err, "cache read failed; treating as miss");
                DataCacheEntry::empty(target)
            }
        }
    }
}

/// Shorthand for `DataCache::data().with_cache(key, context)`.
pub async fn with_data_cache<T>(key: &str, context: Option<&CacheContext>) -> DataCacheEntry<T>
where
    T: DeserializeOwned,
{
    DataCache::data().with_cache(key, context).await
}

struct Target {
    manager: Arc<CacheManager>,
    name: CacheName,
    full_key: String,
}

/// Result of a facade lookup plus the means to populate the slot.
pub struct DataCacheEntry<T> {
    pub value: Option<T>,
    pub cache_tags: Vec<String>,
    pub expires: Option<EpochSeconds>,
    target: Option<Target>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataCacheEntry<T> {
    fn disabled() -> Self {
        Self::empty(None)
    }

    fn empty(target: Option<Target>) -> Self {
        Self {
            value: None,
            cache_tags: Vec::new(),
            expires: None,
            target,
            _marker: PhantomData,
        }
    }

    /// False when caching is unavailable for this execution context.
    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }
}

impl<T> DataCacheEntry<T>
where
    T: Serialize,
{
    /// Store `data` under the entry's key. `max_age` sets an expiry relative
    /// to now; without it, or with zero, the item only goes away by purge or
    /// eviction.
    pub async fn add_to_cache<I, S>(&self, data: &T, tags: I, max_age: Option<u64>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(target) = &self.target else {
            return;
        };

        let mut item = CacheItem::new(data).with_tags(tags);
        if let Some(max_age) = max_age.filter(|&secs| secs > 0) {
            item = item.with_max_age(target.manager.now(), max_age);
        }

        if let Err(err) = target
            .manager
            .store_item(target.name, &target.full_key, &item)
            .await
        {
            debug!(cache = %target.name, key = %target.full_key, error = %err, "cache write failed");
        }
    }

    /// Return the cached value, or run `populate`, cache its output and return it.
    pub async fn get_or_populate<F, Fut, E, I, S>(
        self,
        tags: I,
        max_age: Option<u64>,
        populate: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(value) = self.value {
            return Ok(value);
        }
        let value = populate().await?;
        let entry = DataCacheEntry::<T> {
            value: None,
            cache_tags: Vec::new(),
            expires: None,
            target: self.target,
            _marker: PhantomData,
        };
        entry.add_to_cache(&value, tags, max_age).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::error::StoreError;
    use crate::cache::expiry::ManualClock;
    use crate::cache::route::RouteCacheHelper;
    use crate::cache::store::CacheStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Weather {
        city: String,
        celsius: i32,
    }

    fn berlin() -> Weather {
        Weather {
            city: "Berlin".to_string(),
            celsius: 21,
        }
    }

    fn context_with_clock(clock: ManualClock) -> CacheContext {
        let manager = CacheManager::in_memory_with_clock(CacheConfig::default(), Arc::new(clock));
        CacheContext::new(Arc::new(manager), "tenant")
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let context = context_with_clock(ManualClock::new(0));

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert!(entry.value.is_none());
        assert!(entry.is_enabled());
        entry.add_to_cache(&berlin(), ["weather"], None).await;

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert_eq!(entry.value, Some(berlin()));
        assert_eq!(entry.cache_tags, vec!["weather"]);
        assert_eq!(entry.expires, None);

        let raw = context
            .manager()
            .inspect(CacheName::Data, "tenant--weather")
            .await
            .unwrap();
        assert!(raw.is_some());
    }

    #[tokio::test]
    async fn max_age_sets_expiry_and_expires() {
        let clock = ManualClock::new(100);
        let context = context_with_clock(clock.clone());

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        entry.add_to_cache(&berlin(), Vec::<String>::new(), Some(30)).await;

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert_eq!(entry.expires, Some(130));

        clock.advance(30);
        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert!(entry.value.is_none());
        assert!(entry.cache_tags.is_empty());
    }

    #[tokio::test]
    async fn zero_max_age_means_no_expiry() {
        let clock = ManualClock::new(100);
        let context = context_with_clock(clock.clone());

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        entry.add_to_cache(&berlin(), ["weather"], Some(0)).await;

        clock.advance(3600);
        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert_eq!(entry.value, Some(berlin()));
        assert_eq!(entry.expires, None);
    }

    #[tokio::test]
    async fn malformed_value_is_a_miss() {
        let context = context_with_clock(ManualClock::new(0));
        context
            .manager()
            .store(CacheName::Data)
            .unwrap()
            .set_item("tenant--weather", json!({ "data": "not weather" }))
            .await
            .unwrap();

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert!(entry.value.is_none());
        assert!(entry.is_enabled());
    }

    #[tokio::test]
    async fn without_context_add_to_cache_is_a_no_op() {
        let entry = with_data_cache::<Weather>("weather", None).await;
        assert!(entry.value.is_none());
        assert!(!entry.is_enabled());
        entry.add_to_cache(&berlin(), ["weather"], Some(10)).await;
    }

    #[tokio::test]
    async fn ambient_scope_is_used_when_no_context_given() {
        let context = Arc::new(context_with_clock(ManualClock::new(0)));
        let cache = scope::RequestCache {
            context: Arc::clone(&context),
            route: Arc::new(RouteCacheHelper::new()),
        };

        scope::scope(cache, async {
            let entry = with_data_cache::<Weather>("weather", None).await;
            assert!(entry.is_enabled());
            entry.add_to_cache(&berlin(), ["weather"], None).await;
        })
        .await;

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert_eq!(entry.value, Some(berlin()));
    }

    #[tokio::test]
    async fn disabled_store_yields_disabled_entry() {
        let config = CacheConfig {
            enable_data: false,
            ..Default::default()
        };
        let context = CacheContext::new(Arc::new(CacheManager::in_memory(config)), "");
        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert!(!entry.is_enabled());
    }

    #[tokio::test]
    async fn component_store_is_reachable_through_the_facade() {
        let context = context_with_clock(ManualClock::new(0));
        let fragments = DataCache::for_store(CacheName::Component);

        let entry = fragments.with_cache::<String>("Teaser::7", Some(&context)).await;
        entry.add_to_cache(&"<div>teaser</div>".to_string(), ["article:7"], None).await;

        let entry = fragments.with_cache::<String>("Teaser::7", Some(&context)).await;
        assert_eq!(entry.value.as_deref(), Some("<div>teaser</div>"));
    }

    #[tokio::test]
    async fn get_or_populate_runs_populate_once() {
        let context = context_with_clock(ManualClock::new(0));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
            let value = entry
                .get_or_populate(["weather"], None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(berlin())
                })
                .await
                .unwrap();
            assert_eq!(value, berlin());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get_item(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Err(StoreError::unavailable("timeout"))
        }
        async fn set_item(&self, _key: &str, _value: Value) -> Result<Option<String>, StoreError> {
            Err(StoreError::unavailable("timeout"))
        }
        async fn remove_item(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::unavailable("timeout"))
        }
        async fn keys(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn backend_failures_degrade_to_no_value() {
        let manager = CacheManager::builder(CacheConfig::default())
            .store(CacheName::Data, Arc::new(BrokenStore))
            .build();
        let context = CacheContext::new(Arc::new(manager), "");

        let entry = with_data_cache::<Weather>("weather", Some(&context)).await;
        assert!(entry.value.is_none());
        assert!(entry.is_enabled());
        entry.add_to_cache(&berlin(), ["weather"], None).await;
    }
}
