//! Per-request cache context.
//!
//! Bundles handles to the enabled named stores with the key prefix resolved
//! for the current request. Created once per request by the context layer
//! and attached to the request extensions as `Arc<CacheContext>`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::cdn::CdnHeaders;
use super::error::CacheError;
use super::item::CacheEntry;
use super::keys::{CacheName, key_with_prefix};
use super::manager::{CacheManager, Lookup};

/// Computes the key prefix for a request (for example a tenant or locale).
///
/// A failure aborts the request: serving under the wrong prefix would leak
/// entries across tenants.
#[async_trait]
pub trait KeyPrefixResolver: Send + Sync {
    async fn resolve(&self, parts: &Parts) -> Result<String, CacheError>;
}

#[async_trait]
impl<F> KeyPrefixResolver for F
where
    F: Fn(&Parts) -> Result<String, CacheError> + Send + Sync,
{
    async fn resolve(&self, parts: &Parts) -> Result<String, CacheError> {
        self(parts)
    }
}

/// Decides whether caching applies to a request at all.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    async fn enabled_for_request(&self, parts: &Parts) -> bool;
}

#[async_trait]
impl<F> RequestFilter for F
where
    F: Fn(&Parts) -> bool + Send + Sync,
{
    async fn enabled_for_request(&self, parts: &Parts) -> bool {
        self(parts)
    }
}

pub struct CacheContext {
    manager: Arc<CacheManager>,
    cache_key_prefix: String,
}

impl CacheContext {
    pub fn new(manager: Arc<CacheManager>, cache_key_prefix: impl Into<String>) -> Self {
        Self {
            manager,
            cache_key_prefix: cache_key_prefix.into(),
        }
    }

    /// Return the context already attached to the request, or build and
    /// attach a new one.
    pub async fn load(
        parts: &mut Parts,
        manager: &Arc<CacheManager>,
    ) -> Result<Arc<CacheContext>, CacheError> {
        if let Some(existing) = parts.extensions.get::<Arc<CacheContext>>() {
            return Ok(Arc::clone(existing));
        }

        let config = manager.config();
        let prefix = match &config.key_prefix_resolver {
            Some(resolver) => resolver.resolve(parts).await?,
            None => config.key_prefix.clone(),
        };

        let context = Arc::new(CacheContext::new(Arc::clone(manager), prefix));
        parts.extensions.insert(Arc::clone(&context));
        Ok(context)
    }

    pub fn cache_key_prefix(&self) -> &str {
        &self.cache_key_prefix
    }

    pub fn full_key(&self, key: &str) -> String {
        key_with_prefix(&self.cache_key_prefix, key)
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn cdn(&self) -> Option<&CdnHeaders> {
        self.manager.config().cdn.as_ref()
    }

    /// Handle to a named store; `None` means the feature is disabled.
    pub fn store(&self, name: CacheName) -> Option<StoreHandle<'_>> {
        self.manager.is_enabled(name).then_some(StoreHandle {
            manager: &self.manager,
            name,
        })
    }

    pub fn route(&self) -> Option<StoreHandle<'_>> {
        self.store(CacheName::Route)
    }

    pub fn data(&self) -> Option<StoreHandle<'_>> {
        self.store(CacheName::Data)
    }

    pub fn component(&self) -> Option<StoreHandle<'_>> {
        self.store(CacheName::Component)
    }
}

/// Borrowed view of one enabled named store. Keys are fully qualified.
#[derive(Clone, Copy)]
pub struct StoreHandle<'a> {
    manager: &'a Arc<CacheManager>,
    name: CacheName,
}

impl StoreHandle<'_> {
    pub fn name(&self) -> CacheName {
        self.name
    }

    pub async fn get<T>(&self, key: &str) -> Result<Lookup<T>, CacheError>
    where
        T: DeserializeOwned + CacheEntry,
    {
        self.manager.lookup(self.name, key).await
    }

    pub async fn set<T>(&self, key: &str, item: &T) -> Result<(), CacheError>
    where
        T: Serialize + CacheEntry,
    {
        self.manager.store_item(self.name, key, item).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.manager.purge_item(self.name, key).await
    }
}
