//! Storage capability consumed by the cache layer, plus the in-memory backend.
//!
//! The core only needs get/set/remove on opaque JSON values. Anything that can
//! do that (memory, disk, a remote key-value service) can back a named cache.

use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;
use serde_json::{Map, Value, json};

use super::error::StoreError;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Count plus whatever the backend wants to report about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub count: usize,
    pub metadata: Map<String, Value>,
}

/// Async key-value capability backing one named cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Returns the key the backend dropped to make room, if any, so the
    /// caller can forget it.
    async fn set_item(&self, key: &str, value: Value) -> Result<Option<String>, StoreError>;

    /// Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError> {
        for key in self.keys().await? {
            self.remove_item(&key).await?;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            count: self.keys().await?.len(),
            metadata: Map::new(),
        })
    }
}

/// Bounded in-memory store with LRU eviction.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, Value>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        // `get` bumps recency, so it needs the write half.
        Ok(rw_write(&self.entries, SOURCE, "get_item").get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<Option<String>, StoreError> {
        let displaced = rw_write(&self.entries, SOURCE, "set_item").push(key.to_string(), value);
        // `push` also hands back the old value when `key` was overwritten.
        Ok(displaced
            .map(|(evicted, _)| evicted)
            .filter(|evicted| evicted != key))
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "remove_item").pop(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "clear").clear();
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let entries = rw_read(&self.entries, SOURCE, "stats");
        let mut metadata = Map::new();
        metadata.insert("backend".to_string(), json!("memory"));
        metadata.insert("capacity".to_string(), json!(entries.cap().get()));
        Ok(StoreStats {
            count: entries.len(),
            metadata,
        })
    }
}
