use thiserror::Error;

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode cache item: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// The named cache does not exist or was not enabled.
    #[error("the given cache \"{0}\" is not available")]
    UnknownCacheStore(String),
    /// An admin action targeted a cache that is not enabled in this process.
    #[error("cache \"{0}\" is not enabled")]
    NotFoundCache(String),
    #[error("failed to resolve cache key prefix: {0}")]
    KeyPrefix(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
