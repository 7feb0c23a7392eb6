//! Named caches and key composition.

use std::fmt;
use std::str::FromStr;

use super::error::CacheError;

/// Joins a request's key prefix and a caller key.
pub const KEY_SEPARATOR: &str = "--";

/// The named caches a process can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheName {
    /// Full rendered responses, keyed by request path.
    Route,
    /// Arbitrary data fetched during a request.
    Data,
    /// Rendered fragments.
    Component,
}

impl CacheName {
    pub const ALL: [CacheName; 3] = [CacheName::Route, CacheName::Data, CacheName::Component];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheName::Route => "route",
            CacheName::Data => "data",
            CacheName::Component => "component",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheName {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "route" => Ok(CacheName::Route),
            "data" => Ok(CacheName::Data),
            "component" => Ok(CacheName::Component),
            other => Err(CacheError::UnknownCacheStore(other.to_string())),
        }
    }
}

/// A fully-qualified key inside one named cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    pub cache: CacheName,
    pub key: String,
}

impl StoreKey {
    pub fn new(cache: CacheName, key: impl Into<String>) -> Self {
        Self {
            cache,
            key: key.into(),
        }
    }
}

/// `prefix + "--" + key`, or the bare key when there is no prefix.
pub fn key_with_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{KEY_SEPARATOR}{key}")
    }
}
