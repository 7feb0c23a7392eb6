//! Stored item shapes.
//!
//! Items are persisted as JSON so any backend that can hold a
//! `serde_json::Value` can hold them. Field names follow the camelCase wire
//! format so entries stay inspectable through the management API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::expiry::{EpochSeconds, ExpiryPolicy};

/// Tag and expiry accessors every stored item exposes, whatever its payload.
pub trait CacheEntry {
    fn cache_tags(&self) -> &[String];
    fn expires(&self) -> Option<EpochSeconds>;

    fn is_expired(&self, now: EpochSeconds) -> bool {
        ExpiryPolicy::is_expired(self.expires(), now)
    }
}

/// A cached value with its tags and optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem<T = Value> {
    pub data: T,
    #[serde(default)]
    pub cache_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<EpochSeconds>,
}

impl<T> CacheItem<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cache_tags: Vec::new(),
            expires: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_tags = dedup_tags(tags);
        self
    }

    /// Set `expires` to `now + max_age`.
    pub fn with_max_age(mut self, now: EpochSeconds, max_age: u64) -> Self {
        self.expires = Some(ExpiryPolicy::expires_at(now, max_age));
        self
    }
}

impl<T> CacheEntry for CacheItem<T> {
    fn cache_tags(&self) -> &[String] {
        &self.cache_tags
    }

    fn expires(&self) -> Option<EpochSeconds> {
        self.expires
    }
}

/// A full response captured for verbatim replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCacheItem {
    pub data: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub cache_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<EpochSeconds>,
}

impl CacheEntry for RouteCacheItem {
    fn cache_tags(&self) -> &[String] {
        &self.cache_tags
    }

    fn expires(&self) -> Option<EpochSeconds> {
        self.expires
    }
}

/// Tag order carries no meaning; duplicates are dropped, first occurrence wins.
pub(crate) fn dedup_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.into();
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
