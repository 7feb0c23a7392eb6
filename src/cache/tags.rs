//! Tag invalidation index.
//!
//! Tracks tag → keys and key → tags so a tag purge never has to scan a
//! store, and records delayed invalidations that only become effective after
//! a grace period.
//!
//! The index is a hint: a key listed under a tag may already be gone from its
//! store, so everything derived from it must tolerate missing keys.

use std::collections::{BTreeSet, HashSet};

use dashmap::DashMap;

use super::expiry::EpochSeconds;
use super::keys::{CacheName, StoreKey};

/// A delayed purge of one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInvalidation {
    pub effective_at: EpochSeconds,
}

/// Keys released by invalidations that have become effective.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DueInvalidations {
    pub tags: BTreeSet<String>,
    pub keys: BTreeSet<StoreKey>,
}

impl DueInvalidations {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Process-wide tag index shared by every request.
///
/// Updates are per-tag merges on sharded maps, so concurrent registrations
/// from different requests are additive and never lose each other's writes.
#[derive(Default)]
pub struct TagIndex {
    tag_to_keys: DashMap<String, HashSet<StoreKey>>,
    key_to_tags: DashMap<StoreKey, HashSet<String>>,
    pending: DashMap<String, PendingInvalidation>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` in `cache` carries `tags`.
    pub fn register_tags(&self, cache: CacheName, key: &str, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let store_key = StoreKey::new(cache, key);
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(store_key.clone());
        }
        self.key_to_tags
            .entry(store_key)
            .or_default()
            .extend(tags.iter().cloned());
    }

    /// Schedule `tags` for invalidation at `effective_at`.
    ///
    /// A tag that is already pending keeps its earlier deadline, so repeated
    /// purges of a hot tag cannot postpone invalidation indefinitely.
    pub fn schedule(&self, tags: &[String], effective_at: EpochSeconds) {
        for tag in tags {
            self.pending
                .entry(tag.clone())
                .and_modify(|pending| {
                    pending.effective_at = pending.effective_at.min(effective_at);
                })
                .or_insert(PendingInvalidation { effective_at });
        }
    }

    /// True when any of `tags` has an invalidation that is already effective.
    pub fn is_invalidated(&self, tags: &[String], now: EpochSeconds) -> bool {
        tags.iter().any(|tag| {
            self.pending
                .get(tag)
                .is_some_and(|pending| pending.effective_at <= now)
        })
    }

    pub fn has_due(&self, now: EpochSeconds) -> bool {
        self.pending
            .iter()
            .any(|entry| entry.value().effective_at <= now)
    }

    pub fn pending(&self, tag: &str) -> Option<PendingInvalidation> {
        self.pending.get(tag).map(|entry| *entry.value())
    }

    /// Remove every invalidation that is effective at `now` and hand back the
    /// keys registered under those tags for physical deletion.
    pub fn take_due(&self, now: EpochSeconds) -> DueInvalidations {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().effective_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut released = DueInvalidations::default();
        for tag in due {
            if self
                .pending
                .remove_if(&tag, |_, pending| pending.effective_at <= now)
                .is_none()
            {
                continue;
            }
            if let Some((_, keys)) = self.tag_to_keys.remove(&tag) {
                released.keys.extend(keys);
            }
            released.tags.insert(tag);
        }

        for store_key in &released.keys {
            self.unregister(store_key);
        }
        released
    }

    /// Forget a key, cleaning up every tag that pointed at it.
    pub fn unregister(&self, store_key: &StoreKey) {
        let Some((_, tags)) = self.key_to_tags.remove(store_key) else {
            return;
        };
        for tag in tags {
            self.tag_to_keys.remove_if_mut(&tag, |_, keys| {
                keys.remove(store_key);
                keys.is_empty()
            });
        }
    }

    /// Keys currently registered under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> HashSet<StoreKey> {
        self.tag_to_keys
            .get(tag)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    /// Drop all mappings and every pending invalidation.
    pub fn clear(&self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
        self.pending.clear();
    }

    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
