//! Wire types for the multicache management API.
//!
//! Shared between the server and any client that drives purges or reads
//! statistics, so both sides agree on the JSON shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST {prefix}/purge/tags`: a plain JSON list of tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurgeTagsRequest {
    pub tags: Vec<String>,
}

/// Body of `POST {prefix}/purge/{cacheName}`.
///
/// Accepts either a single key (`"page--/about"`) or a list of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PurgeKeysRequest {
    One(String),
    Many(Vec<String>),
}

impl PurgeKeysRequest {
    pub fn into_keys(self) -> Vec<String> {
        match self {
            Self::One(key) => vec![key],
            Self::Many(keys) => keys,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub status: String,
    /// Tags or keys the purge was applied to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purged: Vec<String>,
}

impl PurgeResponse {
    pub fn ok(purged: Vec<String>) -> Self {
        Self {
            status: "OK".to_string(),
            purged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub cache: String,
    pub count: usize,
    /// Backend-specific details (capacity, backend kind, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectResponse {
    /// The raw stored item, or `null` when the key is absent.
    pub item: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectQuery {
    pub key: Option<String>,
}
