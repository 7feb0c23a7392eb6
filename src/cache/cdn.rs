//! CDN header emission.
//!
//! Handlers never write these headers themselves; they contribute to the
//! request's `RouteCacheHelper` and the response layer renders the resolved
//! decision here.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use super::route::RouteCacheDecision;

pub const DEFAULT_CDN_CONTROL_HEADER: &str = "surrogate-control";
pub const DEFAULT_CDN_TAG_HEADER: &str = "cache-tag";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnHeaders {
    pub cache_control_header: HeaderName,
    pub cache_tag_header: HeaderName,
}

impl Default for CdnHeaders {
    fn default() -> Self {
        Self {
            cache_control_header: HeaderName::from_static(DEFAULT_CDN_CONTROL_HEADER),
            cache_tag_header: HeaderName::from_static(DEFAULT_CDN_TAG_HEADER),
        }
    }
}

impl CdnHeaders {
    pub fn new(cache_control_header: HeaderName, cache_tag_header: HeaderName) -> Self {
        Self {
            cache_control_header,
            cache_tag_header,
        }
    }

    /// Write the cache-control and cache-tag headers for `decision`.
    ///
    /// Empty values are not emitted.
    pub fn apply(&self, decision: &RouteCacheDecision, headers: &mut HeaderMap) {
        if let Some(value) = cache_control_value(decision) {
            insert(headers, &self.cache_control_header, &value);
        }
        if !decision.tags.is_empty() {
            let value = decision.tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
            insert(headers, &self.cache_tag_header, &value);
        }
    }
}

/// Directives joined with `, `, plus `max-age` when one was proposed and no
/// contributor set it explicitly.
pub fn cache_control_value(decision: &RouteCacheDecision) -> Option<String> {
    let mut parts: Vec<String> = decision.cache_control.iter().cloned().collect();
    let explicit_max_age = parts.iter().any(|part| part.starts_with("max-age"));
    if let (Some(max_age), false) = (decision.max_age, explicit_max_age) {
        parts.push(format!("max-age={max_age}"));
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn insert(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name.clone(), value);
        }
        Err(err) => {
            debug!(header = %name, error = %err, "skipping CDN header with invalid value");
        }
    }
}
