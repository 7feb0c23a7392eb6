//! Cache configuration.
//!
//! File-backed values come from the `[cache]` and `[cdn]` sections of
//! `multicache.toml`. Per-request hooks that cannot live in a file are
//! attached programmatically and resolved once at startup.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;

use super::cdn::CdnHeaders;
use super::context::{KeyPrefixResolver, RequestFilter};
use super::keys::CacheName;

const DEFAULT_ROUTE_LIMIT: usize = 500;
const DEFAULT_DATA_LIMIT: usize = 1000;
const DEFAULT_COMPONENT_LIMIT: usize = 1000;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

#[derive(Clone)]
pub struct CacheConfig {
    pub enable_route: bool,
    pub enable_data: bool,
    pub enable_component: bool,
    /// Maximum entries in the in-memory route store.
    pub route_limit: usize,
    /// Maximum entries in the in-memory data store.
    pub data_limit: usize,
    /// Maximum entries in the in-memory component store.
    pub component_limit: usize,
    /// Static key prefix, used when no resolver is installed.
    pub key_prefix: String,
    /// Largest response body captured into the route cache.
    pub max_body_bytes: usize,
    /// How often due tag invalidations are physically applied.
    pub sweep_interval: Duration,
    /// CDN header emission; `None` disables it.
    pub cdn: Option<CdnHeaders>,
    pub key_prefix_resolver: Option<Arc<dyn KeyPrefixResolver>>,
    pub request_filter: Option<Arc<dyn RequestFilter>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_route: true,
            enable_data: true,
            enable_component: true,
            route_limit: DEFAULT_ROUTE_LIMIT,
            data_limit: DEFAULT_DATA_LIMIT,
            component_limit: DEFAULT_COMPONENT_LIMIT,
            key_prefix: String::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            cdn: None,
            key_prefix_resolver: None,
            request_filter: None,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("enable_route", &self.enable_route)
            .field("enable_data", &self.enable_data)
            .field("enable_component", &self.enable_component)
            .field("route_limit", &self.route_limit)
            .field("data_limit", &self.data_limit)
            .field("component_limit", &self.component_limit)
            .field("key_prefix", &self.key_prefix)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("sweep_interval", &self.sweep_interval)
            .field("cdn", &self.cdn)
            .field("key_prefix_resolver", &self.key_prefix_resolver.is_some())
            .field("request_filter", &self.request_filter.is_some())
            .finish()
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let cache = &settings.cache;
        let cdn = &settings.cdn;
        Self {
            enable_route: cache.enable_route,
            enable_data: cache.enable_data,
            enable_component: cache.enable_component,
            route_limit: cache.route_limit,
            data_limit: cache.data_limit,
            component_limit: cache.component_limit,
            key_prefix: cache.key_prefix.clone(),
            max_body_bytes: usize::try_from(cache.max_body_bytes.get()).unwrap_or(usize::MAX),
            sweep_interval: cache.sweep_interval,
            cdn: cdn.enabled.then(|| {
                CdnHeaders::new(
                    cdn.cache_control_header.clone(),
                    cdn.cache_tag_header.clone(),
                )
            }),
            key_prefix_resolver: None,
            request_filter: None,
        }
    }
}

impl CacheConfig {
    /// Returns true if any named cache is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enable_route || self.enable_data || self.enable_component
    }

    pub fn is_store_enabled(&self, name: CacheName) -> bool {
        match name {
            CacheName::Route => self.enable_route,
            CacheName::Data => self.enable_data,
            CacheName::Component => self.enable_component,
        }
    }

    /// Store capacity, clamped to 1 if configured as zero.
    pub fn limit_non_zero(&self, name: CacheName) -> NonZeroUsize {
        let limit = match name {
            CacheName::Route => self.route_limit,
            CacheName::Data => self.data_limit,
            CacheName::Component => self.component_limit,
        };
        NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn with_cdn_headers(mut self, control: HeaderName, tags: HeaderName) -> Self {
        self.cdn = Some(CdnHeaders::new(control, tags));
        self
    }

    pub fn with_key_prefix_resolver(mut self, resolver: Arc<dyn KeyPrefixResolver>) -> Self {
        self.key_prefix_resolver = Some(resolver);
        self
    }

    pub fn with_request_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.request_filter = Some(filter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enable_route);
        assert!(config.enable_data);
        assert!(config.enable_component);
        assert_eq!(config.route_limit, 500);
        assert_eq!(config.data_limit, 1000);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert_eq!(config.sweep_interval, Duration::from_millis(1000));
        assert!(config.cdn.is_none());
    }

    #[test]
    fn is_enabled_when_data_only() {
        let config = CacheConfig {
            enable_route: false,
            enable_component: false,
            ..Default::default()
        };
        assert!(config.is_enabled());
        assert!(!config.is_store_enabled(CacheName::Route));
        assert!(config.is_store_enabled(CacheName::Data));
    }

    #[test]
    fn is_disabled_when_all_off() {
        let config = CacheConfig {
            enable_route: false,
            enable_data: false,
            enable_component: false,
            ..Default::default()
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            data_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.limit_non_zero(CacheName::Data).get(), 1);
    }
}
