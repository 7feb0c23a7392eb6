use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheError, CacheManager, CacheName};
use crate::config::ApiSettings;

use super::auth::{ApiAuthorization, AuthorizeRequest};

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<CacheManager>,
    pub authorization: ApiAuthorization,
    /// Applied to every purge-by-tags request; callers cannot override it.
    pub tag_invalidation_delay: Duration,
}

impl ApiState {
    pub fn new(manager: Arc<CacheManager>, settings: &ApiSettings) -> Self {
        Self {
            manager,
            authorization: ApiAuthorization::from(&settings.authorization),
            tag_invalidation_delay: settings.cache_tag_invalidation_delay,
        }
    }

    pub fn with_authorization(mut self, authorization: ApiAuthorization) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_authorize_fn(self, predicate: Arc<dyn AuthorizeRequest>) -> Self {
        self.with_authorization(ApiAuthorization::Custom(predicate))
    }

    pub fn with_tag_invalidation_delay(mut self, delay: Duration) -> Self {
        self.tag_invalidation_delay = delay;
        self
    }

    /// Parse a path segment into an enabled cache name.
    pub fn resolve_cache(&self, raw: &str) -> Result<CacheName, CacheError> {
        let name: CacheName = raw.parse()?;
        if self.manager.is_enabled(name) {
            Ok(name)
        } else {
            Err(CacheError::UnknownCacheStore(raw.to_string()))
        }
    }
}
