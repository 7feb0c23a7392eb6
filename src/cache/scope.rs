//! Ambient access to the current request's cache state.
//!
//! The context layer runs the rest of the pipeline inside a task-local scope,
//! so code deep inside a handler can reach the `CacheContext` and
//! `RouteCacheHelper` without threading them through every call. Outside a
//! scope (background jobs, spawned tasks) the accessors return `None` and
//! callers behave as if caching were disabled.

use std::future::Future;
use std::sync::Arc;

use super::context::CacheContext;
use super::route::RouteCacheHelper;

/// Everything attached to a request by the context layer.
#[derive(Clone)]
pub struct RequestCache {
    pub context: Arc<CacheContext>,
    pub route: Arc<RouteCacheHelper>,
}

tokio::task_local! {
    static REQUEST_CACHE: RequestCache;
}

/// Run `f` with `cache` as the ambient request cache.
pub async fn scope<F>(cache: RequestCache, f: F) -> F::Output
where
    F: Future,
{
    REQUEST_CACHE.scope(cache, f).await
}

pub fn current() -> Option<RequestCache> {
    REQUEST_CACHE.try_with(Clone::clone).ok()
}

pub fn current_context() -> Option<Arc<CacheContext>> {
    REQUEST_CACHE
        .try_with(|cache| Arc::clone(&cache.context))
        .ok()
}

/// The route helper of the current request, if any.
///
/// ```ignore
/// if let Some(route) = scope::current_route() {
///     route.set_cacheable().add_tags(["article:42"]).set_max_age(300);
/// }
/// ```
pub fn current_route() -> Option<Arc<RouteCacheHelper>> {
    REQUEST_CACHE
        .try_with(|cache| Arc::clone(&cache.route))
        .ok()
}
