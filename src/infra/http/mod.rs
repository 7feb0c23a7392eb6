pub mod api;
pub mod middleware;
mod playground;

pub use api::{ApiState, build_api_router};
pub use playground::{GeneratedValue, build_playground_router};

use std::sync::Arc;

use axum::{Router, middleware::from_fn, middleware::from_fn_with_state};

use crate::cache::{CacheManager, CacheState, cache_context_layer, response_cache_layer};
use crate::config::ApiSettings;

/// Wrap `routes` in the cache pipeline.
///
/// Layer order, outermost first: request id, cache context, response cache,
/// response logging. Logging sits inside the context layer so it can report
/// the request's cache prefix.
pub fn with_cache_layers(routes: Router, manager: Arc<CacheManager>) -> Router {
    let state = CacheState::new(manager);
    routes
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn_with_state(state.clone(), response_cache_layer))
        .layer(from_fn_with_state(state, cache_context_layer))
        .layer(from_fn(middleware::set_request_context))
}

/// The full application: cached playground routes plus, when enabled, the
/// management API under its prefix.
pub fn build_router(manager: Arc<CacheManager>, api: &ApiSettings) -> Router {
    let app = with_cache_layers(build_playground_router(), Arc::clone(&manager));
    if !api.enabled {
        return app;
    }

    let api_state = ApiState::new(manager, api);
    app.merge(build_api_router(api_state, &api.prefix))
}
