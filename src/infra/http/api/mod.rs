//! Management API.
//!
//! | Method | Path                      |
//! |--------|---------------------------|
//! | POST   | `{prefix}/purge/all`      |
//! | POST   | `{prefix}/purge/tags`     |
//! | POST   | `{prefix}/purge/{cache}`  |
//! | GET    | `{prefix}/stats/{cache}`  |
//! | GET    | `{prefix}/inspect/{cache}?key=...` |

pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

pub use auth::{ApiAuthError, ApiAuthorization, AuthorizeRequest, TOKEN_HEADER};
pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::middleware::log_responses;

/// Build the management router mounted under `prefix` (e.g. `/__multi_cache`).
pub fn build_api_router(state: ApiState, prefix: &str) -> Router {
    let auth_state = state.clone();

    let routes = Router::new()
        .route("/purge/all", post(handlers::purge_all))
        .route("/purge/tags", post(handlers::purge_tags))
        .route("/purge/{cache_name}", post(handlers::purge_item))
        .route("/stats/{cache_name}", get(handlers::stats))
        .route("/inspect/{cache_name}", get(handlers::inspect))
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth::api_auth,
        ))
        .layer(axum_middleware::from_fn(log_responses));

    Router::new().nest(prefix, routes)
}
