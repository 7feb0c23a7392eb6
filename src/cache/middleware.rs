//! Request pipeline layers.
//!
//! `cache_context_layer` must wrap `response_cache_layer`: the former attaches
//! the request's `CacheContext` and `RouteCacheHelper`, the latter serves from
//! and writes to the route store.
//!
//! ```ignore
//! Router::new()
//!     .route("/", get(handler))
//!     .layer(from_fn_with_state(state.clone(), response_cache_layer))
//!     .layer(from_fn_with_state(state, cache_context_layer))
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, error, instrument};

use crate::error::HttpError;

use super::context::CacheContext;
use super::expiry::ExpiryPolicy;
use super::item::RouteCacheItem;
use super::keys::CacheName;
use super::manager::{CacheManager, Lookup};
use super::metric_names;
use super::route::{RouteCacheDecision, RouteCacheHelper};
use super::scope::{self, RequestCache};

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub manager: Arc<CacheManager>,
}

impl CacheState {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }
}

/// Attach the cache context and route helper, then run the rest of the
/// pipeline inside the request scope.
pub async fn cache_context_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = cache.manager.config();
    if !config.is_enabled() {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();

    if let Some(filter) = &config.request_filter
        && !filter.enabled_for_request(&parts).await
    {
        return next.run(Request::from_parts(parts, body)).await;
    }

    let context = match CacheContext::load(&mut parts, &cache.manager).await {
        Ok(context) => context,
        Err(err) => {
            return HttpError::from_error(
                "cache::middleware::cache_context_layer",
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &err,
            )
            .into_response();
        }
    };

    let route = match parts.extensions.get::<Arc<RouteCacheHelper>>() {
        Some(existing) => Arc::clone(existing),
        None => {
            let helper = Arc::new(RouteCacheHelper::new());
            parts.extensions.insert(Arc::clone(&helper));
            helper
        }
    };

    let request = Request::from_parts(parts, body);
    scope::scope(RequestCache { context, route }, next.run(request)).await
}

/// Serve cached routes and persist cacheable responses.
///
/// Lookup and write failures are logged and never fail the request.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(context) = request.extensions().get::<Arc<CacheContext>>().cloned() else {
        return next.run(request).await;
    };
    let Some(route) = request.extensions().get::<Arc<RouteCacheHelper>>().cloned() else {
        return next.run(request).await;
    };

    let cacheable_method = request.method() == Method::GET;
    let route_enabled = cache.manager.is_enabled(CacheName::Route);
    let full_key = request
        .uri()
        .path_and_query()
        .map(|path| context.full_key(path.as_str()));

    if let (true, true, Some(key)) = (cacheable_method, route_enabled, &full_key) {
        match cache.manager.lookup::<RouteCacheItem>(CacheName::Route, key).await {
            Ok(Lookup::Hit(item)) => {
                debug!(cache = "route", outcome = "hit", "serving cached response");
                return build_response(item);
            }
            Ok(Lookup::Miss(reason)) => {
                debug!(cache = "route", outcome = "miss", reason = ?reason, "rendering");
            }
            Err(err) => {
                debug!(cache = "route", error = %err, "route lookup failed; rendering");
            }
        }
    }

    let mut response = next.run(request).await;
    let decision = route.resolve();

    if let Some(cdn) = context.cdn() {
        cdn.apply(&decision, response.headers_mut());
    }

    let key = match (cacheable_method, route_enabled, full_key) {
        (true, true, Some(key)) => key,
        _ => return response,
    };
    if let Some(reason) = skip_reason(&decision, &response) {
        debug!(cache = "route", reason, "not caching response");
        counter!(metric_names::ROUTE_SKIP, "reason" => reason).increment(1);
        return response;
    }

    store_response(&cache.manager, &key, &decision, response).await
}

fn skip_reason(decision: &RouteCacheDecision, response: &Response) -> Option<&'static str> {
    if !decision.should_cache {
        Some("not_cacheable")
    } else if response.status().as_u16() >= 400 {
        Some("status")
    } else if response.headers().contains_key(header::SET_COOKIE) {
        Some("set_cookie")
    } else {
        None
    }
}

async fn store_response(
    manager: &CacheManager,
    key: &str,
    decision: &RouteCacheDecision,
    response: Response,
) -> Response {
    let limit = manager.config().max_body_bytes as u64;
    let too_large = match response.body().size_hint().upper() {
        Some(upper) => upper > limit,
        None => true,
    };
    if too_large {
        debug!(cache = "route", "body too large or unbounded; not caching");
        counter!(metric_names::ROUTE_SKIP, "reason" => "body_size").increment(1);
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Ok(data) = std::str::from_utf8(&bytes) else {
        debug!(cache = "route", "body is not UTF-8; not caching");
        counter!(metric_names::ROUTE_SKIP, "reason" => "binary").increment(1);
        return Response::from_parts(parts, Body::from(bytes));
    };

    let headers = capture_headers(&parts.headers);

    let item = RouteCacheItem {
        data: data.to_string(),
        headers,
        status_code: Some(parts.status.as_u16()),
        cache_tags: decision.tags.iter().cloned().collect(),
        expires: decision
            .max_age
            .map(|max_age| ExpiryPolicy::expires_at(manager.now(), max_age)),
    };

    match manager.store_item(CacheName::Route, key, &item).await {
        Ok(()) => {
            debug!(cache = "route", tags = item.cache_tags.len(), "cached response");
            counter!(metric_names::ROUTE_WRITE).increment(1);
        }
        Err(err) => {
            debug!(cache = "route", error = %err, "route write failed");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Flatten headers for storage. Repeated fields are joined with `, `.
/// Non-text values and `content-length` are dropped.
fn capture_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut captured: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        if *name == header::CONTENT_LENGTH {
            continue;
        }
        let Ok(value) = value.to_str() else {
            continue;
        };
        captured
            .entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    captured
}

/// Replay a cached response verbatim.
fn build_response(cached: RouteCacheItem) -> Response {
    let status = cached
        .status_code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);

    for (name, value) in &cached.headers {
        if let Ok(header_value) = HeaderValue::from_str(value) {
            builder = builder.header(name.as_str(), header_value);
        }
    }

    builder
        .body(Body::from(cached.data))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::error::CacheError;
    use crate::cache::expiry::ManualClock;

    fn app(manager: Arc<CacheManager>, calls: Arc<AtomicUsize>) -> Router {
        let state = CacheState::new(manager);
        let counted = Arc::clone(&calls);
        Router::new()
            .route(
                "/page",
                get(move || {
                    let calls = Arc::clone(&counted);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if let Some(route) = scope::current_route() {
                            route.set_cacheable().add_tags(["page"]).set_max_age(60);
                        }
                        ([(header::CONTENT_TYPE, "text/html")], "<p>hello</p>")
                    }
                }),
            )
            .route(
                "/vetoed",
                get(|| async {
                    if let Some(route) = scope::current_route() {
                        route.set_cacheable().set_uncacheable();
                    }
                    "nope"
                }),
            )
            .route(
                "/linked",
                get(|| async {
                    if let Some(route) = scope::current_route() {
                        route.set_cacheable();
                    }
                    let mut headers = HeaderMap::new();
                    headers.append(header::LINK, HeaderValue::from_static("</a.css>; rel=preload"));
                    headers.append(header::LINK, HeaderValue::from_static("</b.js>; rel=preload"));
                    (headers, "linked")
                }),
            )
            .route(
                "/cookie",
                get(|| async {
                    if let Some(route) = scope::current_route() {
                        route.set_cacheable();
                    }
                    ([(header::SET_COOKIE, "session=1")], "with cookie")
                }),
            )
            .layer(from_fn_with_state(state.clone(), response_cache_layer))
            .layer(from_fn_with_state(state, cache_context_layer))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let manager = Arc::new(CacheManager::in_memory(CacheConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(Arc::clone(&manager), Arc::clone(&calls));

        let first = app.clone().oneshot(get_request("/page")).await.unwrap();
        assert_eq!(body_string(first).await, "<p>hello</p>");

        let second = app.oneshot(get_request("/page")).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(body_string(second).await, "<p>hello</p>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(manager.tags().keys_for_tag("page").len(), 1);
    }

    #[tokio::test]
    async fn query_string_is_part_of_the_key() {
        let manager = Arc::new(CacheManager::in_memory(CacheConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(manager, Arc::clone(&calls));

        app.clone().oneshot(get_request("/page?a=1")).await.unwrap();
        app.oneshot(get_request("/page?a=2")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_route_is_rendered_again() {
        let clock = ManualClock::new(1_000);
        let manager = Arc::new(CacheManager::in_memory_with_clock(
            CacheConfig::default(),
            Arc::new(clock.clone()),
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(manager, Arc::clone(&calls));

        app.clone().oneshot(get_request("/page")).await.unwrap();
        clock.advance(60);
        app.oneshot(get_request("/page")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn vetoed_and_cookie_responses_are_not_stored() {
        let manager = Arc::new(CacheManager::in_memory(CacheConfig::default()));
        let app = app(Arc::clone(&manager), Arc::new(AtomicUsize::new(0)));

        app.clone().oneshot(get_request("/vetoed")).await.unwrap();
        app.oneshot(get_request("/cookie")).await.unwrap();

        let stats = manager.stats(CacheName::Route).await.unwrap();
        assert_eq!(stats.count, 0);
    }

    #[tokio::test]
    async fn cdn_headers_are_emitted_when_enabled() {
        let config = CacheConfig::default().with_cdn_headers(
            header::HeaderName::from_static("surrogate-control"),
            header::HeaderName::from_static("cache-tag"),
        );
        let manager = Arc::new(CacheManager::in_memory(config));
        let app = app(manager, Arc::new(AtomicUsize::new(0)));

        let response = app.oneshot(get_request("/page")).await.unwrap();
        assert_eq!(response.headers()["surrogate-control"], "max-age=60");
        assert_eq!(response.headers()["cache-tag"], "page");
    }

    #[tokio::test]
    async fn request_filter_bypasses_caching() {
        let filter = |parts: &axum::http::request::Parts| parts.uri.path() != "/page";
        let config = CacheConfig::default().with_request_filter(Arc::new(filter));
        let manager = Arc::new(CacheManager::in_memory(config));
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(manager, Arc::clone(&calls));

        app.clone().oneshot(get_request("/page")).await.unwrap();
        app.oneshot(get_request("/page")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_prefix_resolver_is_a_server_error() {
        let resolver = |_: &axum::http::request::Parts| -> Result<String, CacheError> {
            Err(CacheError::KeyPrefix("no tenant".to_string()))
        };
        let config = CacheConfig::default().with_key_prefix_resolver(Arc::new(resolver));
        let manager = Arc::new(CacheManager::in_memory(config));
        let app = app(manager, Arc::new(AtomicUsize::new(0)));

        let response = app.oneshot(get_request("/page")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn repeated_headers_survive_replay() {
        let manager = Arc::new(CacheManager::in_memory(CacheConfig::default()));
        let app = app(Arc::clone(&manager), Arc::new(AtomicUsize::new(0)));

        app.clone().oneshot(get_request("/linked")).await.unwrap();
        let replayed = app.oneshot(get_request("/linked")).await.unwrap();

        assert_eq!(
            replayed.headers()[header::LINK],
            "</a.css>; rel=preload, </b.js>; rel=preload"
        );
        assert_eq!(body_string(replayed).await, "linked");
        assert_eq!(manager.stats(CacheName::Route).await.unwrap().count, 1);
    }

    #[test]
    fn replay_defaults_to_ok_status() {
        let item = RouteCacheItem {
            data: "body".to_string(),
            headers: BTreeMap::from([("x-custom".to_string(), "1".to_string())]),
            status_code: None,
            cache_tags: Vec::new(),
            expires: None,
        };
        let response = build_response(item);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-custom"], "1");
    }
}
