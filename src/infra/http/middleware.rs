//! Request id propagation and failure logging.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::cache::CacheContext;
use crate::error::ErrorReport;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Reuse the caller's `x-request-id` when it is a valid header value,
/// otherwise mint one. Echoed on every response, cached or not.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let ctx = RequestContext { request_id };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Log 4xx at `warn` and 5xx at `error`, with the `ErrorReport` chain when
/// the handler attached one.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let cache_prefix = request
        .extensions()
        .get::<Arc<CacheContext>>()
        .map(|context| context.cache_key_prefix().to_string())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let elapsed_ms = started_at.elapsed().as_millis();
    let (source, chain) = response
        .extensions_mut()
        .remove::<ErrorReport>()
        .map_or(("unknown", Vec::new()), |report| {
            (report.source, report.messages)
        });

    if status.is_server_error() {
        error!(
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            source,
            ?chain,
            %request_id,
            %cache_prefix,
            "request failed"
        );
    } else {
        warn!(
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            source,
            ?chain,
            %request_id,
            %cache_prefix,
            "request rejected"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware::from_fn, routing::get};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn request_id_is_echoed_in_response() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn(log_responses))
            .layer(from_fn(set_request_context));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert!(response.extensions().get::<RequestContext>().is_some());
    }

    #[tokio::test]
    async fn caller_request_id_is_kept() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn(set_request_context));

        let request = Request::builder()
            .uri("/")
            .header(REQUEST_ID_HEADER, "edge-42")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "edge-42");
    }
}
