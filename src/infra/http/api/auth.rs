//! Management API authorization.
//!
//! Evaluated once per request, before any handler resolves a cache name, so
//! an unauthenticated caller never learns which caches exist.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::ApiAuthorizationSetting;

use super::error::ApiError;
use super::state::ApiState;

pub const TOKEN_HEADER: &str = "x-multi-cache-token";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ApiAuthError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("the management API is enabled but no authorization is configured")]
    MissingAuthConfig,
}

/// Custom authorization check receiving the request head.
#[async_trait]
pub trait AuthorizeRequest: Send + Sync {
    async fn authorize(&self, parts: &Parts) -> bool;
}

#[async_trait]
impl<F> AuthorizeRequest for F
where
    F: Fn(&Parts) -> bool + Send + Sync,
{
    async fn authorize(&self, parts: &Parts) -> bool {
        self(parts)
    }
}

#[derive(Clone)]
pub enum ApiAuthorization {
    Missing,
    Disabled,
    Token(String),
    Custom(Arc<dyn AuthorizeRequest>),
}

impl fmt::Debug for ApiAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("Missing"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl From<&ApiAuthorizationSetting> for ApiAuthorization {
    fn from(setting: &ApiAuthorizationSetting) -> Self {
        match setting {
            ApiAuthorizationSetting::Missing => Self::Missing,
            ApiAuthorizationSetting::Disabled => Self::Disabled,
            ApiAuthorizationSetting::Token(token) => Self::Token(token.clone()),
        }
    }
}

impl ApiAuthorization {
    /// Token mismatch and predicate rejection are indistinguishable to the caller.
    pub async fn check(&self, parts: &Parts) -> Result<(), ApiAuthError> {
        match self {
            Self::Missing => Err(ApiAuthError::MissingAuthConfig),
            Self::Disabled => Ok(()),
            Self::Token(expected) => {
                let provided = parts
                    .headers
                    .get(TOKEN_HEADER)
                    .map(|value| value.as_bytes())
                    .unwrap_or_default();
                if tokens_match(expected.as_bytes(), provided) {
                    Ok(())
                } else {
                    Err(ApiAuthError::Unauthorized)
                }
            }
            Self::Custom(predicate) => {
                if predicate.authorize(parts).await {
                    Ok(())
                } else {
                    Err(ApiAuthError::Unauthorized)
                }
            }
        }
    }
}

fn tokens_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.is_empty() || provided.is_empty() {
        return false;
    }
    expected.ct_eq(provided).unwrap_u8() == 1
}

pub async fn api_auth(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    if let Err(err) = state.authorization.check(&parts).await {
        return ApiError::from(err).into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}
