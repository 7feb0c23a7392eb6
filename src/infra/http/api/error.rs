use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::cache::CacheError;
use crate::error::ErrorReport;

use super::auth::ApiAuthError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const MISSING_AUTH_CONFIG: &str = "missing_auth_config";
    pub const UNKNOWN_CACHE_STORE: &str = "unknown_cache_store";
    pub const NOT_FOUND_CACHE: &str = "not_found_cache";
    pub const STORE: &str = "store_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            hint,
        }
    }

    pub fn bad_request(message: impl Into<String>, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Unauthorized",
            None,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<ApiAuthError> for ApiError {
    fn from(error: ApiAuthError) -> Self {
        match error {
            ApiAuthError::Unauthorized => ApiError::unauthorized(),
            ApiAuthError::MissingAuthConfig => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::MISSING_AUTH_CONFIG,
                error.to_string(),
                Some("set `api.authorization` to a token or to `false`".to_string()),
            ),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(error: CacheError) -> Self {
        match &error {
            CacheError::UnknownCacheStore(_) => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::UNKNOWN_CACHE_STORE,
                error.to_string(),
                None,
            ),
            CacheError::NotFoundCache(_) => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::NOT_FOUND_CACHE,
                error.to_string(),
                None,
            ),
            CacheError::Store(_) => ApiError::new(
                StatusCode::BAD_GATEWAY,
                codes::STORE,
                "Cache backend failed",
                Some(error.to_string()),
            ),
            CacheError::KeyPrefix(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL,
                "Internal server error",
                Some(error.to_string()),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(&self.message)
        );
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http::api", self.status, detail).attach(&mut response);
        response
    }
}
