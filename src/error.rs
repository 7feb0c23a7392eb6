use std::error::Error as StdError;
use std::iter;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{cache::CacheError, config::LoadError, infra::error::InfraError};

/// Diagnostics carried on an error response's extensions. The response
/// logger removes it and logs the chain; clients never see it.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    /// Capture `error` and every `source()` beneath it, outermost first.
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let messages = iter::successors(Some(error), |&current| current.source())
            .map(ToString::to_string)
            .collect();
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// A plain-text failure. Only `public_message` reaches the client.
#[derive(Debug)]
pub struct HttpError {
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            public_message,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            public_message,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.report.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.report.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<CacheError> for HttpError {
    fn from(error: CacheError) -> Self {
        let status = match &error {
            CacheError::Store(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpError::from_error("cache", status, "Cache unavailable", &error)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_uses_transparent_display() {
        let error = AppError::from(CacheError::from(crate::cache::StoreError::unavailable(
            "redis down",
        )));
        let report = ErrorReport::from_error("test", StatusCode::BAD_GATEWAY, &error);
        assert_eq!(report.status, StatusCode::BAD_GATEWAY);
        assert_eq!(report.messages[0], "backend unavailable: redis down");
    }

    #[test]
    fn report_walks_the_source_chain() {
        let cause = serde_json::from_str::<u8>("nope").unwrap_err();
        let expected = cause.to_string();
        let error = crate::cache::StoreError::from(cause);

        let report = ErrorReport::from_error("test", StatusCode::BAD_GATEWAY, &error);
        assert_eq!(report.messages.len(), 2);
        assert!(report.messages[0].starts_with("failed to encode cache item"));
        assert_eq!(report.messages[1], expected);
    }

    #[test]
    fn http_error_attaches_report() {
        let response = HttpError::new(
            "test",
            StatusCode::BAD_REQUEST,
            "Bad input",
            "missing field",
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.messages, vec!["missing field".to_string()]);
    }

    #[test]
    fn backend_failures_surface_as_bad_gateway() {
        let error = HttpError::from(CacheError::from(crate::cache::StoreError::unavailable(
            "redis down",
        )));
        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);

        let error = HttpError::from(CacheError::KeyPrefix("no tenant".into()));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
