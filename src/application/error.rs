use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{cache::StoreError, config::LoadError, infra::error::InfraError};

/// Diagnostic chain attached to error responses as an extension.
///
/// Its presence marks a response as the product of a failed handler: the
/// output cache never stores such a response, and the error handler logs it.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    /// Capture `error` and every error in its `source()` chain, outermost first.
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut next = error.source();
        while let Some(inner) = next {
            messages.push(inner.to_string());
            next = inner.source();
        }
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

    /// The report carried by `response`, if a failing handler produced it.
    pub fn of(response: &Response) -> Option<&ErrorReport> {
        response.extensions().get::<ErrorReport>()
    }

    /// Outermost message of the chain.
    pub fn detail(&self) -> &str {
        self.messages
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available")
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// A handler failure with an explicit status and a fixed public message.
///
/// The detail only reaches the caller through the error handler, and only
/// for callers allowed to see diagnostics.
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

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Status code and the message shown to callers without diagnostics access.
    fn public_face(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Resource not found"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Request could not be processed"),
            AppError::Store(StoreError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
            ),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Service misconfigured"),
            AppError::Store(_) | AppError::Infra(_) | AppError::Unexpected(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unexpected error occurred",
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.public_face();
        HttpError::from_error("application::error::AppError", status, message, &self)
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_collects_the_source_chain() {
        let error = AppError::from(InfraError::telemetry("subscriber already set"));
        let report = ErrorReport::from_error("test", StatusCode::INTERNAL_SERVER_ERROR, &error);
        assert_eq!(
            report.detail(),
            "telemetry initialization failed: subscriber already set"
        );
    }

    #[test]
    fn wrapped_errors_keep_every_layer() {
        let error = AppError::from(StoreError::Unavailable("connection reset".into()));
        let report = ErrorReport::from_error("test", StatusCode::SERVICE_UNAVAILABLE, &error);
        assert!(report.messages.len() >= 2, "chain: {:?}", report.messages);
        assert!(report.messages[0].starts_with("cache store error"));
    }

    #[test]
    fn app_error_response_carries_report_and_public_message() {
        let response = AppError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = ErrorReport::of(&response).expect("report attached");
        assert_eq!(report.status, StatusCode::NOT_FOUND);
        assert_eq!(report.source, "application::error::AppError");
    }

    #[test]
    fn unavailable_store_maps_to_service_unavailable() {
        let response =
            AppError::Store(StoreError::Unavailable("down".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn http_error_uses_the_report_status() {
        let error = HttpError::new(
            "test",
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid payload",
            "missing field",
        );
        assert_eq!(error.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let response = error.into_response();
        assert_eq!(
            ErrorReport::of(&response).map(ErrorReport::detail),
            Some("missing field")
        );
    }
}
