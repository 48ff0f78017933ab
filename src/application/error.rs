use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    cache::{CacheError, KeyError, ProxyError, StoreError},
    config::LoadError,
    domain::DomainError,
    infra::error::InfraError,
};

/// Error chain attached to failed responses for logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        Self::Cache(CacheError::Store(error))
    }
}

impl From<KeyError> for AppError {
    fn from(error: KeyError) -> Self {
        Self::Cache(CacheError::Key(error))
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound
            | AppError::Domain(DomainError::NotFound { .. })
            | AppError::Proxy(ProxyError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Validation(_)
            | AppError::Domain(DomainError::InvalidValue { .. } | DomainError::UnknownField { .. })
            | AppError::Proxy(ProxyError::Domain(
                DomainError::InvalidValue { .. } | DomainError::UnknownField { .. },
            )) => StatusCode::BAD_REQUEST,
            AppError::Cache(CacheError::Store(StoreError::Connection(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "Resource not found",
            StatusCode::BAD_REQUEST => "Request could not be processed",
            StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable",
            _ => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_objects_map_to_not_found() {
        let error = AppError::from(DomainError::not_found("Profile", 7));
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);

        let error = AppError::from(ProxyError::NotFound {
            model: "Profile",
            id: "7".to_string(),
        });
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_outage_is_unavailable() {
        let error = AppError::from(StoreError::connection("refused"));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.presentation_message(), "Service temporarily unavailable");
    }

    #[test]
    fn response_carries_error_report() {
        let response = AppError::validation("name must be a string").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, ["validation failed: name must be a string"]);
    }
}
