//! HTTP mapping of the error taxonomy.
//!
//! Every handler error is rendered as the IDTA error body:
//! `{"messages": [{"code", "text", "messageType": "Error"}]}` with the
//! status implied by the error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::core::error::TitanError;

/// Handler-level error carrying its HTTP mapping.
#[derive(Debug)]
pub struct ApiError(pub TitanError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TitanError::InvalidIdentifierEncoding(_)
            | TitanError::InvalidDocument(_)
            | TitanError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            TitanError::NotFound { .. } | TitanError::ElementNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            TitanError::AlreadyExists { .. } | TitanError::ElementAlreadyExists { .. } => {
                StatusCode::CONFLICT
            }
            TitanError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            TitanError::StoreUnavailable(_) | TitanError::EventBusSaturated => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TitanError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TitanError::Forbidden(_) => StatusCode::FORBIDDEN,
            TitanError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TitanError> for ApiError {
    fn from(e: TitanError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = json!({
            "messages": [{
                "code": self.0.code(),
                "text": self.0.to_string(),
                "messageType": "Error",
            }]
        });
        (status, Json(body)).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(TitanError::InvalidIdentifierEncoding("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(TitanError::not_found("Submodel", "urn:x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(TitanError::already_exists("AAS", "urn:x")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(TitanError::PreconditionFailed).status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ApiError(TitanError::StoreUnavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(TitanError::EventBusSaturated).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(TitanError::ElementAlreadyExists { path: "A".into() }).status(),
            StatusCode::CONFLICT
        );
    }
}
