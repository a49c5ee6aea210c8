//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{ErrorKind, SagaError};
use serde::Serialize;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// No verified user on the request.
    Unauthorized,
    /// Malformed request from the client.
    BadRequest(String),
    /// Saga or store failure.
    Saga(SagaError),
}

/// Error body returned for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: bool,
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Maps an error kind to its HTTP status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict | ErrorKind::ProductUnavailable => StatusCode::CONFLICT,
        ErrorKind::NotFound | ErrorKind::EmptyBasket => StatusCode::NOT_FOUND,
        ErrorKind::Unprocessable | ErrorKind::WarehouseBindFailed => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::UpstreamUnavailable | ErrorKind::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::CompensationIncomplete | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "x-user-id header is required".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => {
                let kind = err.kind();
                let status = status_for(kind);
                if status.is_server_error() {
                    tracing::error!(error_kind = %kind, error = %err, "request failed");
                } else {
                    tracing::debug!(error_kind = %kind, error = %err, "request rejected");
                }
                (status, err.to_string())
            }
        };

        metrics::counter!("http_errors_total", "code" => status.as_str().to_string())
            .increment(1);

        let body = ErrorBody {
            status: false,
            code: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            // internals never leave the process on 5xx
            detail: status.is_client_error().then_some(detail),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
