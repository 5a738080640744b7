//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use serde::Serialize;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Engine error, mapped by its code.
    Order(OrderError),
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Request body or path could not be decoded.
    BadRequest(String),
    /// Internal server error.
    Internal(String),
}

/// Wire shape of every failure response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Order(err) => order_error_to_response(err),
            ApiError::Unauthorized(detail) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "UNAUTHORIZED",
                    message: "missing or invalid caller identity".to_string(),
                    detail: Some(detail),
                },
            ),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "INVALID_PARAMS",
                    message: "invalid parameters".to_string(),
                    detail: Some(detail),
                },
            ),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL",
                        message: "internal error".to_string(),
                        detail: None,
                    },
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, ErrorBody) {
    let status = match &err {
        OrderError::InvalidParams(_) => StatusCode::BAD_REQUEST,
        OrderError::ProductNotFound { .. } | OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::StockInsufficient { .. } | OrderError::IllegalStatusTransition { .. } => {
            StatusCode::CONFLICT
        }
        OrderError::SystemBusy => StatusCode::SERVICE_UNAVAILABLE,
        OrderError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        OrderError::TransactionFailure(_)
        | OrderError::IdGeneration(_)
        | OrderError::CleanupFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    // The engine logs its own failures with request context.
    tracing::debug!(code = err.code(), error = %err, "request failed");

    (
        status,
        ErrorBody {
            code: err.code(),
            message: err.public_message(),
            detail: err.detail(),
        },
    )
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
