/// Unified error handling module
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A remote feed call that did not produce a usable payload.
/// Never cached; callers report it and carry on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{operation} timed out")]
    Timeout { operation: String },
    #[error("{operation} returned HTTP {status}")]
    Status { operation: String, status: u16 },
    #[error("{operation} failed: {message}")]
    Network { operation: String, message: String },
    #[error("{operation} returned an unexpected payload: {message}")]
    Decode { operation: String, message: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FetchError {
    /// Classify a reqwest failure for the named operation
    pub fn from_reqwest(operation: &str, err: reqwest::Error) -> Self {
        // Request URLs carry the API key
        let err = err.without_url();
        let operation = operation.to_string();
        if err.is_timeout() {
            FetchError::Timeout { operation }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                operation,
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            FetchError::Decode {
                operation,
                message: err.to_string(),
            }
        } else {
            FetchError::Network {
                operation,
                message: err.to_string(),
            }
        }
    }
}

/// Favorites store failures. Crate-internal: `FavoritesStore` converts
/// these to `false` / empty results at its boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("favorites store is not configured")]
    NotConfigured,
    #[error("favorites store unavailable: {0}")]
    Unavailable(String),
    #[error("favorites query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Share card composition could not complete
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("QR encoding failed: {0}")]
    Qr(String),
    #[error("card markup rejected: {0}")]
    Svg(String),
    #[error("could not allocate card canvas")]
    Canvas,
    #[error("PNG encoding failed: {0}")]
    Encode(String),
    #[error("render task failed: {0}")]
    Task(String),
}

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Fetch(FetchError),
    Render(RenderError),
    Internal(String),
    InvalidInput(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Fetch(e) => write!(f, "External API error: {}", e),
            ApiError::Render(e) => write!(f, "Share card failed: {}", e),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ApiError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            other => ApiError::Fetch(other),
        }
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        ApiError::Render(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Fetch(FetchError::Status { status, .. }) => match status {
                403 => "UPSTREAM_403",
                404 => "UPSTREAM_404",
                429 => "UPSTREAM_429",
                500..=599 => "UPSTREAM_5XX",
                _ => "UPSTREAM_ERROR",
            },
            ApiError::Fetch(FetchError::Timeout { .. }) => "UPSTREAM_TIMEOUT",
            ApiError::Fetch(FetchError::InvalidInput(_)) => "INVALID_INPUT",
            ApiError::Fetch(_) => "UPSTREAM_ERROR",
            ApiError::Render(_) => "RENDER_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        // Always HTTP 200 with ok=false; clients branch on the envelope
        (StatusCode::OK, Json(error_response)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
