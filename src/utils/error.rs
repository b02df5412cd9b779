//! Error types and handling
//!
//! Every failure leaving a handler is an [`AppError`]. Client errors carry a
//! message meant for the caller; server errors are logged with the request
//! UUID and rendered as an opaque message.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::RequestMetadata;
use crate::services::crypto::CryptoError;

const OPAQUE_MESSAGE: &str = "Internal server error.";

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Caller input fails its contract (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Caller supplied a claim the server controls (400)
    #[error("JWT registered claims must not be provided: {0}")]
    RegisteredClaimProvided(String),

    /// Missing or invalid API key (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Service account lacks the admin flag (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Link or record absent, expired or already used (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Body exceeds the configured limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// JWT parse, signature, issuer or audience failure (422)
    #[error("Token error: {0}")]
    TokenError(String),

    /// Token bucket empty until the request deadline (429)
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(String),

    /// Key material or sealed blob failure (500)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Email or verification provider failure (500)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response body
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// HTTP status code
    pub code: u16,
    /// Human-readable error message
    pub message: String,
    pub request_metadata: RequestMetadata,
}

impl ErrorResponse {
    /// Create a new error response bound to the current request
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            request_metadata: RequestMetadata::current(),
        }
    }
}

impl AppError {
    /// HTTP status for this error kind
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::RegisteredClaimProvided(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TokenError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_)
            | AppError::Database(_)
            | AppError::Crypto(_)
            | AppError::Provider(_)
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller
    fn public_message(&self) -> String {
        match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::TokenError(msg) => msg.clone(),
            AppError::RegisteredClaimProvided(_) => self.to_string(),
            AppError::RateLimited => "Too many requests. Please try again later.".to_string(),
            _ => OPAQUE_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse::new(status, self.public_message());

        if status.is_server_error() {
            error!(
                error = %self,
                request_uuid = %body.request_metadata.uuid,
                "Request failed"
            );
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        AppError::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(rejection.body_text())
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
