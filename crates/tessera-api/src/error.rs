//! API error handling
//!
//! Every failure leaves the service through [`AppError`], which renders the
//! uniform envelope `{"errors":[{"kind":...,"message":...}]}`.
//!
//! Author: hephaex@gmail.com

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tessera_core::CoreError;
use utoipa::ToSchema;

use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;

/// A single error entry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error kind, e.g. `AuthenticationError`
    #[schema(example = "AuthenticationError")]
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Error envelope returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub errors: Vec<ApiError>,
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(vec![message.into()])
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::Conflict(_) => "ConflictError",
            AppError::Authentication(_) => "AuthenticationError",
            AppError::Authorization(_) => "AuthorizationError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Configuration(_) => "ConfigurationError",
            AppError::Storage(_) => "StorageError",
            AppError::Internal(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) | AppError::NotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::Configuration(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn entries(&self) -> Vec<ApiError> {
        let kind = self.kind();
        match self {
            AppError::Validation(messages) => messages
                .iter()
                .map(|message| ApiError::new(kind, message.clone()))
                .collect(),
            AppError::Conflict(msg)
            | AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::NotFound(msg) => vec![ApiError::new(kind, msg.clone())],
            AppError::Configuration(_) => vec![ApiError::new(kind, "Service is misconfigured")],
            AppError::Storage(_) => vec![ApiError::new(kind, "Storage operation failed")],
            AppError::Internal(_) => vec![ApiError::new(kind, "Internal server error")],
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            errors: self.entries(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => AppError::NotFound(msg),
            CoreError::Conflict(msg) => AppError::Conflict(msg),
            CoreError::ValidationError(msg) => AppError::validation(msg),
            CoreError::DatabaseError(msg) => AppError::Storage(msg),
            CoreError::ConfigError(msg) => AppError::Configuration(msg),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::MissingPrivateKey | JwtError::LifetimeOverflow => {
                AppError::Configuration(err.to_string())
            }
            JwtError::EncodingError(_) | JwtError::SystemTimeError(_) => {
                AppError::Internal(err.to_string())
            }
            JwtError::ExpiredToken => AppError::Authentication("Token has expired".to_string()),
            _ => AppError::Authentication("Invalid token".to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid"),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages)
    }
}
