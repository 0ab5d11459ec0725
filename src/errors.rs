use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::services::object_backend::StoreError;

/// Failures of the identity provider round trips and of the auth middleware.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    MissingOrMalformedCredential(&'static str),
    #[error("access token rejected by identity provider")]
    TokenInvalid,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("refresh token rejected by identity provider")]
    RefreshRejected,
    #[error("could not obtain service token from identity provider")]
    AdminTokenUnavailable,
    #[error("identity provider rejected user creation (status {status})")]
    UserCreateRejected { status: u16 },
    #[error("identity provider rejected logout (status {status})")]
    LogoutRejected { status: u16 },
    #[error("identity provider unavailable during {call}: {message}")]
    UpstreamUnavailable { call: &'static str, message: String },
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub description: Option<String>,
    pub refresh_required: bool,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            description: None,
            refresh_required: false,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(description) = self.description {
            body["errorDescription"] = json!(description);
        }
        if self.refresh_required {
            body["refreshRequired"] = json!(true);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingOrMalformedCredential(reason) => AppError::unauthorized(reason),
            AuthError::TokenInvalid => AppError::unauthorized("Invalid token")
                .with_description("Token was rejected by the identity provider"),
            AuthError::SessionExpired => AppError {
                refresh_required: true,
                ..AppError::unauthorized("Token expired").with_description("Please login again")
            },
            AuthError::InvalidCredentials => AppError::unauthorized("Invalid login attempt"),
            AuthError::RefreshRejected => AppError::unauthorized("Invalid refresh token"),
            AuthError::AdminTokenUnavailable => {
                AppError::new(StatusCode::BAD_GATEWAY, "Signup is currently unavailable")
            }
            AuthError::UserCreateRejected { status } => {
                let code = if status == StatusCode::CONFLICT.as_u16() {
                    StatusCode::CONFLICT
                } else {
                    StatusCode::BAD_REQUEST
                };
                AppError::new(code, "User could not be created")
            }
            AuthError::LogoutRejected { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "Logout failed")
            }
            AuthError::UpstreamUnavailable { call, message } => {
                tracing::warn!(call, %message, "identity provider unreachable");
                AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Identity provider unavailable",
                )
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::new(StatusCode::NOT_FOUND, "File not found"),
            StoreError::InvalidKey => AppError::bad_request("Invalid file name"),
            StoreError::InvalidCursor => AppError::bad_request("Invalid cursor"),
            StoreError::Unavailable { op, message } => {
                tracing::error!(op, %message, "object store unreachable");
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "Object store unavailable")
            }
            StoreError::Backend { op, message } => {
                tracing::error!(op, %message, "object store operation failed");
                AppError::internal("Storage operation failed")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "unhandled error");
        AppError::internal("Internal server error")
    }
}
