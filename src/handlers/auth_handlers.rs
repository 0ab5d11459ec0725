//! HTTP handlers for the session lifecycle: login, signup, refresh, logout and
//! the caller's profile. Everything except `profile` is unauthenticated.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::{
    errors::AppError,
    middleware::AuthContext,
    models::{subject::Subject, token::TokenPair},
    services::identity_gateway::{IdentityProvider, SignupRequest},
};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST `/auth/login`
pub async fn login(
    State(identity): State<Arc<dyn IdentityProvider>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPair>, AppError> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }
    let tokens = identity.login(req.username.trim(), &req.password).await?;
    Ok(Json(tokens))
}

/// POST `/auth/signup`
pub async fn signup(
    State(identity): State<Arc<dyn IdentityProvider>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("A valid email address is required"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    identity.signup(&req).await?;
    info!(email = %email, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully" })),
    ))
}

/// POST `/auth/refresh`
pub async fn refresh(
    State(identity): State<Arc<dyn IdentityProvider>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    if req.refresh_token.trim().is_empty() {
        return Err(AppError::bad_request("refreshToken is required"));
    }
    let tokens = identity.refresh(req.refresh_token.trim()).await?;
    Ok(Json(tokens))
}

/// POST `/auth/logout`
pub async fn logout(
    State(identity): State<Arc<dyn IdentityProvider>>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.refresh_token.trim().is_empty() {
        return Err(AppError::bad_request("refreshToken is required"));
    }
    identity.logout(req.refresh_token.trim()).await?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

/// GET `/user/profile`
pub async fn profile(Extension(auth): Extension<AuthContext>) -> Json<Subject> {
    Json(auth.subject)
}
