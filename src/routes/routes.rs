//! Defines the HTTP surface.
//!
//! ## Structure
//! - **Health checks** (root, unauthenticated)
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Session endpoints** under `/api/v1/auth` (unauthenticated)
//!   - `POST   /login`, `/signup`, `/refresh`, `/logout`
//!
//! - **Protected endpoints** under `/api/v1` (bearer token, optional `X-Refresh-Token`)
//!   - `GET    /user/profile`
//!   - `POST   /files/upload`
//!   - `GET    /files` - paginated listing (`limit`, `cursor`)
//!   - `GET    /files/{id}` - presigned URL
//!   - `GET    /files/{id}/download` - streamed payload
//!   - `DELETE /files/{id}`

use crate::{
    handlers::{
        auth_handlers::{login, logout, profile, refresh, signup},
        file_handlers::{delete_file, download_file, get_file, list_files, upload_file},
        health_handlers::{healthz, readyz},
    },
    middleware::{
        auth::{
            NEW_ACCESS_TOKEN_HEADER, NEW_REFRESH_TOKEN_HEADER, REFRESH_TOKEN_HEADER,
            TOKEN_EXPIRES_IN_HEADER, TOKEN_REFRESHED_HEADER,
        },
        authenticate, proactive_refresh,
    },
    state::AppState,
};
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Router-level settings that are not part of the request state.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Single origin allowed by CORS.
    pub frontend_url: String,
    pub max_upload_bytes: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:3000".into(),
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Build the full application router.
pub fn routes(state: AppState, opts: &RouterOptions) -> Result<Router> {
    let public = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/signup", post(signup))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout));

    // Layers run outside-in: `authenticate` wraps `proactive_refresh`.
    let protected = Router::new()
        .route("/user/profile", get(profile))
        .route("/files", get(list_files))
        .route("/files/upload", post(upload_file))
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/download", get(download_file))
        .route_layer(from_fn_with_state(state.auth.clone(), proactive_refresh))
        .route_layer(from_fn_with_state(state.auth.clone(), authenticate));

    let cors = cors_layer(&opts.frontend_url)?;

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/v1", public.merge(protected))
        .layer(DefaultBodyLimit::max(opts.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(frontend_url: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(frontend_url.trim_end_matches('/'))
        .with_context(|| format!("invalid FRONTEND_URL `{}`", frontend_url))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ORIGIN,
            REFRESH_TOKEN_HEADER,
        ])
        .expose_headers([
            NEW_ACCESS_TOKEN_HEADER,
            NEW_REFRESH_TOKEN_HEADER,
            TOKEN_REFRESHED_HEADER,
            TOKEN_EXPIRES_IN_HEADER,
            header::CONTENT_LENGTH,
            header::CONTENT_DISPOSITION,
        ])
        .allow_credentials(true))
}
