//! Shared application state handed to the router.

use axum::extract::FromRef;
use std::{sync::Arc, time::Duration};

use crate::{
    middleware::AuthState,
    services::{file_service::FileService, identity_gateway::IdentityProvider},
};

/// Per-process state; cloned into every request. Nothing in here is mutated
/// after startup.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub auth: AuthState,
    pub identity: Arc<dyn IdentityProvider>,
    pub files: FileService,
    pub presign_ttl: PresignTtl,
}

/// Lifetime of URLs issued by `GET /files/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresignTtl(pub Duration);

impl AppState {
    pub fn new(auth: AuthState, files: FileService, presign_ttl: Duration) -> Self {
        Self {
            identity: auth.identity.clone(),
            auth,
            files,
            presign_ttl: PresignTtl(presign_ttl),
        }
    }
}
