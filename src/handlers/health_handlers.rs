//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the object store bucket

use crate::services::{file_service::FileService, object_backend::StoreError};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness check. Always 200 and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when the configured bucket answers, 503 otherwise. The identity
/// provider is not checked; its outages surface per request.
pub async fn readyz(State(files): State<FileService>) -> impl IntoResponse {
    let store_check = match files.backend().ping().await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            CheckStatus {
                ok: false,
                error: Some(failure_summary(&e)),
            }
        }
    };

    let overall_ok = store_check.ok;
    let mut checks = HashMap::new();
    checks.insert("object_store", store_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Short description of a failed check. Store messages can carry upstream
/// response text, so only the operation is reported.
fn failure_summary(err: &StoreError) -> String {
    match err {
        StoreError::Unavailable { op, .. } => format!("{} unreachable", op),
        StoreError::Backend { op, .. } => format!("{} failed", op),
        _ => "unexpected response".to_string(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
