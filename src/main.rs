use anyhow::{Context, Result};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use file_gateway::{
    config::{AppConfig, StorageKind},
    middleware::{AuthState, RefreshPolicy},
    routes::routes::{RouterOptions, routes},
    services::{
        file_service::FileService,
        identity_gateway::{IdentityProvider, KeycloakGateway},
        object_backend::{MemoryBackend, ObjectBackend, S3Backend},
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Environment file (optional) ---
    let dotenv = dotenvy::dotenv();

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting file-gateway with config: {:?}", cfg);

    // --- Object store ---
    let backend: Arc<dyn ObjectBackend> = match cfg.storage {
        StorageKind::S3 => Arc::new(S3Backend::connect(&cfg.store, cfg.upstream_timeout).await),
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; files are lost on restart");
            Arc::new(MemoryBackend::new(cfg.store.bucket.clone()))
        }
    };
    backend
        .ensure_bucket()
        .await
        .with_context(|| format!("preparing bucket `{}`", cfg.store.bucket))?;

    // --- Identity provider ---
    let identity: Arc<dyn IdentityProvider> = Arc::new(
        KeycloakGateway::new(cfg.identity.clone(), cfg.upstream_timeout)
            .context("building identity provider client")?,
    );

    // --- Build router ---
    let auth = AuthState::new(
        identity,
        RefreshPolicy {
            refresh_threshold: cfg.refresh_threshold,
            proactive_threshold: cfg.proactive_refresh_threshold,
        },
    );
    let state = AppState::new(auth, FileService::new(backend), cfg.presign_ttl);
    let app = routes(
        state,
        &RouterOptions {
            frontend_url: cfg.frontend_url.clone(),
            max_upload_bytes: cfg.max_upload_bytes,
        },
    )?;

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
