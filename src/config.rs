use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

/// Where file payloads are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// S3-compatible object store (MinIO in the default deployment).
    S3,
    /// Process memory; for local development only.
    Memory,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "s3" | "minio" => Ok(StorageKind::S3),
            "memory" => Ok(StorageKind::Memory),
            other => bail!("unknown storage backend `{}`", other),
        }
    }
}

/// Identity provider (Keycloak realm) connection settings.
#[derive(Clone)]
pub struct IdentityConfig {
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Object store connection settings.
#[derive(Clone)]
pub struct StoreConfig {
    /// `host:port`, or a full URL with scheme.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub use_ssl: bool,
}

impl StoreConfig {
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint)
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    pub storage: StorageKind,
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    /// Remaining lifetime below which the auth stage refreshes before resolving.
    pub refresh_threshold: Duration,
    /// Remaining lifetime below which the second stage refreshes in the background.
    pub proactive_refresh_threshold: Duration,
    pub presign_ttl: Duration,
    /// Applied to every outbound call to the identity provider and object store.
    pub upstream_timeout: Duration,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Authenticated per-user file storage API")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub storage: Option<StorageKind>,

    /// Allowed CORS origin (overrides FRONTEND_URL)
    #[arg(long)]
    pub frontend_url: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over variables supplied by `lookup`, over defaults.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            var(name).with_context(|| format!("missing required environment variable {}", name))
        };

        // --- Environment fallback ---
        let env_host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "PORT", 8080u16)?;
        let env_frontend = var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".into());
        let env_storage = match var("STORAGE_BACKEND") {
            Some(value) => value
                .parse::<StorageKind>()
                .with_context(|| format!("parsing STORAGE_BACKEND value `{}`", value))?,
            None => StorageKind::S3,
        };

        let identity = IdentityConfig {
            base_url: required("KEYCLOAK_URL")?.trim_end_matches('/').to_string(),
            realm: required("KEYCLOAK_REALM")?,
            client_id: required("KEYCLOAK_CLIENT_ID")?,
            client_secret: required("KEYCLOAK_CLIENT_SECRET")?,
        };

        let store = StoreConfig {
            endpoint: var("MINIO_ENDPOINT").unwrap_or_else(|| "localhost:9000".into()),
            access_key: var("MINIO_ACCESS_KEY").unwrap_or_default(),
            secret_key: var("MINIO_SECRET_KEY").unwrap_or_default(),
            bucket: var("MINIO_BUCKET").unwrap_or_else(|| "user-files".into()),
            region: var("MINIO_REGION").unwrap_or_else(|| "us-east-1".into()),
            use_ssl: var("MINIO_USE_SSL").is_some_and(|v| v.eq_ignore_ascii_case("true")),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            frontend_url: args.frontend_url.unwrap_or(env_frontend),
            storage: args.storage.unwrap_or(env_storage),
            identity,
            store,
            refresh_threshold: Duration::from_secs(parse_var(
                &var,
                "TOKEN_REFRESH_THRESHOLD_SECS",
                120,
            )?),
            proactive_refresh_threshold: Duration::from_secs(parse_var(
                &var,
                "PROACTIVE_REFRESH_THRESHOLD_SECS",
                300,
            )?),
            presign_ttl: Duration::from_secs(parse_var(&var, "PRESIGN_TTL_SECS", 3600)?),
            upstream_timeout: Duration::from_secs(parse_var(&var, "UPSTREAM_TIMEOUT_SECS", 30)?),
            max_upload_bytes: parse_var(&var, "MAX_UPLOAD_BYTES", 100 * 1024 * 1024)?,
        };

        if cfg.storage == StorageKind::S3
            && (cfg.store.access_key.is_empty() || cfg.store.secret_key.is_empty())
        {
            bail!("MINIO_ACCESS_KEY and MINIO_SECRET_KEY are required for the s3 storage backend");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}
