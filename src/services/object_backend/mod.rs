//! Raw access to the single shared bucket.
//!
//! Implementations know nothing about subjects: every key they see has already
//! been scoped by [`crate::services::file_service::FileService`]. Two
//! implementations exist, an S3 client for MinIO/S3 deployments and an
//! in-memory map for local development and tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::{collections::HashMap, io, time::Duration};
use thiserror::Error;

pub mod memory;
pub mod s3;

pub use memory::MemoryBackend;
pub use s3::S3Backend;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("invalid object key")]
    InvalidKey,
    #[error("cursor does not belong to this namespace")]
    InvalidCursor,
    #[error("object store unavailable during {op}: {message}")]
    Unavailable { op: &'static str, message: String },
    #[error("object store {op} failed: {message}")]
    Backend { op: &'static str, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Byte stream of an object's payload.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

/// Metadata the store reports for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// A fully buffered object write.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Create the configured bucket when it does not exist yet.
    async fn ensure_bucket(&self) -> StoreResult<()>;

    /// Check that the bucket is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Write an object, replacing any existing one under the same key.
    async fn put(&self, req: PutRequest) -> StoreResult<StoredObject>;

    async fn stat(&self, key: &str) -> StoreResult<StoredObject>;

    async fn get(&self, key: &str) -> StoreResult<(StoredObject, ObjectStream)>;

    /// List keys under `prefix` in lexicographic order, strictly after
    /// `start_after` when given, returning at most `max_keys` entries.
    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<Vec<StoredObject>>;

    /// Remove an object. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Issue a time-limited, read-only URL for `key`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> StoreResult<String>;
}

/// Strip the surrounding quotes S3 puts on ETag values.
pub(crate) fn unquote_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
