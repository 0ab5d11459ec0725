//! S3 / MinIO backed bucket.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, timeout::TimeoutConfig};
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as AwsDateTime},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::{error::Error as StdError, fmt, time::Duration};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::{
    ObjectBackend, ObjectStream, PutRequest, StoreError, StoreResult, StoredObject, unquote_etag,
};
use crate::config::StoreConfig;

/// Page size used when walking a listing that needs more than one round trip.
const MAX_LIST_PAGE: usize = 1000;

/// Object backend talking to an S3-compatible endpoint with static credentials.
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a path-style client for the configured endpoint.
    pub async fn connect(cfg: &StoreConfig, timeout: Duration) -> Self {
        let creds = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "file-gateway",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(creds)
            .region(Region::new(cfg.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(timeout)
                    .build(),
            )
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(cfg.endpoint_url())
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: cfg.bucket.clone(),
        }
    }

    async fn bucket_exists(&self) -> StoreResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(backend_error("head_bucket", err)),
        }
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn ensure_bucket(&self) -> StoreResult<()> {
        if self.bucket_exists().await? {
            debug!(bucket = %self.bucket, "bucket exists");
            return Ok(());
        }

        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| backend_error("create_bucket", err))?;
        info!(bucket = %self.bucket, "created bucket");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.bucket_exists().await? {
            Ok(())
        } else {
            Err(StoreError::Backend {
                op: "head_bucket",
                message: format!("bucket `{}` does not exist", self.bucket),
            })
        }
    }

    async fn put(&self, req: PutRequest) -> StoreResult<StoredObject> {
        let size = req.body.len() as i64;
        let mut builder = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&req.key)
            .content_type(&req.content_type)
            .content_length(size)
            .body(ByteStream::from(req.body));
        for (name, value) in &req.metadata {
            builder = builder.metadata(name, value);
        }

        let output = builder
            .send()
            .await
            .map_err(|err| backend_error("put_object", err))?;

        Ok(StoredObject {
            key: req.key,
            size,
            content_type: Some(req.content_type),
            last_modified: Some(Utc::now()),
            etag: output.e_tag().map(unquote_etag),
        })
    }

    async fn stat(&self, key: &str) -> StoreResult<StoredObject> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    StoreError::NotFound
                } else {
                    backend_error("head_object", err)
                }
            })?;

        Ok(StoredObject {
            key: key.to_string(),
            size: output.content_length().unwrap_or_default(),
            content_type: output.content_type().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(unquote_etag),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<(StoredObject, ObjectStream)> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StoreError::NotFound
                } else {
                    backend_error("get_object", err)
                }
            })?;

        let meta = StoredObject {
            key: key.to_string(),
            size: output.content_length().unwrap_or_default(),
            content_type: output.content_type().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(unquote_etag),
        };
        let stream = ReaderStream::new(output.body.into_async_read()).boxed();
        Ok((meta, stream))
    }

    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<Vec<StoredObject>> {
        let mut objects = Vec::with_capacity(max_keys.min(MAX_LIST_PAGE));
        let mut continuation: Option<String> = None;

        while objects.len() < max_keys {
            let page_size = (max_keys - objects.len()).min(MAX_LIST_PAGE);
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(page_size as i32);
            request = match (&continuation, start_after) {
                (Some(token), _) => request.continuation_token(token),
                (None, Some(after)) => request.start_after(after),
                (None, None) => request,
            };

            let output = request
                .send()
                .await
                .map_err(|err| backend_error("list_objects_v2", err))?;

            for entry in output.contents() {
                let Some(key) = entry.key() else { continue };
                objects.push(StoredObject {
                    key: key.to_string(),
                    size: entry.size().unwrap_or_default(),
                    content_type: None,
                    last_modified: entry.last_modified().and_then(to_chrono),
                    etag: entry.e_tag().map(unquote_etag),
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        objects.truncate(max_keys);
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| backend_error("delete_object", err))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(ttl).map_err(|err| StoreError::Backend {
            op: "presign_get",
            message: err.to_string(),
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| backend_error("presign_get", err))?;
        Ok(request.uri().to_string())
    }
}

/// Classify an SDK failure: transport trouble is `Unavailable`, everything
/// else a generic backend failure.
fn backend_error<E, R>(op: &'static str, err: SdkError<E, R>) -> StoreError
where
    E: StdError + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StoreError::Unavailable { op, message }
        }
        _ => StoreError::Backend { op, message },
    }
}

fn to_chrono(ts: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}
