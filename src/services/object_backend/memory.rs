//! In-memory bucket, ordered by key like S3 listings.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{
    collections::{BTreeMap, HashMap},
    io,
    ops::Bound,
    time::Duration,
};
use tokio::sync::RwLock;

use super::{ObjectBackend, ObjectStream, PutRequest, StoreError, StoreResult, StoredObject};

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
    etag: String,
    metadata: HashMap<String, String>,
}

impl MemoryObject {
    fn describe(&self, key: &str) -> StoredObject {
        StoredObject {
            key: key.to_string(),
            size: self.body.len() as i64,
            content_type: Some(self.content_type.clone()),
            last_modified: Some(self.last_modified),
            etag: Some(self.etag.clone()),
        }
    }
}

/// Bucket kept in process memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bucket: String,
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Metadata recorded for `key`, if present.
    pub async fn metadata(&self, key: &str) -> Option<HashMap<String, String>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|obj| obj.metadata.clone())
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn ensure_bucket(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn put(&self, req: PutRequest) -> StoreResult<StoredObject> {
        let object = MemoryObject {
            etag: format!("{:x}", md5::compute(&req.body)),
            body: req.body,
            content_type: req.content_type,
            last_modified: Utc::now(),
            metadata: req.metadata,
        };
        let described = object.describe(&req.key);
        self.objects.write().await.insert(req.key, object);
        Ok(described)
    }

    async fn stat(&self, key: &str) -> StoreResult<StoredObject> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|obj| obj.describe(key))
            .ok_or(StoreError::NotFound)
    }

    async fn get(&self, key: &str) -> StoreResult<(StoredObject, ObjectStream)> {
        let guard = self.objects.read().await;
        let object = guard.get(key).ok_or(StoreError::NotFound)?;
        let body = object.body.clone();
        Ok((object.describe(key), stream::iter([Ok::<_, io::Error>(body)]).boxed()))
    }

    async fn list(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<Vec<StoredObject>> {
        let lower = match start_after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let guard = self.objects.read().await;
        Ok(guard
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(max_keys)
            .map(|(key, obj)| obj.describe(key))
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        let expires = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        Ok(format!(
            "memory://{}/{}?expires={}",
            self.bucket,
            key,
            expires.timestamp()
        ))
    }
}
