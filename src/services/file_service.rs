//! Per-subject namespacing over the single shared bucket.
//!
//! Every key handed to the backend is derived here as `<subject>/<name>`.
//! Nothing outside this type can address a raw bucket key, so one subject's
//! files stay invisible to every other subject.

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::debug;

use crate::models::file::{FileObject, FilePage};
use crate::services::object_backend::{
    ObjectBackend, ObjectStream, PutRequest, StoreError, StoreResult, StoredObject,
};

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Hard ceiling on a single page, whatever the caller asks for.
pub const MAX_PAGE_SIZE: usize = 100;

/// An upload as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub content: Bytes,
    pub content_type: String,
}

#[derive(Clone)]
pub struct FileService {
    backend: Arc<dyn ObjectBackend>,
}

impl FileService {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    /// Store `file` under the subject's prefix. An existing file with the same
    /// name is silently replaced.
    pub async fn upload(&self, subject_id: &str, file: NewFile) -> StoreResult<FileObject> {
        let key = scoped_key(subject_id, &file.name)?;
        let metadata = HashMap::from([
            ("uploaded-by".to_string(), subject_id.to_string()),
            (
                "upload-time".to_string(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ]);

        let stored = self
            .backend
            .put(PutRequest {
                key,
                body: file.content,
                content_type: file.content_type,
                metadata,
            })
            .await?;
        debug!(key = %stored.key, size = stored.size, "stored file");
        Ok(to_file_object(subject_id, stored))
    }

    /// One page of the subject's files in key order, starting strictly after
    /// `cursor` (a full storage key from a previous page).
    pub async fn list(
        &self,
        subject_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> StoreResult<FilePage> {
        let prefix = namespace(subject_id)?;
        if let Some(cursor) = cursor {
            if !cursor.starts_with(&prefix) {
                return Err(StoreError::InvalidCursor);
            }
        }

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        // One extra key tells whether another page exists.
        let fetch_limit = limit + 1;
        let mut objects = self.backend.list(&prefix, cursor, fetch_limit).await?;

        let mut next_cursor = None;
        if objects.len() == fetch_limit {
            objects.truncate(limit);
            next_cursor = objects.last().map(|obj| obj.key.clone());
        }

        Ok(FilePage {
            files: objects
                .into_iter()
                .map(|obj| to_file_object(subject_id, obj))
                .collect(),
            next_cursor,
        })
    }

    /// Metadata and payload stream for one of the subject's files.
    pub async fn download(
        &self,
        subject_id: &str,
        name: &str,
    ) -> StoreResult<(FileObject, ObjectStream)> {
        let key = scoped_key(subject_id, name)?;
        let (meta, stream) = self.backend.get(&key).await?;
        Ok((to_file_object(subject_id, meta), stream))
    }

    pub async fn stat(&self, subject_id: &str, name: &str) -> StoreResult<FileObject> {
        let key = scoped_key(subject_id, name)?;
        let meta = self.backend.stat(&key).await?;
        Ok(to_file_object(subject_id, meta))
    }

    /// Time-limited read-only URL for the subject's file. The file must exist.
    pub async fn presign(&self, subject_id: &str, name: &str, ttl: Duration) -> StoreResult<String> {
        let key = scoped_key(subject_id, name)?;
        self.backend.stat(&key).await?;
        self.backend.presign_get(&key, ttl).await
    }

    /// Remove the subject's file. Succeeds whether or not it existed.
    pub async fn delete(&self, subject_id: &str, name: &str) -> StoreResult<()> {
        let key = scoped_key(subject_id, name)?;
        self.backend.delete(&key).await?;
        debug!(%key, "deleted file");
        Ok(())
    }
}

/// `<subject>/`, the prefix every key of this subject starts with.
fn namespace(subject_id: &str) -> StoreResult<String> {
    if subject_id.is_empty()
        || subject_id.contains('/')
        || subject_id.bytes().any(|b| b.is_ascii_control())
    {
        return Err(StoreError::InvalidKey);
    }
    Ok(format!("{}/", subject_id))
}

/// Full storage key for `name` inside the subject's namespace.
///
/// Rejects names that are empty, absolute, have a `.` or `..` path segment,
/// contain backslashes or control characters, or that would produce an
/// over-long key.
fn scoped_key(subject_id: &str, name: &str) -> StoreResult<String> {
    let prefix = namespace(subject_id)?;
    if name.is_empty()
        || name.starts_with('/')
        || name.split('/').any(|seg| seg == "." || seg == "..")
    {
        return Err(StoreError::InvalidKey);
    }
    if name
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\')
    {
        return Err(StoreError::InvalidKey);
    }

    let key = prefix + name;
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidKey);
    }
    Ok(key)
}

fn to_file_object(subject_id: &str, obj: StoredObject) -> FileObject {
    let name = obj
        .key
        .strip_prefix(subject_id)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(&obj.key)
        .to_string();

    FileObject {
        name,
        key: obj.key,
        size: obj.size,
        content_type: obj.content_type,
        last_modified: obj.last_modified,
        etag: obj.etag,
    }
}
