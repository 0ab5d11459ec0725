//! Represents a file stored under a subject's namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical record of a stored file.
///
/// `key` is the full storage key (`<subject>/<name>`); `name` is the same key
/// with the owner prefix stripped, which is all a caller ever needs to address
/// the file again.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileObject {
    /// Full storage key inside the shared bucket.
    pub key: String,

    /// Display name (key relative to the owner's prefix).
    pub name: String,

    /// Size in bytes.
    pub size: i64,

    /// Content type (MIME type), when the store reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Timestamp when the object was last written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// Integrity tag reported by the store, unquoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// One page of a namespace listing.
#[derive(Debug, Clone)]
pub struct FilePage {
    pub files: Vec<FileObject>,

    /// Full storage key of the last returned file, set only when more files follow.
    pub next_cursor: Option<String>,
}

impl FilePage {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}
