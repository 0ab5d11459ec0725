//! HTTP handlers for the caller's files.
//!
//! Every handler takes the subject from the [`AuthContext`] placed by the auth
//! middleware and passes it to `FileService`, which does the namespacing. File
//! ids in paths are names relative to the caller's namespace.

use crate::{
    errors::AppError,
    middleware::AuthContext,
    models::file::FileObject,
    services::file_service::{FileService, MAX_PAGE_SIZE, NewFile},
    state::PresignTtl,
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    /// Kept as text so that junk falls back to the default instead of a 400.
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    pub files: Vec<FileObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUrlResponse {
    pub url: String,
    pub expires_in: u64,
    pub file_id: String,
}

/// POST `/files/upload` - multipart form with a `file` field.
pub async fn upload_file(
    State(files): State<FileService>,
    Extension(auth): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(base_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::bad_request("Uploaded file has no name"))?
            .to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let content = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;

        let object = files
            .upload(
                auth.subject_id(),
                NewFile {
                    name,
                    content,
                    content_type,
                },
            )
            .await?;
        info!(subject = %auth.subject_id(), key = %object.key, size = object.size, "file uploaded");
        return Ok((StatusCode::CREATED, Json(object)));
    }

    Err(AppError::bad_request("No file uploaded"))
}

/// GET `/files?limit=&cursor=`
pub async fn list_files(
    State(files): State<FileService>,
    Extension(auth): Extension<AuthContext>,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<ListFilesResponse>, AppError> {
    let limit = page_size(q.limit.as_deref());
    let cursor = q
        .cursor
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(decode_cursor);

    let page = files
        .list(auth.subject_id(), limit, cursor.as_deref())
        .await?;
    debug!(subject = %auth.subject_id(), count = page.files.len(), "listed files");

    Ok(Json(ListFilesResponse {
        has_more: page.has_more(),
        next_cursor: page.next_cursor.as_deref().map(encode_cursor),
        files: page.files,
    }))
}

/// GET `/files/{id}` - presigned download URL.
pub async fn get_file(
    State(files): State<FileService>,
    State(PresignTtl(ttl)): State<PresignTtl>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<FileUrlResponse>, AppError> {
    let url = files.presign(auth.subject_id(), &id, ttl).await?;
    Ok(Json(FileUrlResponse {
        url,
        expires_in: ttl.as_secs(),
        file_id: id,
    }))
}

/// GET `/files/{id}/download` - streams the payload.
pub async fn download_file(
    State(files): State<FileService>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (meta, stream) = files.download(auth.subject_id(), &id).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/files/{id}`
pub async fn delete_file(
    State(files): State<FileService>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    files.delete(auth.subject_id(), &id).await?;
    info!(subject = %auth.subject_id(), file = %id, "file deleted");
    Ok(Json(json!({ "message": "File deleted successfully" })))
}

fn page_size(raw: Option<&str>) -> usize {
    match raw.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(n) if n > 0 => (n as usize).min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Final path component of a client-supplied file name.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

fn set_download_headers(headers: &mut HeaderMap, meta: &FileObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size.max(0)));

    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(base_name(&meta.name)))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    headers.insert(
        "content-description",
        HeaderValue::from_static("File Transfer"),
    );
    headers.insert(
        "content-transfer-encoding",
        HeaderValue::from_static("binary"),
    );

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Some(modified) = meta.last_modified {
        let http_date = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&http_date) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

/// `attachment` with a quoted ASCII `filename` and, for names that do not fit
/// in ASCII, an RFC 5987 `filename*` carrying the UTF-8 original.
fn content_disposition(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| match c {
            '"' => '\'',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    if name.is_ascii() {
        format!("attachment; filename=\"{}\"", ascii)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            ascii,
            urlencoding::encode(name)
        )
    }
}

fn encode_cursor(key: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(key)
}

/// Cursors are issued base64 encoded; a bare storage key is accepted too.
fn decode_cursor(cursor: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| cursor.to_string())
}
