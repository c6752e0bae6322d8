//! HTTP handlers for upload, listing, download, public access and delete.
//! Storage concerns are delegated to `StorageService`; these handlers only
//! translate requests and shape responses.

use crate::{
    errors::AppError,
    models::file_record::FileRecord,
    services::storage_service::StorageService,
};
use axum::{
    Json,
    body::Body,
    extract::{
        ConnectInfo, Multipart, Path, Query, State, multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{io::SeekFrom, net::SocketAddr};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Largest accepted upload payload (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 << 20;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Attachment,
    Inline,
}

impl Disposition {
    fn as_str(self) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::Inline => "inline",
        }
    }
}

/// `POST /api/upload` — multipart field `file`, buffered in memory.
pub async fn upload_file(
    State(service): State<StorageService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart =
        multipart.map_err(|err| AppError::bad_request(format!("Failed to get file: {err}")))?;

    let (original_name, payload) = read_upload_field(&mut multipart).await?;
    let record = service
        .upload(&original_name, payload, &peer.to_string())
        .await?;

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let body = UploadResponse {
        message: format!("File '{}' successfully uploaded.", record.stored_name),
        url: format!("https://{}/file/{}", host, record.stored_name),
        filename: record.stored_name,
    };

    Ok((StatusCode::CREATED, Json(body)))
}

async fn read_upload_field(multipart: &mut Multipart) -> Result<(String, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("Failed to get file: {err}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let payload = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("Failed to read file: {err}")))?;
        if payload.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::bad_request("File exceeds the 10 MiB limit"));
        }
        return Ok((original_name, payload));
    }
    Err(AppError::bad_request(
        "Failed to get file: missing `file` field",
    ))
}

/// `GET /api/list` — every record, newest first.
pub async fn list_files(
    State(service): State<StorageService>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(service.list().await?))
}

/// `GET /api/download?name=X` — stream a file as an attachment.
pub async fn download_file(
    State(service): State<StorageService>,
    Query(q): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let name = required_name(q)?;
    serve_file(&service, &name, Disposition::Attachment, &headers).await
}

/// `HEAD /api/download?name=X` — size and disposition only.
pub async fn head_download_file(
    State(service): State<StorageService>,
    Query(q): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let name = required_name(q)?;
    head_file(&service, &name, Disposition::Attachment).await
}

/// `GET /file/{name}` — unauthenticated inline access.
pub async fn public_file(
    State(service): State<StorageService>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    serve_file(&service, &name, Disposition::Inline, &headers).await
}

/// `HEAD /file/{name}`
pub async fn head_public_file(
    State(service): State<StorageService>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    head_file(&service, &name, Disposition::Inline).await
}

/// `DELETE /api/delete` with body `{"filename": "..."}`.
pub async fn delete_file(
    State(service): State<StorageService>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|_| AppError::bad_request("Invalid request"))?;
    let outcome = service.delete(&req.filename).await?;
    if !outcome.record_removed {
        tracing::debug!("{} deleted with its record left behind", req.filename);
    }

    let mut response = Response::new(Body::from(format!(
        "File '{}' successfully deleted.",
        req.filename
    )));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok(response)
}

fn required_name(q: DownloadQuery) -> Result<String, AppError> {
    match q.name {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(AppError::bad_request("Missing 'name' parameter")),
    }
}

async fn head_file(
    service: &StorageService,
    name: &str,
    disposition: Disposition,
) -> Result<Response, AppError> {
    let size = service.stat(name).await?;
    let mut response = Response::new(Body::empty());
    set_file_headers(response.headers_mut(), name, disposition, size);
    Ok(response)
}

async fn serve_file(
    service: &StorageService,
    name: &str,
    disposition: Disposition,
    req_headers: &HeaderMap,
) -> Result<Response, AppError> {
    let (mut file, size) = service.open(name).await?;

    let range = req_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, size))
        .unwrap_or(ByteRange::Full);

    let mut response = match range {
        ByteRange::Full => {
            let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
            set_file_headers(response.headers_mut(), name, disposition, size);
            response
        }
        ByteRange::Partial { start, end } => {
            let len = end - start + 1;
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|err| AppError::internal(err.to_string()))?;
            let stream = ReaderStream::new(file.take(len));
            let mut response = Response::new(Body::from_stream(stream));
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            set_file_headers(response.headers_mut(), name, disposition, len);
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        ByteRange::Unsatisfiable => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
    };
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}

fn set_file_headers(headers: &mut HeaderMap, name: &str, disposition: Disposition, len: u64) {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("{}; filename={}", disposition.as_str(), name))
            .unwrap_or_else(|_| HeaderValue::from_static(disposition.as_str())),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
}

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Interpret a `Range` header against a body of `size` bytes.
///
/// Only a single `bytes=` range is honoured; anything else serves the full body.
fn parse_range(value: &str, size: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return ByteRange::Full;
    };

    let (start, end) = match (first.trim(), last.trim()) {
        ("", "") => return ByteRange::Full,
        ("", suffix) => {
            let Ok(n) = suffix.parse::<u64>() else {
                return ByteRange::Full;
            };
            if n == 0 || size == 0 {
                return ByteRange::Unsatisfiable;
            }
            (size.saturating_sub(n), size - 1)
        }
        (start, end) => {
            let Ok(start) = start.parse::<u64>() else {
                return ByteRange::Full;
            };
            let end = if end.is_empty() {
                size.saturating_sub(1)
            } else {
                match end.parse::<u64>() {
                    Ok(end) if end >= start => end.min(size.saturating_sub(1)),
                    _ => return ByteRange::Full,
                }
            };
            if start >= size {
                return ByteRange::Unsatisfiable;
            }
            (start, end)
        }
    };
    ByteRange::Partial { start, end }
}
