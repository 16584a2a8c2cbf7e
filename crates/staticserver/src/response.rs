//! HTTP response construction with range request support

use std::io::SeekFrom;
use std::path::Path;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::path::RequestMapping;

/// Request headers browser fetch/XHR clients may send
const CORS_ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept, Cache-Control, Range";

const CORS_ALLOW_METHODS: &str = "GET";

/// Build the response for a resolved request
///
/// # Arguments
/// * `mapping` - Result of path resolution
/// * `headers` - Request headers; only `Range` is consulted
pub async fn build(mapping: &RequestMapping, headers: &HeaderMap) -> Response {
    let Some(path) = mapping.file_path() else {
        return not_found();
    };

    match serve_file(path, headers).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Failed to open {}: {}", path.display(), e);
            not_found()
        }
    }
}

/// 404 with an empty body
pub fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// Stream a file, honouring a single byte range if requested
async fn serve_file(path: &Path, headers: &HeaderMap) -> std::io::Result<Response> {
    let file = File::open(path).await?;
    let file_size = file.metadata().await?.len();

    let mime_type = mime_guess::from_path(path).first_or_octet_stream();
    let mime_type = HeaderValue::from_str(mime_type.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| ByteRange::parse(value, file_size));

    match range {
        Some(ByteRange::Satisfiable { start, end }) => {
            partial_content(file, file_size, start, end, mime_type).await
        }
        Some(ByteRange::Unsatisfiable) => Ok(range_not_satisfiable(file_size)),
        None => {
            let body = Body::from_stream(ReaderStream::new(file));
            Ok(file_response(StatusCode::OK, mime_type, file_size, body))
        }
    }
}

async fn partial_content(
    mut file: File,
    file_size: u64,
    start: u64,
    end: u64,
    mime_type: HeaderValue,
) -> std::io::Result<Response> {
    let content_length = end - start + 1;
    file.seek(SeekFrom::Start(start)).await?;

    let body = Body::from_stream(ReaderStream::new(file.take(content_length)));
    let mut response = file_response(StatusCode::PARTIAL_CONTENT, mime_type, content_length, body);

    if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, file_size)) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }

    Ok(response)
}

fn range_not_satisfiable(file_size: u64) -> Response {
    let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", file_size)) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
}

/// File response with content headers and permissive CORS
fn file_response(status: StatusCode, mime_type: HeaderValue, length: u64, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, mime_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );

    response
}

/// A parsed single-range `Range` header
#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    /// Inclusive byte range within the file
    Satisfiable { start: u64, end: u64 },
    Unsatisfiable,
}

impl ByteRange {
    /// Parse `bytes=a-b`, `bytes=a-` or `bytes=-n`
    ///
    /// Returns `None` for malformed or multi-range headers, in which case the
    /// whole file is served.
    fn parse(value: &str, file_size: u64) -> Option<Self> {
        let ranges = value.trim().strip_prefix("bytes=")?;
        if ranges.contains(',') {
            return None;
        }

        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        let range = if start.is_empty() {
            // Suffix range: the last `n` bytes
            let suffix: u64 = end.parse().ok()?;
            if suffix == 0 || file_size == 0 {
                return Some(ByteRange::Unsatisfiable);
            }
            let start = file_size.saturating_sub(suffix);
            ByteRange::Satisfiable { start, end: file_size - 1 }
        } else {
            let start: u64 = start.parse().ok()?;
            let end: Option<u64> = if end.is_empty() { None } else { Some(end.parse().ok()?) };

            if let Some(end) = end {
                if end < start {
                    return None;
                }
            }
            if start >= file_size {
                return Some(ByteRange::Unsatisfiable);
            }

            let last = file_size - 1;
            ByteRange::Satisfiable {
                start,
                end: end.map_or(last, |end| end.min(last)),
            }
        };

        Some(range)
    }
}
