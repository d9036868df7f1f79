//! Range-aware delivery of registered media files to receivers.

use std::io::SeekFrom;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::AppState;
use crate::{CastError, Result};

#[derive(Debug, PartialEq, Eq)]
enum RangeOutcome {
    /// No Range header: serve the whole file with 200.
    Full,
    /// Inclusive byte span, already clamped to the file size.
    Partial { start: u64, end: u64 },
    /// Syntactically valid but starts at or past the end of the file.
    Unsatisfiable,
    Malformed,
}

/// Interpret a `Range` header against a file of `size` bytes. Only single
/// `bytes=` ranges are honored; multipart ranges are rejected as malformed.
fn parse_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(header) = header else {
        return RangeOutcome::Full;
    };
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Malformed;
    };
    if spec.contains(',') {
        return RangeOutcome::Malformed;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return RangeOutcome::Malformed;
    };
    let (start, end) = (start.trim(), end.trim());

    // Suffix form: "-N" means the final N bytes.
    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return RangeOutcome::Malformed;
        };
        if suffix == 0 || size == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start_at) = start.parse::<u64>() else {
        return RangeOutcome::Malformed;
    };
    if start_at >= size {
        return RangeOutcome::Unsatisfiable;
    }
    let end_at = if end.is_empty() {
        size - 1
    } else {
        match end.parse::<u64>() {
            Ok(e) if e >= start_at => e.min(size - 1),
            Ok(_) => return RangeOutcome::Malformed,
            Err(_) => return RangeOutcome::Malformed,
        }
    };
    RangeOutcome::Partial {
        start: start_at,
        end: end_at,
    }
}

/// `GET /media/{token}`. 200 with the full body, 206 for a satisfiable
/// range, 404 for an unknown token, 416 past the end, 400 when the header
/// is malformed.
pub async fn serve_media(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let entry = state
        .store
        .get(&token)
        .ok_or_else(|| CastError::NotFound(format!("unknown media token {token}")))?;
    let mut file = tokio::fs::File::open(&entry.path)
        .await
        .map_err(|_| CastError::NotFound(format!("media behind token {token} is gone")))?;
    let size = file.metadata().await?.len();

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    match parse_range(range, size) {
        RangeOutcome::Full => {
            let stream = ReaderStream::new(file);
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, entry.content_type),
                    (header::CONTENT_LENGTH, size.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                Body::from_stream(stream),
            )
                .into_response())
        }
        RangeOutcome::Partial { start, end } => {
            file.seek(SeekFrom::Start(start)).await?;
            let span = end - start + 1;
            debug!("Serving token {} bytes {}-{}/{}", token, start, end, size);
            let stream = ReaderStream::new(file.take(span));
            Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, entry.content_type),
                    (header::CONTENT_LENGTH, span.to_string()),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {start}-{end}/{size}"),
                    ),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                Body::from_stream(stream),
            )
                .into_response())
        }
        RangeOutcome::Unsatisfiable => Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{size}"))],
            Body::empty(),
        )
            .into_response()),
        RangeOutcome::Malformed => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "malformed Range header" })),
        )
            .into_response()),
    }
}
