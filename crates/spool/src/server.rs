#![forbid(unsafe_code)]

//! The hybrid range server: one loopback endpoint that interleaves cache
//! reads and origin fetches into a single contiguous `206` body.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_stream::try_stream;
use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use spool_net::{NetError, OriginSource};
use spool_storage::StorageError;
use tracing::{debug, warn};

use crate::completer;
use crate::error::ProxyError;
use crate::proxy::ProxyInner;
use crate::resource::ResourceEntry;

/// Window size of the hybrid loop: cache-read granularity and the span of a
/// single origin fetch issued on behalf of a live request.
pub(crate) const SERVE_CHUNK: u64 = 1024 * 1024;

pub(crate) fn router(inner: Arc<ProxyInner>) -> Router {
    Router::new()
        .route("/stream", get(stream_handler))
        .with_state(inner)
}

/// Parse a `Range` request header against a known total size.
///
/// Accepts `bytes=s-e` and `bytes=s-`. A missing or unparseable header is
/// treated as `bytes=0-` (this fallback is pinned behavior, not an error).
/// The end is clamped to `total - 1`; `Err(())` means `416`.
pub(crate) fn parse_range(header: Option<&str>, total: u64) -> Result<(u64, u64), ()> {
    let full = (0, total - 1);
    let Some(raw) = header else { return Ok(full) };
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return Ok(full);
    };
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return Ok(full);
    };
    let Ok(start) = start_str.trim().parse::<u64>() else {
        return Ok(full);
    };
    let end = if end_str.trim().is_empty() {
        total - 1
    } else {
        match end_str.trim().parse::<u64>() {
            Ok(end) => end.min(total - 1),
            Err(_) => return Ok(full),
        }
    };
    if start > end { Err(()) } else { Ok((start, end)) }
}

fn status_for(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ProxyError::OriginUnavailable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn stream_handler(
    State(inner): State<Arc<ProxyInner>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some(url_raw) = params.get("url") else {
        return (StatusCode::BAD_REQUEST, "missing url parameter").into_response();
    };

    let entry = match inner.ensure_resource(url_raw).await {
        Ok(entry) => entry,
        Err(error) => {
            warn!(url = %url_raw, %error, "stream request rejected");
            return (status_for(&error), error.to_string()).into_response();
        }
    };

    let total = entry.total_size();
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let Ok((start, end)) = parse_range(range_header, total) else {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&format!("bytes */{total}")) {
            headers.insert(header::CONTENT_RANGE, v);
        }
        return (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response();
    };

    debug!(id = %entry.id, start, end, total, "serving range");

    // The first live request for a resource also queues background
    // completion; later requests leave the flag set.
    if inner.config.auto_complete
        && !entry.promoted
        && !entry.completer_enqueued.swap(true, Ordering::SeqCst)
    {
        completer::spawn(Arc::clone(&inner), Arc::clone(&entry));
    }

    let mime = entry
        .state
        .lock()
        .mime_type
        .clone()
        .unwrap_or_else(|| "video/mp4".to_string());

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&mime).unwrap_or_else(|_| HeaderValue::from_static("video/mp4")),
    );
    if let Ok(v) = HeaderValue::from_str(&(end - start + 1).to_string()) {
        response_headers.insert(header::CONTENT_LENGTH, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")) {
        response_headers.insert(header::CONTENT_RANGE, v);
    }

    let body = Body::from_stream(hybrid_body(inner, entry, start, end));
    (StatusCode::PARTIAL_CONTENT, response_headers, body).into_response()
}

/// Produce the bytes of `[start, end]` by alternating cache reads and
/// origin fetches that tee into the sparse file.
///
/// The per-resource file lock is taken around each individual read or write
/// and released between chunks, so the completer and other connections for
/// the same resource interleave. An error mid-body ends the stream, which
/// closes the connection; bytes already written stay in the cache.
fn hybrid_body(
    inner: Arc<ProxyInner>,
    entry: Arc<ResourceEntry>,
    start: u64,
    end: u64,
) -> impl Stream<Item = Result<Bytes, ProxyError>> {
    let serve_guard = crate::resource::ServeGuard::new(Arc::clone(&entry));
    try_stream! {
        let _serve_guard = serve_guard;
        let mut pos = start;
        while pos <= end {
            if entry.cancel.is_cancelled() {
                Err(ProxyError::Storage(StorageError::Cancelled))?;
            }
            let win_end = (pos + SERVE_CHUNK - 1).min(end);

            // `next_gap` decides granularity: a cached stretch is read from
            // disk up to the window or the gap, a missing stretch is fetched
            // up to the window or the end of the gap. Cached bytes are never
            // re-fetched.
            let gap = entry.state.lock().ranges.next_gap(pos);
            let (serve_cached, upto) = match gap {
                None => (true, win_end),
                Some((gap_start, _)) if gap_start > win_end => (true, win_end),
                Some((gap_start, _)) if gap_start > pos => (true, (gap_start - 1).min(win_end)),
                Some((_, gap_end)) => (false, gap_end.min(win_end)),
            };

            if serve_cached {
                let data = {
                    let _guard = entry.file_lock.lock().await;
                    entry.sparse.read_at(pos, (upto - pos + 1) as usize).await?
                };
                yield Bytes::from(data);
            } else {
                let mut upstream = entry
                    .source()
                    .fetch(pos, upto)
                    .await
                    .map_err(ProxyError::OriginStream)?;
                let mut offset = pos;
                while let Some(chunk) = upstream.next().await {
                    let chunk = chunk.map_err(ProxyError::OriginStream)?;
                    if chunk.is_empty() {
                        continue;
                    }
                    // An origin overrunning the requested window is clamped.
                    let remaining = (upto - offset + 1) as usize;
                    let chunk = if chunk.len() > remaining {
                        chunk.slice(0..remaining)
                    } else {
                        chunk
                    };
                    {
                        let _guard = entry.file_lock.lock().await;
                        entry.sparse.write_at(offset, &chunk).await?;
                    }
                    let (_, complete) = entry.commit_chunk(&inner.bus, offset, &chunk);
                    if complete {
                        // Completion forces the save instead of waiting out
                        // the debounce window.
                        entry.saver.flush().await;
                    }
                    offset += chunk.len() as u64;
                    yield chunk;
                    if offset > upto {
                        break;
                    }
                }
                if offset <= upto {
                    Err(ProxyError::OriginStream(NetError::Http(
                        "origin stream ended before the requested range".to_string(),
                    )))?;
                }
            }
            pos = upto + 1;
        }
    }
}
