//! Shared mock origin for proxy integration tests.
//!
//! Serves a deterministic byte pattern with full `HEAD` + `Range` support
//! and records every request so tests can assert "no redundant fetch".

// Each test binary uses its own subset of the fixture.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use url::Url;

pub fn pattern_byte(i: u64) -> u8 {
    (i % 256) as u8
}

pub fn pattern(start: u64, end: u64) -> Vec<u8> {
    (start..=end).map(pattern_byte).collect()
}

#[derive(Clone)]
struct OriginState {
    total: u64,
    content_disposition: Option<&'static str>,
    heads: Arc<AtomicUsize>,
    /// Every ranged GET issued against the data endpoint, inclusive.
    fetched_ranges: Arc<StdMutex<Vec<(u64, u64)>>>,
}

pub struct MockOrigin {
    base_url: Url,
    heads: Arc<AtomicUsize>,
    fetched_ranges: Arc<StdMutex<Vec<(u64, u64)>>>,
}

impl MockOrigin {
    pub async fn spawn(total: u64) -> Self {
        Self::spawn_with_disposition(total, None).await
    }

    pub async fn spawn_with_disposition(
        total: u64,
        content_disposition: Option<&'static str>,
    ) -> Self {
        let state = OriginState {
            total,
            content_disposition,
            heads: Arc::new(AtomicUsize::new(0)),
            fetched_ranges: Arc::new(StdMutex::new(Vec::new())),
        };
        let heads = Arc::clone(&state.heads);
        let fetched_ranges = Arc::clone(&state.fetched_ranges);

        let app = Router::new()
            .route("/data/{*name}", get(data_endpoint))
            .route("/empty", get(empty_endpoint))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
            heads,
            fetched_ranges,
        }
    }

    /// Data URL whose tail is `name` (drives name/extension derivation).
    pub fn url(&self, name: &str) -> String {
        self.base_url.join(&format!("data/{name}")).unwrap().to_string()
    }

    pub fn url_missing(&self) -> String {
        self.base_url.join("nowhere").unwrap().to_string()
    }

    pub fn url_empty(&self) -> String {
        self.base_url.join("empty").unwrap().to_string()
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn fetched_ranges(&self) -> Vec<(u64, u64)> {
        self.fetched_ranges.lock().unwrap().clone()
    }

    /// How many recorded fetches overlap `[start, end]`.
    pub fn fetches_overlapping(&self, start: u64, end: u64) -> usize {
        self.fetched_ranges()
            .iter()
            .filter(|(s, e)| *s <= end && *e >= start)
            .count()
    }
}

async fn data_endpoint(
    State(state): State<OriginState>,
    method: Method,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(
        header::CONTENT_TYPE,
        "application/octet-stream".parse().unwrap(),
    );
    if let Some(cd) = state.content_disposition {
        resp_headers.insert(header::CONTENT_DISPOSITION, cd.parse().unwrap());
    }

    if method == Method::HEAD {
        state.heads.fetch_add(1, Ordering::SeqCst);
        resp_headers.insert(header::CONTENT_LENGTH, state.total.into());
        return (StatusCode::OK, resp_headers, Vec::new());
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'));
    let Some((start_str, end_str)) = range else {
        // Non-range GET: full body with 200.
        return (StatusCode::OK, resp_headers, pattern(0, state.total - 1));
    };

    let start: u64 = start_str.parse().unwrap();
    let end: u64 = if end_str.is_empty() {
        state.total - 1
    } else {
        end_str.parse::<u64>().unwrap().min(state.total - 1)
    };
    if start > end {
        return (StatusCode::RANGE_NOT_SATISFIABLE, resp_headers, Vec::new());
    }

    state.fetched_ranges.lock().unwrap().push((start, end));
    resp_headers.insert(
        header::CONTENT_RANGE,
        format!("bytes {start}-{end}/{}", state.total)
            .parse()
            .unwrap(),
    );
    (StatusCode::PARTIAL_CONTENT, resp_headers, pattern(start, end))
}

async fn empty_endpoint(method: Method) -> impl IntoResponse {
    let mut resp_headers = HeaderMap::new();
    if method == Method::HEAD {
        resp_headers.insert(header::CONTENT_LENGTH, 0.into());
    }
    (StatusCode::OK, resp_headers, Vec::new())
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_for<F, Fut>(timeout: std::time::Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
