#![forbid(unsafe_code)]

use spool_net::NetError;
use spool_storage::StorageError;
use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors surfaced by the proxy.
///
/// The HTTP surface maps these onto status codes (`BadRequest` → 400,
/// `OriginUnavailable` → 502, everything else → 500; unsatisfiable ranges
/// answer 416 directly). The programmatic surface propagates only
/// `BadRequest`, `NotInitialized`, and I/O failures of explicit calls;
/// "operation did not apply" is a boolean, and background failures are
/// logged with the resource id and the failing operation.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("origin unavailable: {0}")]
    OriginUnavailable(NetError),

    #[error("origin stream failed: {0}")]
    OriginStream(NetError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("proxy is not initialized (or already disposed)")]
    NotInitialized,
}
