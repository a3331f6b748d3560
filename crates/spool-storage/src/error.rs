#![forbid(unsafe_code)]

use thiserror::Error;

/// Result type used by `spool-storage`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by storage primitives.
///
/// Higher-level crates wrap this to add domain context (resource id, URL).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("meta file corrupt: {0}")]
    Corrupt(String),

    #[error("invalid range: {start}..={end} for size {total}")]
    InvalidRange { start: u64, end: u64, total: u64 },

    #[error("operation cancelled")]
    Cancelled,
}
