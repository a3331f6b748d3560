#![forbid(unsafe_code)]

use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Errors produced by origin access.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("timeout")]
    Timeout,

    #[error("http {status} for {url}")]
    HttpStatus { status: u16, url: Url },

    #[error("origin ignored range request (status {status})")]
    NotPartialContent { status: u16 },

    #[error("request failed after {max_retries} retries: {source}")]
    RetryExhausted { max_retries: u32, source: Box<Self> },

    #[error("client configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl NetError {
    /// Whether retrying the same request may help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::NotPartialContent { .. }
            | Self::RetryExhausted { .. }
            | Self::Config(_)
            | Self::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting keeps the full error chain
        // ("error sending request …: connection refused").
        Self::Http(format!("{e:#}"))
    }
}
