#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

use crate::{NetError, NetResult};

/// Plain string header map for extra request headers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

/// Byte range of an upstream request, inclusive with an optional end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    #[must_use]
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn to_header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Forward-proxy scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Socks5,
}

/// Optional forward proxy between this process and the origin.
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardProxy {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    /// Basic credentials (user, password).
    pub credentials: Option<(String, String)>,
}

impl ForwardProxy {
    pub(crate) fn to_reqwest(&self) -> NetResult<reqwest::Proxy> {
        let scheme = match self.scheme {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks5 => "socks5",
        };
        let url = format!("{scheme}://{}:{}", self.host, self.port);
        let mut proxy = reqwest::Proxy::all(&url).map_err(|e| NetError::Config(e.to_string()))?;
        if let Some((user, pass)) = &self.credentials {
            proxy = proxy.basic_auth(user, pass);
        }
        Ok(proxy)
    }
}

/// Exponential backoff policy for idempotent requests.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
        exponential.min(self.max_delay)
    }
}

/// Origin-access configuration.
#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: Option<String>,
    pub forward_proxy: Option<ForwardProxy>,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            user_agent: None,
            forward_proxy: None,
        }
    }
}
