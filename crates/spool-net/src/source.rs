#![forbid(unsafe_code)]

//! Origin access: `HEAD` for resource attributes, ranged `GET` for bytes.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header;
use spool_core::{derive_extension, derive_file_name, parse_content_disposition};
use spool_events::{EventBus, FileStat, ProxyEvent};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{Headers, NetError, NetOptions, NetResult, RangeSpec};

/// Lazy stream of body chunks from an origin fetch. Dropping the stream
/// closes the connection and cancels the transfer.
pub type ByteStream = Pin<Box<dyn Stream<Item = NetResult<Bytes>> + Send>>;

/// Attributes learned from an origin `HEAD`.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadInfo {
    pub total_size: u64,
    pub mime_type: Option<String>,
    pub content_disposition: Option<String>,
}

/// Capability to read a remote resource by byte range.
///
/// Dropping an implementation releases its client.
#[async_trait]
pub trait OriginSource: Send + Sync {
    /// Issue (or replay from cache) an upstream `HEAD`.
    ///
    /// The first positive result (`total_size > 0`) is cached; later calls
    /// return it without network I/O.
    async fn head(&self) -> NetResult<HeadInfo>;

    /// Open an upstream ranged `GET` for `[start, end]` and stream the body.
    ///
    /// An origin answering with anything but `206 Partial Content` fails the
    /// fetch — a `200` would silently hand back the whole file.
    async fn fetch(&self, start: u64, end: u64) -> NetResult<ByteStream>;

    /// Abort any in-flight fetch; readers observe end-of-stream.
    fn cancel(&self);
}

/// HTTP origin over a shared `reqwest` client.
///
/// Redirects are followed up to five hops on both `head` and `fetch`, with
/// the `Range` header re-applied on each hop. An optional forward proxy
/// (HTTP or SOCKS5, with optional basic credentials), `User-Agent`, and an
/// extra header map come from [`NetOptions`] / the constructor.
pub struct HttpOriginSource {
    client: reqwest::Client,
    url: Url,
    extra_headers: Headers,
    options: NetOptions,
    cancel: CancellationToken,
    cached_head: Mutex<Option<HeadInfo>>,
    bus: Option<EventBus>,
    stat_published: AtomicBool,
}

impl HttpOriginSource {
    /// Plain HTTP source.
    pub fn new(url: Url, options: NetOptions, bus: Option<EventBus>) -> NetResult<Self> {
        Self::build(url, options, Headers::new(), bus)
    }

    /// Source for authenticated origins: every request carries the given
    /// header map in addition to whatever [`NetOptions`] configures.
    pub fn with_extra_headers(
        url: Url,
        options: NetOptions,
        extra_headers: Headers,
        bus: Option<EventBus>,
    ) -> NetResult<Self> {
        Self::build(url, options, extra_headers, bus)
    }

    fn build(
        url: Url,
        options: NetOptions,
        extra_headers: Headers,
        bus: Option<EventBus>,
    ) -> NetResult<Self> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::limited(5));
        if let Some(ua) = &options.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        if let Some(proxy) = &options.forward_proxy {
            builder = builder.proxy(proxy.to_reqwest()?);
        }
        let client = builder.build().map_err(|e| NetError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url,
            extra_headers,
            options,
            cancel: CancellationToken::new(),
            cached_head: Mutex::new(None),
            bus,
            stat_published: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in self.extra_headers.iter() {
            req = req.header(k, v);
        }
        req.timeout(self.options.request_timeout)
    }

    async fn head_once(&self) -> NetResult<HeadInfo> {
        let req = self.apply_headers(self.client.head(self.url.clone()));
        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let header_str = |name: header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let total_size = header_str(header::CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(HeadInfo {
            total_size,
            mime_type: header_str(header::CONTENT_TYPE),
            content_disposition: header_str(header::CONTENT_DISPOSITION),
        })
    }

    fn publish_stat(&self, info: &HeadInfo) {
        let Some(bus) = &self.bus else { return };
        if self.stat_published.swap(true, Ordering::SeqCst) {
            return;
        }
        let declared = info
            .content_disposition
            .as_deref()
            .and_then(parse_content_disposition);
        let file_name = derive_file_name(declared.as_deref(), self.url.as_str());
        let extension = Some(derive_extension(
            file_name.as_deref(),
            self.url.as_str(),
            info.mime_type.as_deref(),
        ));
        bus.publish(ProxyEvent::FileStat(FileStat {
            url: self.url.to_string(),
            file_name,
            total_size: (info.total_size > 0).then_some(info.total_size),
            mime_type: info.mime_type.clone(),
            extension,
        }));
    }
}

#[async_trait]
impl OriginSource for HttpOriginSource {
    async fn head(&self) -> NetResult<HeadInfo> {
        let mut cached = self.cached_head.lock().await;
        if let Some(info) = cached.as_ref() {
            return Ok(info.clone());
        }

        let retry = &self.options.retry;
        let mut attempt = 0;
        let info = loop {
            if self.cancel.is_cancelled() {
                return Err(NetError::Cancelled);
            }
            match self.head_once().await {
                Ok(info) => break info,
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    attempt += 1;
                    tracing::debug!(url = %self.url, attempt, error = %e, "retrying head");
                    tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                }
                Err(e) if attempt > 0 => {
                    return Err(NetError::RetryExhausted {
                        max_retries: retry.max_retries,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        };

        if info.total_size > 0 {
            *cached = Some(info.clone());
        }
        drop(cached);

        self.publish_stat(&info);
        Ok(info)
    }

    async fn fetch(&self, start: u64, end: u64) -> NetResult<ByteStream> {
        if self.cancel.is_cancelled() {
            return Err(NetError::Cancelled);
        }

        let spec = RangeSpec::new(start, Some(end));
        let req = self.apply_headers(
            self.client
                .get(self.url.clone())
                .header(header::RANGE, spec.to_header_value()),
        );
        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();

        if status.as_u16() != 206 {
            if status.is_success() {
                return Err(NetError::NotPartialContent {
                    status: status.as_u16(),
                });
            }
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let token = self.cancel.clone();
        let stream = resp
            .bytes_stream()
            .map_err(NetError::from)
            .take_while(move |_| futures::future::ready(!token.is_cancelled()));
        Ok(Box::pin(stream))
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for HttpOriginSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOriginSource")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}
