#![forbid(unsafe_code)]

use std::path::PathBuf;

use spool_net::{ForwardProxy, Headers, NetOptions};

/// Configuration for [`Proxy::init`](crate::Proxy::init).
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Loopback port to serve on. `0` binds an ephemeral port.
    pub port: u16,
    /// Working area for `<id>.video` / `<id>.meta` files. Completed files
    /// are promoted into a sibling `collections` directory.
    pub storage_dir: PathBuf,
    /// Origin-access options (timeout, retries, user agent, forward proxy).
    pub net: NetOptions,
    /// Extra headers sent to every origin, for authenticated hosts.
    pub extra_headers: Option<Headers>,
    /// Event bus channel capacity.
    pub event_capacity: usize,
    /// Enqueue a background completer on the first live request for a
    /// resource. Disable to drive completion via `start_background` only.
    pub auto_complete: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            storage_dir: std::env::temp_dir().join("spool-cache"),
            net: NetOptions::default(),
            extra_headers: None,
            event_capacity: 64,
            auto_complete: true,
        }
    }
}

impl ProxyConfig {
    #[must_use]
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.net.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_forward_proxy(mut self, proxy: ForwardProxy) -> Self {
        self.net.forward_proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn with_extra_headers(mut self, headers: Headers) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }
}
