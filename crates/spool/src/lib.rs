#![forbid(unsafe_code)]

//! # Spool
//!
//! A local caching range proxy for large media resources. Players address a
//! loopback endpoint as if it were the origin; behind it, bytes are fetched
//! opportunistically, written into a sparse file at their absolute offsets,
//! and served back as one contiguous `206` body. Cached ranges are served
//! from disk, a background completer fills the remaining gaps, and state
//! survives restarts.
//!
//! ## Quick start
//!
//! ```ignore
//! use spool::{Proxy, ProxyConfig};
//!
//! let proxy = Proxy::init(ProxyConfig::new("/var/cache/spool")).await?;
//! let play_url = proxy.proxy_url_for("https://example.com/movie.mp4");
//! // hand `play_url` to the player; the file fills in behind it
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod core {
    pub use spool_core::*;
}

pub mod events {
    pub use spool_events::*;
}

pub mod net {
    pub use spool_net::*;
}

pub mod storage {
    pub use spool_storage::*;
}

// ── Proxy ───────────────────────────────────────────────────────────────

mod completer;
mod config;
mod error;
mod proxy;
mod resource;
mod server;

pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use proxy::Proxy;
pub use resource::DownloadInfo;

pub mod prelude {
    pub use spool_events::{FileStat, ProxyEvent};
    pub use spool_net::{ForwardProxy, Headers, NetOptions, ProxyScheme};

    pub use crate::{DownloadInfo, Proxy, ProxyConfig, ProxyError};
}
