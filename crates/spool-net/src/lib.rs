#![forbid(unsafe_code)]

//! `spool-net`
//!
//! Origin access for the caching proxy: a [`OriginSource`] trait with an
//! HTTP implementation over `reqwest`, plus the request types shared with
//! the server (range specs, retry policy, proxy configuration).

mod error;
mod source;
mod types;

pub use error::{NetError, NetResult};
pub use source::{ByteStream, HeadInfo, HttpOriginSource, OriginSource};
pub use types::{ForwardProxy, Headers, NetOptions, ProxyScheme, RangeSpec, RetryPolicy};
