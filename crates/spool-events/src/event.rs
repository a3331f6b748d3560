#![forbid(unsafe_code)]

/// Attributes learned about a resource from the origin's response headers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileStat {
    /// Origin URL the stat belongs to.
    pub url: String,
    /// Name declared via `Content-Disposition` or taken from the URL tail.
    pub file_name: Option<String>,
    /// Total size from `Content-Length`.
    pub total_size: Option<u64>,
    /// `Content-Type` as declared by the origin.
    pub mime_type: Option<String>,
    /// Extension derived from name, URL, and MIME type.
    pub extension: Option<String>,
}

/// Events emitted by the proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    /// Cached share of a resource changed. Monotonic per URL.
    Progress { url: String, percent: f64 },
    /// Head attributes of a resource became known.
    FileStat(FileStat),
    /// A resource reached 100% and was promoted out of the working area.
    Completed { id: String, url: String },
    /// A resource was removed.
    Removed { id: String },
    /// Background download of a resource failed.
    DownloadError { id: String, error: String },
}
