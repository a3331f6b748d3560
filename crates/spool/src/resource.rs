#![forbid(unsafe_code)]

//! Per-resource state: the ownership bundle behind one cached URL.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use spool_core::{ResourceId, derive_extension, derive_file_name, sniff_mime};
use spool_events::{EventBus, ProxyEvent};
use spool_net::HttpOriginSource;
use spool_storage::{DebouncedSaver, MetaHeader, RangeSet, SAVE_DEBOUNCE, SparseFile, meta};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Mutable attributes and the cached-byte set, guarded by one lock.
pub(crate) struct ResourceState {
    pub ranges: RangeSet,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub target_path: Option<PathBuf>,
}

/// Everything one resource id owns: data file, meta path, range set,
/// origin source, per-resource file lock, save timer, and liveness flag.
pub(crate) struct ResourceEntry {
    pub id: ResourceId,
    /// Origin URL exactly as received in the query string.
    pub url_raw: String,
    pub url: Url,
    pub sparse: SparseFile,
    pub meta_path: PathBuf,
    source: RwLock<Arc<HttpOriginSource>>,
    pub state: Mutex<ResourceState>,
    /// Serializes data-file I/O between live serves and the completer.
    /// Held across a single read or write, never across a whole fetch.
    pub file_lock: tokio::sync::Mutex<()>,
    pub saver: DebouncedSaver,
    /// Liveness of the background completer; cleared to stop it.
    pub alive: AtomicBool,
    /// Set once the first live request enqueued a completer.
    pub completer_enqueued: AtomicBool,
    /// Live responses currently streaming from this resource. Promotion
    /// waits until they drain.
    pub active_serves: AtomicUsize,
    /// Notified whenever `active_serves` drops to zero.
    pub serves_idle: tokio::sync::Notify,
    pub cancel: CancellationToken,
    /// Entry serves an already-promoted file; nothing left to download.
    pub promoted: bool,
}

/// RAII marker for one live response; keeps promotion at bay while held.
pub(crate) struct ServeGuard {
    entry: Arc<ResourceEntry>,
}

impl ServeGuard {
    pub fn new(entry: Arc<ResourceEntry>) -> Self {
        entry.active_serves.fetch_add(1, Ordering::SeqCst);
        Self { entry }
    }
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        if self.entry.active_serves.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.entry.serves_idle.notify_waiters();
        }
    }
}

impl ResourceEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ResourceId,
        url_raw: String,
        url: Url,
        sparse: SparseFile,
        meta_path: PathBuf,
        source: Arc<HttpOriginSource>,
        state: ResourceState,
        cancel: CancellationToken,
        promoted: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let saver = DebouncedSaver::new(SAVE_DEBOUNCE, {
                let weak = weak.clone();
                move || {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(entry) = weak.upgrade() {
                            entry.save_meta_now().await;
                        }
                    })
                }
            });
            Self {
                id,
                url_raw,
                url,
                sparse,
                meta_path,
                source: RwLock::new(source),
                state: Mutex::new(state),
                file_lock: tokio::sync::Mutex::new(()),
                saver,
                alive: AtomicBool::new(false),
                completer_enqueued: AtomicBool::new(promoted),
                active_serves: AtomicUsize::new(0),
                serves_idle: tokio::sync::Notify::new(),
                cancel,
                promoted,
            }
        })
    }

    pub fn total_size(&self) -> u64 {
        self.sparse.total_size()
    }

    pub fn progress(&self) -> f64 {
        self.state.lock().ranges.progress()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().ranges.is_complete()
    }

    pub fn source(&self) -> Arc<HttpOriginSource> {
        self.source.read().clone()
    }

    /// Swap in a fresh origin source after a cancellation.
    pub fn replace_source(&self, source: Arc<HttpOriginSource>) {
        *self.source.write() = source;
    }

    /// Record a chunk that has already landed in the data file: mark the
    /// range, sniff the MIME type from the file head, publish progress, and
    /// re-arm the debounced save.
    ///
    /// Returns `(percent, is_complete)` computed under the same lock as the
    /// insert, so reported progress is monotonic.
    pub fn commit_chunk(&self, bus: &EventBus, offset: u64, data: &[u8]) -> (f64, bool) {
        let (percent, complete) = {
            let mut state = self.state.lock();
            if offset == 0
                && data.len() >= 16
                && state.mime_type.is_none()
                && let Some(mime) = sniff_mime(&data[..16])
            {
                state.mime_type = Some(mime.to_string());
            }
            state.ranges.insert(offset, offset + data.len() as u64 - 1);
            let percent = state.ranges.progress();
            let complete = state.ranges.is_complete();
            // Published under the lock so concurrent writers cannot reorder
            // updates; progress stays monotonic per resource.
            bus.publish(ProxyEvent::Progress {
                url: self.url_raw.clone(),
                percent,
            });
            (percent, complete)
        };
        self.saver.schedule();
        (percent, complete)
    }

    /// Write the meta file now. Failures are logged, never propagated — a
    /// stale meta file only means some bytes get re-fetched after a crash.
    pub async fn save_meta_now(&self) {
        if self.promoted {
            return;
        }
        let (header, mut set) = {
            let state = self.state.lock();
            let header = MetaHeader {
                id: self.id.to_string(),
                total_size: self.total_size(),
                original_url: self.url_raw.clone(),
                mime_type: state.mime_type.clone(),
                file_name: state.file_name.clone(),
                target_path: state.target_path.clone(),
            };
            (header, state.ranges.clone())
        };
        if let Err(error) = meta::save(&self.meta_path, &header, &mut set).await {
            tracing::warn!(id = %self.id, %error, "meta save failed");
        }
    }

    pub fn suggested_file_name(&self) -> Option<String> {
        let state = self.state.lock();
        derive_file_name(state.file_name.as_deref(), &self.url_raw)
    }

    pub fn suggested_extension(&self) -> String {
        let state = self.state.lock();
        derive_extension(
            state.file_name.as_deref(),
            &self.url_raw,
            state.mime_type.as_deref(),
        )
    }
}

impl std::fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("id", &self.id)
            .field("url", &self.url_raw)
            .field("total_size", &self.total_size())
            .finish_non_exhaustive()
    }
}

/// Snapshot of one cached resource, active or promoted.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadInfo {
    pub id: String,
    pub local_path: PathBuf,
    pub total_size: u64,
    pub is_complete: bool,
    pub progress: f64,
    pub file_name: Option<String>,
    pub origin_url: Option<String>,
}
