#![forbid(unsafe_code)]

//! Proxy lifecycle: init, startup validation, promotion, removal, and the
//! programmatic surface consumed by the embedding application.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use parking_lot::Mutex;
use spool_core::{ResourceId, parse_content_disposition};
use spool_events::{EventBus, FileStat, ProxyEvent};
use spool_net::{HttpOriginSource, NetError, OriginSource};
use spool_storage::{RangeSet, SparseFile, meta};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::completer;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::resource::{DownloadInfo, ResourceEntry, ResourceState};
use crate::server;

/// Process-wide handle registry making `init` idempotent per port.
fn registry() -> &'static StdMutex<HashMap<u16, Proxy>> {
    static REGISTRY: OnceLock<StdMutex<HashMap<u16, Proxy>>> = OnceLock::new();
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

pub(crate) struct ProxyInner {
    pub config: ProxyConfig,
    pub storage_dir: PathBuf,
    pub collections_dir: PathBuf,
    pub port: u16,
    pub resources: DashMap<String, Arc<ResourceEntry>>,
    /// Ids with an active completer task; enforces one completer per
    /// resource.
    pub active: DashMap<String, ()>,
    pub bus: EventBus,
    pub cancel: CancellationToken,
    disposed: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProxyInner {
    fn video_path(&self, id: &str) -> PathBuf {
        self.storage_dir.join(format!("{id}.video"))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.storage_dir.join(format!("{id}.meta"))
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn make_source(&self, url: &Url) -> ProxyResult<Arc<HttpOriginSource>> {
        let source = match &self.config.extra_headers {
            Some(headers) => HttpOriginSource::with_extra_headers(
                url.clone(),
                self.config.net.clone(),
                headers.clone(),
                Some(self.bus.clone()),
            ),
            None => HttpOriginSource::new(url.clone(), self.config.net.clone(), Some(self.bus.clone())),
        };
        source.map(Arc::new).map_err(ProxyError::OriginUnavailable)
    }

    /// Look up or create the resource for an origin URL.
    ///
    /// The first sighting of an id issues the origin `HEAD`; an id whose
    /// promoted file still sits in the collections area is served from
    /// there without touching the origin.
    pub(crate) async fn ensure_resource(&self, url_raw: &str) -> ProxyResult<Arc<ResourceEntry>> {
        if self.is_disposed() {
            return Err(ProxyError::NotInitialized);
        }

        let id = ResourceId::from_url(url_raw);
        if let Some(existing) = self.resources.get(id.as_str()) {
            return Ok(existing.clone());
        }

        let url = Url::parse(url_raw)
            .map_err(|e| ProxyError::BadRequest(format!("invalid url: {e}")))?;

        if let Some(promoted) = self.find_collection_file(id.as_str()).await {
            return self.adopt_promoted(&id, url_raw, url, promoted).await;
        }

        let source = self.make_source(&url)?;
        let head = source.head().await.map_err(ProxyError::OriginUnavailable)?;
        if head.total_size == 0 {
            return Err(ProxyError::OriginUnavailable(NetError::Http(
                "origin reported a non-positive content length".to_string(),
            )));
        }

        let file_name = head
            .content_disposition
            .as_deref()
            .and_then(parse_content_disposition);
        let sparse = SparseFile::allocate(self.video_path(id.as_str()), head.total_size).await?;
        let state = ResourceState {
            ranges: RangeSet::new(head.total_size),
            mime_type: head.mime_type,
            file_name,
            target_path: None,
        };
        let entry = ResourceEntry::new(
            id.clone(),
            url_raw.to_string(),
            url,
            sparse,
            self.meta_path(id.as_str()),
            source,
            state,
            self.cancel.child_token(),
            false,
        );
        debug!(id = %id, url = %url_raw, total = entry.total_size(), "resource created");
        Ok(self.insert_entry(entry))
    }

    /// Serve an already-promoted file without origin contact.
    async fn adopt_promoted(
        &self,
        id: &ResourceId,
        url_raw: &str,
        url: Url,
        path: PathBuf,
    ) -> ProxyResult<Arc<ResourceEntry>> {
        let total = tokio::fs::metadata(&path).await?.len();
        let sparse = SparseFile::open_existing(&path, total).await?;
        let mut ranges = RangeSet::new(total);
        if total > 0 {
            ranges.insert(0, total - 1);
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let source = self.make_source(&url)?;
        let entry = ResourceEntry::new(
            id.clone(),
            url_raw.to_string(),
            url,
            sparse,
            self.meta_path(id.as_str()),
            source,
            ResourceState {
                ranges,
                mime_type: None,
                file_name,
                target_path: None,
            },
            self.cancel.child_token(),
            true,
        );
        debug!(id = %id, path = %path.display(), "serving promoted file");
        Ok(self.insert_entry(entry))
    }

    fn insert_entry(&self, entry: Arc<ResourceEntry>) -> Arc<ResourceEntry> {
        match self.resources.entry(entry.id.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
                entry
            }
        }
    }

    async fn find_collection_file(&self, id: &str) -> Option<PathBuf> {
        let mut dir = tokio::fs::read_dir(&self.collections_dir).await.ok()?;
        while let Ok(Some(dirent)) = dir.next_entry().await {
            let path = dirent.path();
            if path.is_file() && path.file_stem().is_some_and(|stem| stem == id) {
                return Some(path);
            }
        }
        None
    }

    /// Startup validation: resume every data file with a readable meta,
    /// promote every orphan data file as already complete.
    pub(crate) async fn validate_storage(&self) {
        let Ok(mut dir) = tokio::fs::read_dir(&self.storage_dir).await else {
            return;
        };
        while let Ok(Some(dirent)) = dir.next_entry().await {
            let path = dirent.path();
            if path.extension().is_none_or(|ext| ext != "video") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ResourceId::parse)
            else {
                continue;
            };

            let meta_path = self.meta_path(id.as_str());
            if tokio::fs::try_exists(&meta_path).await.unwrap_or(false) {
                match meta::load(&meta_path).await {
                    Ok((header, ranges)) => {
                        if let Err(error) = self.restore_entry(&id, header, ranges).await {
                            warn!(id = %id, %error, "failed to restore resource");
                        }
                    }
                    Err(error) => {
                        // The data file stays; the next request for this URL
                        // rebuilds the resource with an empty cached set and
                        // overwrites bytes in place.
                        warn!(id = %id, %error, "meta corrupt, resource needs redownload");
                    }
                }
            } else {
                // Data file without meta: completed before a crash or a
                // prior delete-meta-on-complete step. Promote it.
                self.promote_orphan(&id, &path).await;
            }
        }
    }

    async fn restore_entry(
        &self,
        id: &ResourceId,
        header: spool_storage::MetaHeader,
        ranges: RangeSet,
    ) -> ProxyResult<()> {
        let url = Url::parse(&header.original_url)
            .map_err(|e| ProxyError::BadRequest(format!("invalid url in meta: {e}")))?;
        let sparse =
            SparseFile::open_existing(self.video_path(id.as_str()), header.total_size).await?;
        let source = self.make_source(&url)?;
        let entry = ResourceEntry::new(
            id.clone(),
            header.original_url.clone(),
            url,
            sparse,
            self.meta_path(id.as_str()),
            source,
            ResourceState {
                ranges,
                mime_type: header.mime_type,
                file_name: header.file_name,
                target_path: header.target_path,
            },
            self.cancel.child_token(),
            false,
        );
        info!(id = %id, progress = entry.progress(), "resource restored for resume");
        self.insert_entry(entry);
        Ok(())
    }

    async fn promote_orphan(&self, id: &ResourceId, video_path: &Path) {
        let dest = self.collections_dir.join(format!("{id}.mp4"));
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            warn!(id = %id, dest = %dest.display(), "promotion target exists, leaving data file");
            return;
        }
        if let Err(error) = tokio::fs::create_dir_all(&self.collections_dir).await {
            warn!(id = %id, %error, "cannot create collections dir");
            return;
        }
        match tokio::fs::rename(video_path, &dest).await {
            Ok(()) => info!(id = %id, dest = %dest.display(), "orphan data file promoted"),
            Err(error) => warn!(id = %id, %error, "orphan promotion failed"),
        }
    }

    /// Promote a completed resource out of the working area.
    ///
    /// The meta file is deleted first, then the data file is renamed to the
    /// resource's target (or `<collections>/<id>.<ext>`). An existing file
    /// at the destination is never overwritten; the skip is reported as
    /// `false`.
    pub(crate) async fn promote(&self, entry: &Arc<ResourceEntry>) -> bool {
        if entry.promoted || !entry.is_complete() {
            return false;
        }

        let dest = entry.state.lock().target_path.clone().unwrap_or_else(|| {
            self.collections_dir
                .join(format!("{}.{}", entry.id, entry.suggested_extension()))
        });

        let _guard = entry.file_lock.lock().await;
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            warn!(id = %entry.id, dest = %dest.display(), "promotion skipped, target exists");
            return false;
        }

        entry.saver.cancel_pending();
        if let Err(error) = tokio::fs::remove_file(&entry.meta_path).await
            && error.kind() != std::io::ErrorKind::NotFound
        {
            warn!(id = %entry.id, %error, "meta delete during promotion failed");
        }
        if let Some(parent) = dest.parent()
            && let Err(error) = tokio::fs::create_dir_all(parent).await
        {
            warn!(id = %entry.id, %error, "cannot create promotion target dir");
            return false;
        }
        match tokio::fs::rename(entry.sparse.path(), &dest).await {
            Ok(()) => {
                self.resources.remove(entry.id.as_str());
                info!(id = %entry.id, dest = %dest.display(), "resource promoted");
                self.bus.publish(ProxyEvent::Completed {
                    id: entry.id.to_string(),
                    url: entry.url_raw.clone(),
                });
                true
            }
            Err(error) => {
                // Meta is already gone; the next startup promotes the
                // orphan data file instead.
                warn!(id = %entry.id, %error, "promotion rename failed");
                false
            }
        }
    }

    /// Stop and forget a resource, deleting its files.
    pub(crate) async fn remove(&self, id: &str) -> bool {
        let entry = self.resources.remove(id).map(|(_, entry)| entry);
        if let Some(entry) = &entry {
            entry.alive.store(false, Ordering::SeqCst);
            entry.source().cancel();
            entry.saver.cancel_pending();
            entry.cancel.cancel();
        }
        self.active.remove(id);

        let mut removed = entry.is_some();
        for path in [self.video_path(id), self.meta_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => warn!(id, %error, path = %path.display(), "file delete failed"),
            }
        }
        while let Some(path) = self.find_collection_file(id).await {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(error) => {
                    warn!(id, %error, "collection file delete failed");
                    break;
                }
            }
        }

        if removed {
            self.bus.publish(ProxyEvent::Removed { id: id.to_string() });
        }
        removed
    }

    fn entries(&self) -> Vec<Arc<ResourceEntry>> {
        self.resources.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Resolve the on-disk path of a complete resource, if any.
    async fn complete_path(&self, id: &str) -> Option<PathBuf> {
        let entry = self.resources.get(id).map(|e| Arc::clone(e.value()));
        if let Some(entry) = entry {
            return entry.is_complete().then(|| entry.sparse.path().to_path_buf());
        }
        self.find_collection_file(id).await
    }
}

/// Handle to a running caching proxy.
///
/// Created by [`Proxy::init`]; cheap to clone. Dropping handles does not
/// stop the proxy — call [`Proxy::dispose`].
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    /// Create the storage area, run startup validation, and start serving
    /// on `127.0.0.1:<port>`.
    ///
    /// A second `init` for a port that already has a live proxy returns the
    /// existing handle.
    pub async fn init(config: ProxyConfig) -> ProxyResult<Proxy> {
        if config.port != 0
            && let Some(existing) = registry().lock().expect("registry poisoned").get(&config.port)
        {
            return Ok(existing.clone());
        }

        let storage_dir = config.storage_dir.clone();
        let collections_dir = storage_dir
            .parent()
            .map_or_else(|| PathBuf::from("collections"), |p| p.join("collections"));
        tokio::fs::create_dir_all(&storage_dir).await?;
        tokio::fs::create_dir_all(&collections_dir).await?;

        let listener = TcpListener::bind(("127.0.0.1", config.port)).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let inner = Arc::new(ProxyInner {
            bus: EventBus::new(config.event_capacity),
            storage_dir,
            collections_dir,
            port,
            resources: DashMap::new(),
            active: DashMap::new(),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            shutdown: Mutex::new(Some(shutdown_tx)),
            config,
        });

        inner.validate_storage().await;

        let router = server::router(Arc::clone(&inner));
        let serve = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });
        tokio::spawn(async move {
            if let Err(error) = serve.await {
                warn!(%error, "proxy server terminated");
            }
        });
        info!(port, "proxy listening");

        let proxy = Proxy { inner };
        if proxy.inner.config.port != 0 {
            registry()
                .lock()
                .expect("registry poisoned")
                .insert(proxy.inner.config.port, proxy.clone());
        }
        Ok(proxy)
    }

    /// Port the proxy is bound to (useful with `port = 0`).
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Loopback URL a player should use instead of `origin_url`.
    ///
    /// The server recovers `origin_url` from the query string exactly.
    #[must_use]
    pub fn proxy_url_for(&self, origin_url: &str) -> Url {
        let mut url = Url::parse(&format!("http://127.0.0.1:{}/stream", self.inner.port))
            .expect("loopback url is valid");
        url.query_pairs_mut().append_pair("url", origin_url);
        url
    }

    /// Current cached share of a resource in percent.
    #[must_use]
    pub async fn progress_for(&self, origin_url: &str) -> f64 {
        let id = ResourceId::from_url(origin_url);
        if let Some(entry) = self.inner.resources.get(id.as_str()).map(|e| Arc::clone(e.value())) {
            return entry.progress();
        }
        if self.inner.find_collection_file(id.as_str()).await.is_some() {
            return 100.0;
        }
        0.0
    }

    /// Raw event subscription.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.inner.bus.subscribe()
    }

    /// Stream of `(origin_url, percent)` progress updates.
    pub fn progress_stream(&self) -> impl Stream<Item = (String, f64)> + Send + 'static {
        let mut rx = self.inner.bus.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(ProxyEvent::Progress { url, percent }) => yield (url, percent),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stream of [`FileStat`]s for one origin URL.
    pub fn file_stats_for(&self, origin_url: &str) -> impl Stream<Item = FileStat> + Send + 'static {
        let url = origin_url.to_string();
        let mut rx = self.inner.bus.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(ProxyEvent::FileStat(stat)) if stat.url == url => yield stat,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Start (or restart) background completion for a URL.
    pub async fn start_background(&self, origin_url: &str) -> ProxyResult<()> {
        let entry = self.inner.ensure_resource(origin_url).await?;
        if !entry.promoted {
            completer::spawn(Arc::clone(&self.inner), entry);
        }
        Ok(())
    }

    /// Pause background completion for a URL. Forces a meta save.
    pub async fn stop_background(&self, origin_url: &str) -> bool {
        let id = ResourceId::from_url(origin_url);
        let Some(entry) = self.inner.resources.get(id.as_str()).map(|e| Arc::clone(e.value()))
        else {
            return false;
        };
        entry.alive.store(false, Ordering::SeqCst);
        entry.saver.flush().await;
        true
    }

    /// Restart completion for every incomplete resource.
    pub async fn resume_all(&self) {
        for entry in self.inner.entries() {
            if !entry.promoted && !entry.is_complete() {
                completer::spawn(Arc::clone(&self.inner), entry);
            }
        }
    }

    /// Stop background work and abort in-flight fetches for a URL.
    ///
    /// Live responses are not cut; they drain when they next observe the
    /// closed upstream. The resource itself stays registered so a later
    /// request or resume picks it back up.
    pub async fn cancel(&self, origin_url: &str) -> bool {
        let id = ResourceId::from_url(origin_url);
        let Some(entry) = self.inner.resources.get(id.as_str()).map(|e| Arc::clone(e.value()))
        else {
            return false;
        };
        entry.alive.store(false, Ordering::SeqCst);
        entry.saver.cancel_pending();
        entry.source().cancel();
        // A cancelled source is dead; give the entry a fresh one so future
        // requests and resumes can fetch again.
        if let Ok(source) = self.inner.make_source(&entry.url) {
            entry.replace_source(source);
        }
        self.inner.active.remove(id.as_str());
        true
    }

    /// Snapshot of every known resource: active ones in the working area
    /// plus promoted files in the collections area.
    pub async fn list_all(&self) -> Vec<DownloadInfo> {
        let mut infos = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for entry in self.inner.entries() {
            seen.insert(entry.id.to_string());
            infos.push(DownloadInfo {
                id: entry.id.to_string(),
                local_path: entry.sparse.path().to_path_buf(),
                total_size: entry.total_size(),
                is_complete: entry.is_complete(),
                progress: entry.progress(),
                file_name: entry.suggested_file_name(),
                origin_url: Some(entry.url_raw.clone()),
            });
        }

        if let Ok(mut dir) = tokio::fs::read_dir(&self.inner.collections_dir).await {
            while let Ok(Some(dirent)) = dir.next_entry().await {
                let path = dirent.path();
                let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(ResourceId::parse)
                else {
                    continue;
                };
                if !seen.insert(id.to_string()) {
                    continue;
                }
                let Ok(metadata) = dirent.metadata().await else {
                    continue;
                };
                infos.push(DownloadInfo {
                    id: id.to_string(),
                    file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                    local_path: path,
                    total_size: metadata.len(),
                    is_complete: true,
                    progress: 100.0,
                    origin_url: None,
                });
            }
        }

        infos
    }

    /// Remove a resource by origin URL.
    pub async fn remove_by_url(&self, origin_url: &str) -> bool {
        self.inner.remove(ResourceId::from_url(origin_url).as_str()).await
    }

    /// Remove a resource by id.
    pub async fn remove_by_id(&self, id: &str) -> bool {
        self.inner.remove(id).await
    }

    /// Remove every resource and wipe the working and collections areas.
    ///
    /// Promoted files are cleared too — ids leave the active map at
    /// promotion time, so the directory sweep is what upholds the
    /// "`list_all()` is empty afterwards" postcondition.
    pub async fn clear_all(&self) {
        let ids: Vec<String> = self
            .inner
            .resources
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.inner.remove(&id).await;
        }
        for dir in [&self.inner.storage_dir, &self.inner.collections_dir] {
            let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
                continue;
            };
            while let Ok(Some(dirent)) = entries.next_entry().await {
                let path = dirent.path();
                let result = if path.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                if let Err(error) = result {
                    warn!(path = %path.display(), %error, "clear failed for entry");
                }
            }
        }
    }

    /// Copy a completed resource to `target`. Returns `false` while the
    /// resource is incomplete or unknown.
    pub async fn export(&self, origin_url: &str, target: &Path) -> ProxyResult<bool> {
        if self.inner.is_disposed() {
            return Err(ProxyError::NotInitialized);
        }
        let id = ResourceId::from_url(origin_url);
        let Some(source_path) = self.inner.complete_path(id.as_str()).await else {
            return Ok(false);
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source_path, target).await?;
        Ok(true)
    }

    /// Move a completed resource to `target`. Returns `false` while the
    /// resource is incomplete or unknown.
    pub async fn move_to(&self, origin_url: &str, target: &Path) -> ProxyResult<bool> {
        if self.inner.is_disposed() {
            return Err(ProxyError::NotInitialized);
        }
        let id = ResourceId::from_url(origin_url);
        let Some(source_path) = self.inner.complete_path(id.as_str()).await else {
            return Ok(false);
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source_path, target).await?;

        // Moving the live data file out from under an entry retires it.
        if let Some((_, entry)) = self.inner.resources.remove(id.as_str()) {
            entry.saver.cancel_pending();
            let _ = tokio::fs::remove_file(&entry.meta_path).await;
        }
        Ok(true)
    }

    /// Export with a derived file name into `dir`; returns the final path.
    pub async fn export_auto_name(
        &self,
        origin_url: &str,
        dir: &Path,
    ) -> ProxyResult<Option<PathBuf>> {
        let Some(name) = self.auto_name(origin_url).await else {
            return Ok(None);
        };
        let target = dir.join(name);
        Ok(self.export(origin_url, &target).await?.then_some(target))
    }

    /// Move with a derived file name into `dir`; returns the final path.
    pub async fn move_auto_name(
        &self,
        origin_url: &str,
        dir: &Path,
    ) -> ProxyResult<Option<PathBuf>> {
        let Some(name) = self.auto_name(origin_url).await else {
            return Ok(None);
        };
        let target = dir.join(name);
        Ok(self.move_to(origin_url, &target).await?.then_some(target))
    }

    async fn auto_name(&self, origin_url: &str) -> Option<String> {
        let id = ResourceId::from_url(origin_url);
        if let Some(entry) = self.inner.resources.get(id.as_str()).map(|e| Arc::clone(e.value())) {
            return Some(entry.suggested_file_name().unwrap_or_else(|| {
                format!("{}.{}", entry.id, entry.suggested_extension())
            }));
        }
        let path = self.inner.find_collection_file(id.as_str()).await?;
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    /// Set the promotion target for a resource by origin URL.
    pub fn set_target(&self, origin_url: &str, target: impl Into<PathBuf>) -> bool {
        self.set_target_by_id(ResourceId::from_url(origin_url).as_str(), target)
    }

    /// Set the promotion target for a resource by id.
    pub fn set_target_by_id(&self, id: &str, target: impl Into<PathBuf>) -> bool {
        let Some(entry) = self.inner.resources.get(id).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        entry.state.lock().target_path = Some(target.into());
        entry.saver.schedule();
        true
    }

    /// Cancel everything, save all meta files, and stop the server.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();

        let entries = self.inner.entries();
        for entry in &entries {
            entry.alive.store(false, Ordering::SeqCst);
            entry.source().cancel();
        }
        for entry in &entries {
            if entry.promoted {
                entry.saver.cancel_pending();
            } else {
                entry.saver.flush().await;
            }
        }

        if let Some(tx) = self.inner.shutdown.lock().take() {
            let _ = tx.send(());
        }
        if self.inner.config.port != 0 {
            registry()
                .lock()
                .expect("registry poisoned")
                .remove(&self.inner.config.port);
        }
        info!(port = self.inner.port, "proxy disposed");
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("port", &self.inner.port)
            .field("storage_dir", &self.inner.storage_dir)
            .finish_non_exhaustive()
    }
}
