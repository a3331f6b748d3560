#![forbid(unsafe_code)]

//! Background gap filling: one cooperative task per resource.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use spool_net::{NetError, OriginSource};
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::ProxyInner;
use crate::resource::ResourceEntry;

/// Span of a single gap-fill fetch.
pub(crate) const FETCH_CHUNK: u64 = 1024 * 1024;

/// Start a completer for `entry` unless one is already active.
pub(crate) fn spawn(inner: Arc<ProxyInner>, entry: Arc<ResourceEntry>) {
    let id = entry.id.to_string();
    if inner.active.insert(id.clone(), ()).is_some() {
        return;
    }
    entry.alive.store(true, Ordering::SeqCst);
    entry.completer_enqueued.store(true, Ordering::SeqCst);
    debug!(id = %entry.id, "completer started");

    tokio::spawn(async move {
        let outcome = fill_gaps(&inner, &entry).await;
        inner.active.remove(&id);
        match outcome {
            Ok(true) => {
                // Forced save before promotion keeps the crash window tight.
                entry.saver.flush().await;
                inner.promote(&entry).await;
            }
            Ok(false) => {
                debug!(id = %entry.id, "completer stopped");
                entry.saver.flush().await;
                // The next live request may enqueue a fresh task.
                entry.completer_enqueued.store(false, Ordering::SeqCst);
            }
            Err(error) => {
                // No automatic retry: the next live request or an explicit
                // resume restarts the task.
                warn!(id = %entry.id, %error, "completer failed");
                entry.saver.flush().await;
                inner.bus.publish(spool_events::ProxyEvent::DownloadError {
                    id: entry.id.to_string(),
                    error: error.to_string(),
                });
                entry.completer_enqueued.store(false, Ordering::SeqCst);
            }
        }
    });
}

fn stopped(entry: &ResourceEntry) -> bool {
    !entry.alive.load(Ordering::SeqCst) || entry.cancel.is_cancelled()
}

/// Fill gaps until the set is complete (`Ok(true)`), the task is stopped
/// (`Ok(false)`), or a fetch/storage error aborts it.
async fn fill_gaps(inner: &Arc<ProxyInner>, entry: &Arc<ResourceEntry>) -> ProxyResult<bool> {
    loop {
        if stopped(entry) {
            return Ok(false);
        }

        let Some((gap_start, gap_end)) = entry.state.lock().ranges.next_gap(0) else {
            // Complete. Let in-flight responses drain before reporting
            // completion so promotion never renames a file under a serve.
            loop {
                if entry.active_serves.load(Ordering::SeqCst) == 0 {
                    return Ok(true);
                }
                if stopped(entry) {
                    return Ok(false);
                }
                let idle = entry.serves_idle.notified();
                if entry.active_serves.load(Ordering::SeqCst) == 0 {
                    return Ok(true);
                }
                tokio::select! {
                    () = idle => {}
                    () = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
                }
            }
        };
        let win_end = (gap_start + FETCH_CHUNK - 1).min(gap_end);

        let mut upstream = entry
            .source()
            .fetch(gap_start, win_end)
            .await
            .map_err(ProxyError::OriginStream)?;

        let mut offset = gap_start;
        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(ProxyError::OriginStream)?;
            if chunk.is_empty() {
                continue;
            }
            let remaining = (win_end - offset + 1) as usize;
            let chunk = if chunk.len() > remaining {
                chunk.slice(0..remaining)
            } else {
                chunk
            };

            // Open-write-close under the lock, then release it so live
            // serves for the same resource interleave between chunks.
            {
                let _guard = entry.file_lock.lock().await;
                entry.sparse.write_at(offset, &chunk).await?;
            }
            entry.commit_chunk(&inner.bus, offset, &chunk);
            offset += chunk.len() as u64;

            if stopped(entry) {
                return Ok(false);
            }
            if offset > win_end {
                break;
            }
        }

        if offset <= win_end {
            // A live serve may have raced us and cancelled nothing; a short
            // stream with bytes still missing is an upstream failure.
            if entry.state.lock().ranges.contains(offset, win_end) {
                continue;
            }
            return Err(ProxyError::OriginStream(NetError::Http(
                "origin stream ended before the requested gap".to_string(),
            )));
        }
    }
}
