#![forbid(unsafe_code)]

//! Debounced meta persistence.
//!
//! One saver per resource. Every range-set mutation re-arms the timer; the
//! save runs once things go quiet. Completion, cancellation, and shutdown
//! flush immediately. Losing a pending save is harmless — the meta file may
//! lag the data file but never run ahead of it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Default quiet period before a scheduled save fires.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(750);

type SaveFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Re-armable one-shot save timer.
pub struct DebouncedSaver {
    interval: Duration,
    save: SaveFn,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DebouncedSaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedSaver")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl DebouncedSaver {
    /// Create a saver running `save` after `interval` of quiet.
    ///
    /// The closure owns everything it needs and reports its own errors; the
    /// saver only drives scheduling.
    pub fn new(
        interval: Duration,
        save: impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            save: Arc::new(save),
            pending: Mutex::new(None),
        }
    }

    /// (Re)arm the timer: the save fires `interval` after the newest call.
    pub fn schedule(&self) {
        let save = Arc::clone(&self.save);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            save().await;
        });
        if let Some(prior) = self.pending.lock().replace(handle) {
            prior.abort();
        }
    }

    /// Cancel any pending timer and save right now.
    pub async fn flush(&self) {
        self.cancel_pending();
        (self.save)().await;
    }

    /// Drop any pending timer without saving.
    pub fn cancel_pending(&self) {
        if let Some(prior) = self.pending.lock().take() {
            prior.abort();
        }
    }
}

impl Drop for DebouncedSaver {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
