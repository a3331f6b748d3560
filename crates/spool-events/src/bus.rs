#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::ProxyEvent;

/// Broadcast bus carrying [`ProxyEvent`]s.
///
/// `publish()` is a sync call usable from both async tasks and blocking
/// threads. With no subscribers, events are silently dropped; slow
/// subscribers observe `RecvError::Lagged` instead of blocking producers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ProxyEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ProxyEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.tx.subscribe()
    }
}
