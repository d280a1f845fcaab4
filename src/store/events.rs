use tokio::sync::broadcast;

/// Change notification emitted after every store mutation so live UI
/// surfaces (sidebar, chat list) can re-read without polling and without a
/// direct reference to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionsChanged { id: String },
    SessionDeleted { id: String },
    PreferenceChanged { key: String },
}

/// Broadcast fan-out for [`StoreEvent`]. Slow subscribers may observe
/// `Lagged`; they are expected to re-read the store, so dropped
/// notifications only ever coalesce work.
#[derive(Debug)]
pub struct StoreEvents {
    sender: broadcast::Sender<StoreEvent>,
}

impl StoreEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: StoreEvent) {
        // No receivers is fine; the store does not care who listens.
        let _ = self.sender.send(event);
    }
}

impl Default for StoreEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
