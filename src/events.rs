use log::debug;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Notifications published by a [`crate::connection::Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A credential handshake started.
    Authenticating,
    /// A credential handshake finished, successfully or not.
    Authenticated,
    /// The authentication state may have changed (handshake result, logout, server switch).
    Auth,
    /// Tile fetching went from idle to busy.
    Loading,
    /// Tile fetching went from busy to idle.
    Loaded,
}

impl SyncEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEvent::Authenticating => "authenticating",
            SyncEvent::Authenticated => "authenticated",
            SyncEvent::Auth => "auth",
            SyncEvent::Loading => "loading",
            SyncEvent::Loaded => "loaded",
        }
    }
}

/// Fan-out of [`SyncEvent`]s. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        debug!(event = event.as_str(); "Emitting event");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

/// Drains whatever is queued on `receiver` without waiting.
#[cfg(test)]
pub fn drain(receiver: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
