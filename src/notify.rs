use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-lot event subscriptions. The embedding layer can
/// watch a lot to push live status updates to displays.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a lot. Creates the channel if needed.
    pub fn subscribe(&self, lot_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(lot_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, lot_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&lot_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a lot is deleted).
    pub fn remove(&self, lot_id: &Ulid) {
        self.channels.remove(lot_id);
    }
}
