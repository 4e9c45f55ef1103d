use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Every ledger change, across all resources.
pub const LEDGER_CHANNEL: &str = "ledger";
/// Booking, billing, code and attendance changes.
pub const BOOKINGS_CHANNEL: &str = "bookings";

pub fn resource_channel(resource: &str) -> String {
    format!("resource_{resource}")
}

/// A committed event stamped with the engine revision it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub revision: u64,
    pub event: Event,
}

/// Broadcast hub of committed changes, one channel per name.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Change>>,
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

    /// Subscribe to a channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Change> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan a committed change out to the channels it belongs to. No-op if nobody listens.
    pub fn publish(&self, change: &Change) {
        match change.event.resource() {
            Some(resource) => {
                self.send(&resource_channel(resource), change);
                self.send(LEDGER_CHANNEL, change);
            }
            None => self.send(BOOKINGS_CHANNEL, change),
        }
    }

    fn send(&self, channel: &str, change: &Change) {
        if let Some(sender) = self.channels.get(channel) {
            let _ = sender.send(change.clone());
        }
    }
}
