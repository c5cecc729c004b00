use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Fire-and-forget fan-out of committed events. Reservation events are keyed
/// by flight id, flight/aircraft events by aircraft id; a confirmation-email
/// sender would subscribe to the flights it cares about.
///
/// Delivery is best-effort: `send` reports whether anyone received the event
/// so callers can surface a soft "notification not delivered" flag, but a
/// failed delivery never rolls back the commit it announces.
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

    /// Subscribe to events for a key. Creates the channel if needed.
    pub fn subscribe(&self, key: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. Returns true iff at least one subscriber received it.
    pub fn send(&self, key: Ulid, event: &Event) -> bool {
        if let Some(sender) = self.channels.get(&key) {
            sender.send(event.clone()).is_ok()
        } else {
            false
        }
    }

    /// Remove a channel (e.g. when the entity is deleted).
    pub fn remove(&self, key: &Ulid) {
        self.channels.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed(id: Ulid) -> Event {
        Event::FlightRemoved { id }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let key = Ulid::new();
        let mut rx = hub.subscribe(key);

        let event = removed(key);
        assert!(hub.send(key, &event));

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_reports_undelivered() {
        let hub = NotifyHub::new();
        let key = Ulid::new();
        assert!(!hub.send(key, &removed(key)));

        // A dropped subscriber counts as nobody listening.
        let rx = hub.subscribe(key);
        drop(rx);
        assert!(!hub.send(key, &removed(key)));
    }
}
