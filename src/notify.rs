use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;
const CHANNEL_PREFIX: &str = "seat_";

/// `LISTEN` channel name for a seat.
pub fn channel_name(seat_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{seat_id}")
}

/// Seat id addressed by a `LISTEN` channel, if it is a seat channel.
pub fn seat_from_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix(CHANNEL_PREFIX).filter(|id| !id.is_empty())
}

/// JSON body of a notification. Built from [`Event::notice`], so it never
/// contains a PIN.
pub fn payload(event: &Event) -> String {
    serde_json::to_string(&event.notice()).unwrap_or_else(|_| "{}".to_string())
}

/// Broadcast hub for LISTEN/NOTIFY per seat.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
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

    /// Subscribe to a seat's notifications. Creates the channel if needed.
    pub fn subscribe(&self, seat_id: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(seat_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, seat_id: &str, event: &Event) {
        if let Some(sender) = self.channels.get(seat_id) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhysicalStatus;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("A1");

        let event = Event::PhysicalStatusChanged {
            seat_id: "A1".into(),
            physical_status: PhysicalStatus::Occupied,
        };
        hub.send("A1", &event);
        hub.send("A2", &event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(
            "B3",
            &Event::SeatCreated {
                seat_id: "B3".into(),
                physical_status: PhysicalStatus::Unknown,
            },
        );
    }

    #[test]
    fn channel_names() {
        assert_eq!(channel_name("A1"), "seat_A1");
        assert_eq!(seat_from_channel("seat_A1"), Some("A1"));
        assert_eq!(seat_from_channel("seat_"), None);
        assert_eq!(seat_from_channel("booking_A1"), None);
    }

    #[test]
    fn payload_is_camel_case_json() {
        let event = Event::PhysicalStatusChanged {
            seat_id: "A1".into(),
            physical_status: PhysicalStatus::Occupied,
        };
        let json: serde_json::Value = serde_json::from_str(&payload(&event)).unwrap();
        assert_eq!(json["kind"], "physical_status_changed");
        assert_eq!(json["seatId"], "A1");
        assert_eq!(json["physicalStatus"], "occupied");
        assert!(json.get("bookingId").is_none());
    }
}
