//! Broadcast of wallet and marketplace events to any number of consumers.
//!
//! The session publishes every state transition here; the CLI's `watch`
//! command and the application root's restart handling subscribe to it.
//!
//! # Example
//!
//! ```rust
//! use tutorchain_core::event_bus::EventBus;
//! use std::sync::Arc;
//!
//! let event_bus = Arc::new(EventBus::new());
//! let mut rx = event_bus.subscribe();
//!
//! event_bus.emit("wallet:chain_changed", &serde_json::json!({"chain_id": 137}));
//!
//! // In async context:
//! // let event = rx.recv().await.unwrap();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events beyond this many unread ones make a slow subscriber lag.
const DEFAULT_CAPACITY: usize = 256;

/// A broadcast event: a type name, a JSON payload, and when it was emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// Event type identifier (e.g. "wallet:connected").
    pub event_type: String,

    pub payload: serde_json::Value,

    pub emitted_at: DateTime<Utc>,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// True if the event type starts with `prefix` (e.g. "wallet:").
    pub fn is(&self, prefix: &str) -> bool {
        self.event_type.starts_with(prefix)
    }
}

/// Publish-subscribe bus backed by a tokio broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns how many subscribers received it; with no subscribers the
    /// event is dropped and 0 is returned.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let json_payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize {} payload: {}", event_type, e);
                return 0;
            }
        };
        self.sender
            .send(BroadcastEvent::new(event_type, json_payload))
            .unwrap_or(0)
    }

    /// Receive all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the next event whose type starts with `prefix`.
///
/// Lagged receivers skip the missed events and keep waiting. Returns `None`
/// once the bus is gone.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<BroadcastEvent>,
    prefix: &str,
) -> Option<BroadcastEvent> {
    loop {
        match rx.recv().await {
            Ok(event) if event.is(prefix) => return Some(event),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Event subscriber lagged, skipped {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod broadcast_event {
        use super::*;

        #[test]
        fn new_stamps_time() {
            let before = Utc::now();
            let event = BroadcastEvent::new("wallet:connected", json!({"account": "0x1"}));
            assert_eq!(event.event_type, "wallet:connected");
            assert_eq!(event.payload["account"], "0x1");
            assert!(event.emitted_at >= before);
        }

        #[test]
        fn prefix_match() {
            let event = BroadcastEvent::new("wallet:restart", json!({}));
            assert!(event.is("wallet:"));
            assert!(event.is("wallet:restart"));
            assert!(!event.is("gateway:"));
        }
    }

    mod event_bus {
        use super::*;

        #[test]
        fn subscriber_count_tracks_receivers() {
            let bus = EventBus::new();
            assert_eq!(bus.subscriber_count(), 0);
            let rx = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 1);
            drop(rx);
            assert_eq!(bus.subscriber_count(), 0);
        }

        #[test]
        fn emit_without_subscribers_returns_zero() {
            let bus = EventBus::default();
            assert_eq!(bus.emit("wallet:connected", &json!({})), 0);
        }

        #[tokio::test]
        async fn every_subscriber_sees_event() {
            let bus = EventBus::new();
            let mut rx1 = bus.subscribe();
            let mut rx2 = bus.subscribe();

            assert_eq!(bus.emit("wallet:chain_changed", &json!({"chain_id": 137})), 2);

            let e1 = rx1.recv().await.unwrap();
            let e2 = rx2.recv().await.unwrap();
            assert_eq!(e1.payload["chain_id"], 137);
            assert_eq!(e1.event_type, e2.event_type);
        }

        #[tokio::test]
        async fn events_arrive_in_order() {
            let bus = EventBus::new();
            let mut rx = bus.subscribe();

            bus.emit("wallet:connected", &json!({"n": 1}));
            bus.emit("wallet:accounts_changed", &json!({"n": 2}));

            assert_eq!(rx.recv().await.unwrap().payload["n"], 1);
            assert_eq!(rx.recv().await.unwrap().payload["n"], 2);
        }

        #[tokio::test]
        async fn next_matching_skips_other_events() {
            let bus = EventBus::new();
            let mut rx = bus.subscribe();

            bus.emit("gateway:receipt", &json!({}));
            bus.emit("wallet:restart", &json!({"chain_id": 5}));

            let event = next_matching(&mut rx, "wallet:").await.unwrap();
            assert_eq!(event.event_type, "wallet:restart");
        }

        #[tokio::test]
        async fn next_matching_survives_lag() {
            let bus = EventBus::with_capacity(2);
            let mut rx = bus.subscribe();

            for n in 0..5 {
                bus.emit("gateway:noise", &json!({"n": n}));
            }
            bus.emit("wallet:restart", &json!({}));

            let event = next_matching(&mut rx, "wallet:restart").await.unwrap();
            assert_eq!(event.event_type, "wallet:restart");
        }

        #[tokio::test]
        async fn next_matching_ends_when_bus_dropped() {
            let bus = EventBus::new();
            let mut rx = bus.subscribe();
            drop(bus);
            assert!(next_matching(&mut rx, "wallet:").await.is_none());
        }
    }
}
