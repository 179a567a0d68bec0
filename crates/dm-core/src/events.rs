//! Push-update fan-out.
//!
//! A typed `broadcast::Sender<DeviceEvent>` shared by both transports: the
//! gRPC `Connect` stream and the HTTP SSE `connect` stream each hold their
//! own `Receiver` and render the event into their own wire form.

use tokio::sync::broadcast;

use dm_proto::Value;

/// One state change a connected client may care about.
#[derive(Clone, Debug)]
pub enum DeviceEvent {
    /// A param was written by an external client via `SetValue`/`MultiSetValue`.
    ValueSetByClient {
        oid: String,
        element_index: Option<u32>,
        value: Value,
    },
    /// A param was written internally (e.g. by a command handler).
    ValueSetByServer {
        oid: String,
        element_index: Option<u32>,
        value: Value,
    },
    /// A language pack was added or replaced.
    LanguageAdded { id: String },
    /// A language pack was deleted.
    LanguageRemoved { id: String },
    /// The device (or the whole server) is shutting down; streams should
    /// close gracefully rather than waiting on further events.
    Shutdown,
}

/// Thin wrapper over a `broadcast::Sender` that never panics when there are
/// no subscribers — matching `SseBroadcaster::publish`'s "it's fine if
/// nobody's listening" semantics.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DeviceEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_proto::value::Kind;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(DeviceEvent::ValueSetByClient {
            oid: "/power".into(),
            element_index: None,
            value: Value {
                kind: Some(Kind::Int32Value(1)),
            },
        });
        let event = rx.recv().await.unwrap();
        matches!(event, DeviceEvent::ValueSetByClient { .. });
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(DeviceEvent::Shutdown);
    }
}
