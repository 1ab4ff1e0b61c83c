// ── Event bus ──
//
// In-process broadcast channel between the push coordinator (producer)
// and the motion router plus any external consumers. Events are addressed
// by a per-device topic so consumers can filter without knowing about
// registry internals.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use reowatch_api::model::AiKind;

use crate::model::MacAddress;

/// Capacity of the broadcast channel. A consumer that falls further behind
/// than this sees `Lagged` and must resynchronize from authoritative state.
pub const BUS_CHANNEL_SIZE: usize = 256;

/// Payload of one bus event.
///
/// Serializes to the exact shape downstream consumers observe:
/// `{"motion":true}`, `{"available":false}`, `{"ai_refreshed":true}`,
/// `{"smtp":"person"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Motion state reported by a webhook notification.
    Motion { motion: bool },
    /// Device reachability as observed by the subscription lifecycle.
    Availability { available: bool },
    /// The parent motion sensor finished re-querying AI state; per-class
    /// observers may now pick up fresh values.
    AiRefreshed { ai_refreshed: bool },
    /// An AI classification delivered over the SMTP path.
    Smtp { smtp: AiKind },
}

/// One event on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub topic: String,
    pub payload: EventPayload,
}

/// Cheaply cloneable handle on the engine-wide event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    namespace: String,
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(namespace: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(BUS_CHANNEL_SIZE);
        Self {
            namespace: namespace.into(),
            tx,
        }
    }

    /// Topic a device's events are published under:
    /// `<namespace>-event-<bare mac>`.
    pub fn topic_for(&self, device_id: &MacAddress) -> String {
        format!("{}-event-{}", self.namespace, device_id.simple())
    }

    /// Recover the device id from a topic produced by [`Self::topic_for`].
    pub fn device_of(&self, topic: &str) -> Option<MacAddress> {
        let rest = topic.strip_prefix(&self.namespace)?;
        let mac = rest.strip_prefix("-event-")?;
        (!mac.is_empty()).then(|| MacAddress::new(mac))
    }

    /// Publish a device-scoped event. Delivery is best-effort: with no
    /// live subscribers the event is dropped.
    pub fn publish(&self, device_id: &MacAddress, payload: EventPayload) {
        self.publish_topic(self.topic_for(device_id), payload);
    }

    /// Publish on an explicit topic. Used by webhook delivery, where the
    /// topic was registered ahead of time.
    pub fn publish_topic(&self, topic: impl Into<String>, payload: EventPayload) {
        let event = BusEvent {
            topic: topic.into(),
            payload,
        };
        trace!(topic = %event.topic, payload = ?event.payload, "bus publish");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
