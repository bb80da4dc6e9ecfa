//! Event fan-out to subscribed WebSocket clients.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use pihub_core::{ConnectionId, Delivery, EventSink};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::{Connection, SendOutcome};
use crate::metrics::{HUB_DELIVERIES_TOTAL, HUB_PUBLISH_TOTAL, HUB_SEND_DROPS_TOTAL};
use crate::protocol::encode_broadcast;
use crate::registry::{RegistryError, SubscriptionRegistry};

/// The event hub: owns the subscription registry and publishes into it.
///
/// Publishing never waits on a client. Each recipient has its own bounded
/// outbound queue; a full queue drops the message for that recipient only,
/// and a recipient that keeps dropping is asked to close.
pub struct EventHub {
    registry: Mutex<SubscriptionRegistry>,
    max_send_drops: u64,
}

impl EventHub {
    /// Create a hub that evicts clients after `max_send_drops` drops.
    pub fn new(max_send_drops: u64) -> Self {
        Self {
            registry: Mutex::new(SubscriptionRegistry::new()),
            max_send_drops: max_send_drops.max(1),
        }
    }

    /// Start tracking a live connection.
    pub fn register(&self, conn: Arc<Connection>) {
        let _ = self.registry.lock().add_connection(conn);
    }

    /// Subscribe `conn` to `event`. Idempotent.
    pub fn subscribe(&self, conn: &Arc<Connection>, event: &str) -> bool {
        self.registry.lock().subscribe(conn, event)
    }

    /// Unsubscribe `id` from `event`.
    pub fn unsubscribe(&self, id: &ConnectionId, event: &str) -> Result<(), RegistryError> {
        self.registry.lock().unsubscribe(id, event)
    }

    /// Forget a connection and all its subscriptions. Returns the events it
    /// was subscribed to.
    pub fn drop_connection(&self, id: &ConnectionId) -> Vec<String> {
        self.registry.lock().drop_connection(id)
    }

    /// Publish `payload` on `event` as `[event, payload]`.
    ///
    /// Returns without serializing when nobody is subscribed.
    pub fn publish<P: Serialize + ?Sized>(&self, event: &str, payload: &P) -> Delivery {
        let recipients = self.registry.lock().subscribers_of(event);
        if recipients.is_empty() {
            return Delivery::default();
        }

        let message: Arc<str> = match encode_broadcast(event, payload) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!(event, error = %e, "failed to serialize event");
                return Delivery::default();
            }
        };
        counter!(HUB_PUBLISH_TOTAL).increment(1);

        let mut delivery = Delivery {
            recipients: recipients.len(),
            ..Delivery::default()
        };
        for conn in &recipients {
            match conn.send(Arc::clone(&message)) {
                SendOutcome::Queued => delivery.enqueued += 1,
                SendOutcome::Full => {
                    delivery.dropped += 1;
                    self.note_drop(conn, event);
                }
                // The session's receive loop owns disconnect cleanup.
                SendOutcome::Closed => delivery.closed += 1,
            }
        }
        counter!(HUB_DELIVERIES_TOTAL).increment(delivery.enqueued as u64);
        debug!(
            event,
            recipients = delivery.recipients,
            dropped = delivery.dropped,
            "published event"
        );
        delivery
    }

    fn note_drop(&self, conn: &Connection, event: &str) {
        counter!(HUB_SEND_DROPS_TOTAL).increment(1);
        let drops = conn.drop_count();
        if drops >= self.max_send_drops && !conn.is_closing() {
            warn!(
                conn_id = %conn.id(),
                remote = %conn.remote(),
                drops,
                event,
                "slow client exceeded send drop limit, disconnecting"
            );
            conn.close();
        }
    }

    /// Live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().connection_count()
    }

    /// Event names with at least one subscriber.
    pub fn event_count(&self) -> usize {
        self.registry.lock().event_count()
    }

    /// Current subscribers of `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registry.lock().subscribers_of(event).len()
    }

    /// Events `id` is subscribed to.
    pub fn subscriptions_of(&self, id: &ConnectionId) -> Vec<String> {
        self.registry.lock().subscriptions_of(id)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventSink for EventHub {
    fn has_subscribers(&self, event: &str) -> bool {
        self.registry.lock().has_subscribers(event)
    }

    fn publish_json(&self, event: &str, payload: Value) -> Delivery {
        self.publish(event, &payload)
    }
}
