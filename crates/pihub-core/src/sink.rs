//! Publishing seam between event producers and the hub dispatcher.
//!
//! The sensor relay, the clock and the actuator controller publish through
//! [`EventSink`] so they do not depend on the WebSocket server crate.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Outcome of one publish across all recipients in the snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers in the snapshot taken at publish time.
    pub recipients: usize,
    /// Messages placed on a recipient's outbound queue.
    pub enqueued: usize,
    /// Recipients whose outbound queue was full (message dropped for them only).
    pub dropped: usize,
    /// Recipients whose connection had already closed.
    pub closed: usize,
}

impl Delivery {
    /// Whether nobody was subscribed at publish time.
    pub fn is_empty(&self) -> bool {
        self.recipients == 0
    }
}

/// Something events can be published into.
pub trait EventSink: Send + Sync {
    /// Whether at least one connection is subscribed to `event` right now.
    fn has_subscribers(&self, event: &str) -> bool;

    /// Publish an already-built JSON payload.
    fn publish_json(&self, event: &str, payload: Value) -> Delivery;
}

/// Serialize `payload` and publish it, skipping the serialization entirely
/// when nobody listens to `event`.
pub fn publish<P: Serialize + ?Sized>(sink: &dyn EventSink, event: &str, payload: &P) -> Delivery {
    if !sink.has_subscribers(event) {
        return Delivery::default();
    }
    match serde_json::to_value(payload) {
        Ok(value) => sink.publish_json(event, value),
        Err(e) => {
            warn!(event, error = %e, "payload is not representable as JSON, dropping event");
            Delivery::default()
        }
    }
}

/// In-memory sink that records every publish. Used by tests across crates.
#[derive(Clone, Default)]
pub struct RecordingSink {
    published: Arc<Mutex<Vec<(String, Value)>>>,
    listen_all: bool,
}

impl RecordingSink {
    /// A sink that reports every event as subscribed.
    pub fn listening() -> Self {
        Self {
            published: Arc::default(),
            listen_all: true,
        }
    }

    /// A sink with no subscribers at all.
    pub fn deaf() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    /// Payloads published on one event name, in order.
    pub fn payloads(&self, event: &str) -> Vec<Value> {
        self.published()
            .into_iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn has_subscribers(&self, _event: &str) -> bool {
        self.listen_all
    }

    fn publish_json(&self, event: &str, payload: Value) -> Delivery {
        self.published.lock().push((event.to_owned(), payload));
        Delivery {
            recipients: 1,
            enqueued: 1,
            ..Delivery::default()
        }
    }
}
