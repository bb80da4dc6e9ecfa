//! Relay sensor events into the hub.

use std::sync::Arc;

use futures::StreamExt;
use pihub_core::{EventSink, SensorEvent};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::source::SensorSource;

/// Channel name and payload for one sensor event from `source`.
///
/// The payload always carries `event` (the kind) and `source`; the rest
/// depends on the kind.
pub fn restructure(source: &str, event: &SensorEvent) -> (String, Value) {
    let kind = event.kind();
    let mut data = Map::new();
    let _ = data.insert("event".into(), json!(kind.as_str()));
    let _ = data.insert("source".into(), json!(source));
    match event {
        SensorEvent::Start(at) => {
            let _ = data.insert("start".into(), json!(at));
        }
        SensorEvent::Measure(m) => {
            let _ = data.insert("time".into(), json!(m.time));
            let _ = data.insert("duration".into(), json!(m.duration));
            let _ = data.insert("acceleration".into(), json!(m.acceleration));
            let _ = data.insert("rotation".into(), json!(m.rotation));
        }
        SensorEvent::Exception(error) => {
            let _ = data.insert("error".into(), json!(error));
        }
        SensorEvent::Discarded => {
            let _ = data.insert("discarded".into(), json!(true));
        }
    }
    (kind.channel(source), Value::Object(data))
}

/// Publish every event from `source` until the stream ends or `cancel` fires.
///
/// Events nobody subscribes to are skipped before they are restructured.
pub async fn relay_sensor(
    sink: Arc<dyn EventSink>,
    source: Box<dyn SensorSource>,
    cancel: CancellationToken,
) {
    let name = source.name().to_owned();
    let mut events = source.into_events();
    info!(source = %name, "sensor relay started");
    let mut relayed: u64 = 0;
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = events.next() => match next {
                Some(event) => event,
                None => {
                    warn!(source = %name, "sensor stream ended");
                    break;
                }
            },
        };
        if let SensorEvent::Exception(ref error) = event {
            warn!(source = %name, error = %error, "sensor read failed");
        }
        let channel = event.kind().channel(&name);
        if !sink.has_subscribers(&channel) {
            continue;
        }
        let (channel, payload) = restructure(&name, &event);
        let _ = sink.publish_json(&channel, payload);
        relayed += 1;
    }
    info!(source = %name, relayed, "sensor relay stopped");
}
