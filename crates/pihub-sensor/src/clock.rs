//! `time` heartbeat.

use std::sync::Arc;
use std::time::Duration;

use pihub_core::events::TIME_EVENT;
use pihub_core::{EventSink, HubClock, publish};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Publish the hub clock's seconds on `time` every `every` until cancelled.
pub async fn run_clock(
    sink: Arc<dyn EventSink>,
    clock: HubClock,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticks = interval(every.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let interval_ms = u64::try_from(every.as_millis()).unwrap_or(u64::MAX);
    info!(interval_ms, "clock heartbeat started");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {
                let delivery = publish(sink.as_ref(), TIME_EVENT, &clock.seconds());
                if !delivery.is_empty() {
                    debug!(recipients = delivery.recipients, "time tick");
                }
            }
        }
    }
    info!("clock heartbeat stopped");
}
