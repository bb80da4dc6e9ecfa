//! Hub timebase.
//!
//! Every timestamp the hub publishes (`time` ticks, actuator echoes, sensor
//! measures) is seconds since the hub clock started, so browser plots can
//! line series up against the shared `time` event.

use std::time::Duration;

use tokio::time::Instant;

/// Monotonic clock anchored at hub start.
///
/// Built on [`tokio::time::Instant`] so paused-time tests can advance it.
#[derive(Clone, Copy, Debug)]
pub struct HubClock {
    started: Instant,
}

impl HubClock {
    /// Start a clock at the current instant.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Current instant (the same source the clock is anchored on).
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Time since the clock started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Seconds since the clock started, as published on the wire.
    pub fn seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Convert an instant to clock seconds. Instants before the start clamp to 0.
    pub fn seconds_at(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.started).as_secs_f64()
    }
}

impl Default for HubClock {
    fn default() -> Self {
        Self::start()
    }
}
