//! Simulated six-axis gyro.
//!
//! Produces a slow synthetic wobble so browser plots have something to
//! draw without the I2C device attached.

use std::f64::consts::TAU;
use std::time::Duration;

use pihub_core::{HubClock, Measurement, SensorEvent};
use pihub_settings::SensorSettings;
use tokio::time::{MissedTickBehavior, interval};

use crate::source::{SensorSource, SensorStream};

/// Gravity on the z axis, m/s².
const GRAVITY: f64 = 9.81;

/// Gyro that samples a synthetic signal at `sample_rate` Hz.
pub struct SimulatedGyro {
    name: String,
    period: Duration,
    clock: HubClock,
}

impl SimulatedGyro {
    /// Create a gyro named `name` sampling at `sample_rate` Hz (at least 1).
    pub fn new(name: impl Into<String>, sample_rate: u32, clock: HubClock) -> Self {
        Self {
            name: name.into(),
            period: Duration::from_secs(1) / sample_rate.max(1),
            clock,
        }
    }

    /// Build from sensor settings.
    pub fn from_settings(settings: &SensorSettings, clock: HubClock) -> Self {
        Self::new(settings.name.clone(), settings.sample_rate, clock)
    }

    /// Interval between samples.
    pub fn period(&self) -> Duration {
        self.period
    }
}

fn sample(time: f64, duration: f64) -> Measurement {
    let phase = TAU * 0.25 * time;
    Measurement {
        time,
        duration,
        acceleration: [0.3 * phase.sin(), 0.3 * phase.cos(), GRAVITY],
        rotation: [0.1 * phase.cos(), -0.1 * phase.sin(), 0.05 * (2.0 * phase).sin()],
    }
}

impl SensorSource for SimulatedGyro {
    fn name(&self) -> &str {
        &self.name
    }

    fn into_events(self: Box<Self>) -> SensorStream {
        let Self { period, clock, .. } = *self;
        Box::pin(async_stream::stream! {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately.
            let _ = ticks.tick().await;
            let mut last = clock.now();
            yield SensorEvent::Start(clock.seconds_at(last));

            loop {
                let now = ticks.tick().await;
                let window = now.saturating_duration_since(last);
                // A window spanning several periods means samples were lost.
                if window >= period * 2 {
                    yield SensorEvent::Discarded;
                }
                last = now;
                yield SensorEvent::Measure(sample(clock.seconds_at(now), window.as_secs_f64()));
            }
        })
    }
}
