//! # pihub-sensor
//!
//! Producers that feed the hub from outside any client connection.
//!
//! - [`SensorSource`]: a lazy, unbounded stream of [`SensorEvent`]s
//! - [`SimulatedGyro`]: inertial source sampling at a fixed rate
//! - [`relay_sensor`]: restructures sensor events into `<source>-<kind>`
//!   hub events
//! - [`run_clock`]: the periodic `time` heartbeat
//!
//! [`SensorEvent`]: pihub_core::SensorEvent

#![deny(unsafe_code)]

pub mod clock;
pub mod gyro;
pub mod relay;
pub mod source;

pub use clock::run_clock;
pub use gyro::SimulatedGyro;
pub use relay::{relay_sensor, restructure};
pub use source::{SensorSource, SensorStream};
