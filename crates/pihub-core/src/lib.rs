//! # pihub-core
//!
//! Shared vocabulary for the pihub event hub.
//!
//! - **Ids**: [`ConnectionId`] branded newtype for live client connections
//! - **Clock**: [`HubClock`], the process-wide timebase stamped on events
//! - **Sensor events**: [`SensorEvent`] / [`Measurement`] produced by sensor sources
//! - **Publishing seam**: [`EventSink`] implemented by the hub dispatcher and
//!   consumed by the sensor relay and actuator controller
//! - **Logging**: `tracing` subscriber setup and log-capture test utilities

#![deny(unsafe_code)]

pub mod clock;
pub mod events;
pub mod ids;
pub mod logging;
pub mod sink;

pub use clock::HubClock;
pub use events::{Measurement, SensorEvent, SensorEventKind};
pub use ids::ConnectionId;
pub use sink::{Delivery, EventSink, RecordingSink, publish};
