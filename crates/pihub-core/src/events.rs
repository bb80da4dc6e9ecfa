//! Event names and the sensor event model.
//!
//! Sensor sources yield [`SensorEvent`]s; the sensor relay restructures them
//! into hub events published on `"<source>-<kind>"` channels.

use serde::{Deserialize, Serialize};

/// Hub-clock heartbeat, payload is clock seconds.
pub const TIME_EVENT: &str = "time";

/// Actuator echo, payload `{n, position, time}`.
pub const SERVO_POSITION_EVENT: &str = "servo-position";

/// Inbound actuator command, payload `{n, position, sticky?}`.
pub const MOVE_SERVO_COMMAND: &str = "move-servo";

/// One inertial sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Clock seconds at the end of the sample window.
    pub time: f64,
    /// Length of the sample window in seconds.
    pub duration: f64,
    /// Linear acceleration per axis (m/s²).
    pub acceleration: [f64; 3],
    /// Angular velocity per axis (rad/s).
    pub rotation: [f64; 3],
}

/// Typed event produced by a sensor source.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    /// The sensor started (or restarted after a reset), at clock seconds.
    Start(f64),
    /// A new sample.
    Measure(Measurement),
    /// Reading the sensor failed; the source keeps going.
    Exception(String),
    /// Samples were discarded (FIFO overflow or range change).
    Discarded,
}

/// Discriminant of a [`SensorEvent`], used for channel naming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorEventKind {
    /// [`SensorEvent::Start`].
    Start,
    /// [`SensorEvent::Measure`].
    Measure,
    /// [`SensorEvent::Exception`].
    Exception,
    /// [`SensorEvent::Discarded`].
    Discarded,
}

impl SensorEventKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Measure => "measure",
            Self::Exception => "exception",
            Self::Discarded => "discarded",
        }
    }

    /// Channel name for this kind from the given source, e.g. `gyro-0-measure`.
    pub fn channel(self, source: &str) -> String {
        format!("{source}-{}", self.as_str())
    }
}

impl SensorEvent {
    /// Kind of this event.
    pub fn kind(&self) -> SensorEventKind {
        match self {
            Self::Start(_) => SensorEventKind::Start,
            Self::Measure(_) => SensorEventKind::Measure,
            Self::Exception(_) => SensorEventKind::Exception,
            Self::Discarded => SensorEventKind::Discarded,
        }
    }
}
