//! Sensor source and clock settings.

use serde::{Deserialize, Serialize};

/// Sensor source settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorSettings {
    /// Whether to run the sensor relay at all.
    pub enabled: bool,
    /// Source name, used as the channel prefix (`<name>-measure`).
    pub name: String,
    /// Samples per second.
    pub sample_rate: u32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "gyro-0".to_string(),
            sample_rate: 50,
        }
    }
}

/// `time` heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClockSettings {
    /// Interval between `time` events in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}
